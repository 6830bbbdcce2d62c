//! Rebuilds indentation for an event stream whose original whitespace may have
//! been lost by buffering and splicing.

use std::io::Write;

use quick_xml::events::{BytesText, Event};
use quick_xml::Writer;

use crate::HrError;

/// Writes events, inserting a newline plus one indent unit per open element
/// before every structural event that is not already preceded by text.
pub struct Indenter<W: Write> {
    writer: Writer<W>,
    unit: String,
    depth: usize,
    previous_text: bool,
}

pub(crate) fn is_text(event: &Event<'_>) -> bool {
    matches!(event, Event::Text(_) | Event::CData(_))
}

impl<W: Write> Indenter<W> {
    pub fn new(inner: W, unit: impl Into<String>) -> Self {
        Self {
            writer: Writer::new(inner),
            unit: unit.into(),
            depth: 0,
            previous_text: false,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn write(&mut self, event: Event<'_>) -> Result<(), HrError> {
        let text = is_text(&event);
        let level = match event {
            Event::End(_) => self.depth.saturating_sub(1),
            _ => self.depth,
        };
        if level > 0 && !self.previous_text && !text {
            let mut whitespace = String::with_capacity(1 + level * self.unit.len());
            whitespace.push('\n');
            for _ in 0..level {
                whitespace.push_str(&self.unit);
            }
            self.writer
                .write_event(Event::Text(BytesText::from_escaped(whitespace)))?;
        }

        match event {
            Event::Start(_) => self.depth += 1,
            Event::End(_) => self.depth = self.depth.saturating_sub(1),
            _ => {}
        }
        self.previous_text = text;
        self.writer.write_event(event)?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quick_xml::events::{BytesEnd, BytesStart};

    fn start(name: &str) -> Event<'static> {
        Event::Start(BytesStart::new(name.to_string()))
    }

    fn end(name: &str) -> Event<'static> {
        Event::End(BytesEnd::new(name.to_string()))
    }

    fn text(content: &str) -> Event<'static> {
        Event::Text(BytesText::from_escaped(content.to_string()))
    }

    fn render(events: Vec<Event<'static>>) -> String {
        let mut indenter = Indenter::new(Vec::new(), "\t");
        for event in events {
            indenter.write(event).unwrap();
        }
        String::from_utf8(indenter.into_inner()).unwrap()
    }

    #[test]
    fn indents_nested_elements() {
        let out = render(vec![
            start("a"),
            start("b"),
            start("c"),
            text("1"),
            end("c"),
            end("b"),
            end("a"),
        ]);
        assert_eq!(out, "<a>\n\t<b>\n\t\t<c>1</c>\n\t</b></a>");
    }

    #[test]
    fn keeps_existing_whitespace() {
        let out = render(vec![
            start("a"),
            text("\n  "),
            start("b"),
            end("b"),
            text("\n"),
            end("a"),
        ]);
        assert_eq!(out, "<a>\n  <b>\n\t</b>\n</a>");
    }

    #[test]
    fn adjacent_text_is_not_padded() {
        let out = render(vec![start("a"), text("x"), text("y"), end("a")]);
        assert_eq!(out, "<a>xy</a>");
    }

    #[test]
    fn tracks_depth() {
        let mut indenter = Indenter::new(Vec::new(), "  ");
        indenter.write(start("a")).unwrap();
        indenter.write(start("b")).unwrap();
        assert_eq!(indenter.depth(), 2);
        indenter.write(end("b")).unwrap();
        assert_eq!(indenter.depth(), 1);
        indenter.write(end("a")).unwrap();
        assert_eq!(indenter.depth(), 0);
        let out = String::from_utf8(indenter.into_inner()).unwrap();
        assert_eq!(out, "<a>\n  <b>\n  </b></a>");
    }

    #[test]
    fn comments_are_indented_like_elements() {
        let out = render(vec![
            start("a"),
            Event::Comment(BytesText::from_escaped(" note ".to_string())),
            end("a"),
        ]);
        assert_eq!(out, "<a>\n\t<!-- note --></a>");
    }
}
