//! Reading a buffered track point and splicing a heart-rate sub-tree into it.

use std::borrow::Cow;

use chrono::{DateTime, FixedOffset};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};

use crate::{HrError, EXTENSION_PREFIX};

pub const TRACK_POINT: &[u8] = b"trkpt";
pub const TIME: &[u8] = b"time";
pub const EXTENSIONS: &[u8] = b"extensions";
pub const TRACK_POINT_EXTENSION: &[u8] = b"TrackPointExtension";
pub const HEART_RATE: &[u8] = b"hr";

pub(crate) fn starts(event: &Event<'_>, local: &[u8]) -> bool {
    matches!(event, Event::Start(e) if e.local_name().as_ref() == local)
}

pub(crate) fn ends(event: &Event<'_>, local: &[u8]) -> bool {
    matches!(event, Event::End(e) if e.local_name().as_ref() == local)
}

fn text_content<'a>(event: &'a Event<'_>) -> Result<Option<Cow<'a, str>>, HrError> {
    match event {
        Event::Text(text) => Ok(Some(text.unescape()?)),
        Event::CData(data) => {
            let content = std::str::from_utf8(data)
                .map_err(|e| HrError::MalformedInput(format!("CDATA is not UTF-8: {e}")))?;
            Ok(Some(Cow::Borrowed(content)))
        }
        _ => Ok(None),
    }
}

/// Timestamp of a buffered track point.
///
/// `Ok(None)` when there is no `time` element at all; a `time` element that is
/// not immediately followed by parsable text is an error.
pub fn track_point_time(events: &[Event<'_>]) -> Result<Option<DateTime<FixedOffset>>, HrError> {
    let Some(position) = events.iter().position(|e| starts(e, TIME)) else {
        return Ok(None);
    };
    let content = match events.get(position + 1) {
        Some(event) => text_content(event)?,
        None => None,
    };
    let Some(content) = content else {
        return Err(HrError::MalformedInput(
            "track point time has no text, can't read the timestamp".into(),
        ));
    };
    DateTime::parse_from_rfc3339(content.trim())
        .map(Some)
        .map_err(|e| HrError::MalformedInput(format!("bad track point time '{content}': {e}")))
}

/// The innermost wrapper a heart-rate value can be spliced into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Anchor {
    /// A vendor `TrackPointExtension` exists: add just the `hr` leaf.
    TrackPointExtension,
    /// Only a generic `extensions` exists: add the vendor wrapper and the leaf.
    Extensions,
    /// No wrapper at all: add the whole `extensions` sub-tree.
    TrackPoint,
}

impl Anchor {
    fn local_name(self) -> &'static [u8] {
        match self {
            Anchor::TrackPointExtension => TRACK_POINT_EXTENSION,
            Anchor::Extensions => EXTENSIONS,
            Anchor::TrackPoint => TRACK_POINT,
        }
    }

    /// Elements opened around the `hr` leaf, outermost first.
    fn wrappers(self) -> &'static [&'static str] {
        match self {
            Anchor::TrackPointExtension => &[],
            Anchor::Extensions => &["TrackPointExtension"],
            Anchor::TrackPoint => &["extensions", "TrackPointExtension"],
        }
    }
}

/// Qualified-name prefixes used for synthesized elements.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Prefixes {
    /// Prefix of the GPX namespace, taken from the track point itself.
    pub gpx: Option<String>,
    /// Prefix of the track point extension namespace.
    pub extension: String,
}

impl Default for Prefixes {
    fn default() -> Self {
        Self {
            gpx: None,
            extension: EXTENSION_PREFIX.to_string(),
        }
    }
}

fn qualified(prefix: Option<&str>, local: &str) -> String {
    match prefix {
        Some(prefix) if !prefix.is_empty() => format!("{prefix}:{local}"),
        _ => local.to_string(),
    }
}

fn prefix_of(start: &BytesStart<'_>) -> Option<String> {
    start
        .name()
        .prefix()
        .map(|p| String::from_utf8_lossy(p.as_ref()).into_owned())
}

/// Ordered events that carry `rate` into the given anchor.
pub fn scaffold(anchor: Anchor, prefixes: &Prefixes, rate: u32) -> Vec<Event<'static>> {
    let names: Vec<String> = anchor
        .wrappers()
        .iter()
        .map(|local| match *local {
            "extensions" => qualified(prefixes.gpx.as_deref(), local),
            _ => qualified(Some(prefixes.extension.as_str()), local),
        })
        .collect();
    let leaf = qualified(Some(prefixes.extension.as_str()), "hr");

    let mut events = Vec::with_capacity(names.len() * 2 + 3);
    for name in &names {
        events.push(Event::Start(BytesStart::new(name.clone())));
    }
    events.push(Event::Start(BytesStart::new(leaf.clone())));
    events.push(Event::Text(BytesText::from_escaped(rate.to_string())));
    events.push(Event::End(BytesEnd::new(leaf)));
    for name in names.into_iter().rev() {
        events.push(Event::End(BytesEnd::new(name)));
    }
    events
}

fn single_start(events: &[Event<'_>], local: &[u8]) -> Result<Option<usize>, HrError> {
    let mut found = events
        .iter()
        .enumerate()
        .filter(|(_, e)| starts(e, local))
        .map(|(i, _)| i);
    let first = found.next();
    if first.is_some() && found.next().is_some() {
        return Err(HrError::UnsupportedStructure(format!(
            "more than one '{}' in a track point",
            String::from_utf8_lossy(local)
        )));
    }
    Ok(first)
}

/// Choose where the heart rate goes. Returns the anchor and the index of its
/// start event in `events`.
pub fn find_anchor(events: &[Event<'_>]) -> Result<(Anchor, usize), HrError> {
    if events.iter().any(|e| starts(e, HEART_RATE)) {
        return Err(HrError::DuplicateField("hr".into()));
    }
    if let Some(at) = single_start(events, TRACK_POINT_EXTENSION)? {
        return Ok((Anchor::TrackPointExtension, at));
    }
    if let Some(at) = single_start(events, EXTENSIONS)? {
        return Ok((Anchor::Extensions, at));
    }
    match events.first() {
        Some(first) if starts(first, TRACK_POINT) => Ok((Anchor::TrackPoint, 0)),
        _ => Err(HrError::UnsupportedStructure(
            "buffer does not start with a track point".into(),
        )),
    }
}

/// Index of the end event closing the start event at `open`.
fn matching_end(events: &[Event<'_>], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, event) in events.iter().enumerate().skip(open) {
        match event {
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Splice `rate` into a buffered track point right before the end of its
/// innermost existing extension wrapper.
pub fn splice_heart_rate(mut events: Vec<Event<'static>>, rate: u32) -> Result<Vec<Event<'static>>, HrError> {
    let (anchor, open) = find_anchor(&events)?;
    let close = matching_end(&events, open)
        .filter(|&i| ends(&events[i], anchor.local_name()))
        .ok_or_else(|| {
            HrError::UnsupportedStructure(format!(
                "'{}' is not closed inside the track point",
                String::from_utf8_lossy(anchor.local_name())
            ))
        })?;

    let prefixes = match (&events[0], &events[open]) {
        (Event::Start(point), Event::Start(wrapper)) => Prefixes {
            gpx: prefix_of(point),
            extension: match anchor {
                Anchor::TrackPointExtension => prefix_of(wrapper).unwrap_or_default(),
                _ => EXTENSION_PREFIX.to_string(),
            },
        },
        _ => Prefixes::default(),
    };

    let insert = scaffold(anchor, &prefixes, rate);
    events.splice(close..close, insert);
    Ok(events)
}
