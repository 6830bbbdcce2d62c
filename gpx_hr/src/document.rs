//! Document driver: reads the GPX event stream, fixes up the root element and
//! feeds every event through the track point [`Merger`].

use std::io::{BufRead, Write};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{debug, info};

use crate::indent::Indenter;
use crate::index::{ClosestSearch, HeartRateIndex};
use crate::state::Merger;
use crate::{HrError, Params, Statistics, EXTENSION_PREFIX, EXTENSION_URI};

/// Make sure the root element binds [`EXTENSION_PREFIX`] to [`EXTENSION_URI`].
pub fn ensure_extension_namespace(mut root: BytesStart<'static>) -> Result<BytesStart<'static>, HrError> {
    let key = format!("xmlns:{EXTENSION_PREFIX}");
    let mut bound = None;
    for attribute in root.attributes() {
        let attribute = attribute?;
        if attribute.key.as_ref() == key.as_bytes() {
            bound = Some(attribute.unescape_value()?.into_owned());
            break;
        }
    }
    match bound {
        None => root.push_attribute((key.as_str(), EXTENSION_URI)),
        Some(uri) if uri == EXTENSION_URI => {}
        Some(found) => {
            return Err(HrError::NamespaceConflict {
                prefix: EXTENSION_PREFIX.to_string(),
                expected: EXTENSION_URI.to_string(),
                found,
            })
        }
    }
    Ok(root)
}

/// Stream `track` to `output`, merging heart rates from `index` into every
/// track point.
pub fn merge_document<R, W, S>(
    track: R,
    output: W,
    index: &mut HeartRateIndex<S>,
    params: &Params,
) -> Result<Statistics, HrError>
where
    R: BufRead,
    W: Write,
    S: ClosestSearch,
{
    let mut reader = Reader::from_reader(track);
    reader.config_mut().expand_empty_elements = true;

    let mut merger = Merger::new(Indenter::new(output, params.indent.clone()), index);
    let mut root_seen = false;
    let mut buf = Vec::new();
    loop {
        let event = match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Start(start) if !root_seen => {
                root_seen = true;
                debug!(
                    root = %String::from_utf8_lossy(start.name().as_ref()),
                    "declaring extension namespace on root"
                );
                Event::Start(ensure_extension_namespace(start.into_owned())?)
            }
            event => event.into_owned(),
        };
        merger.feed(event)?;
        buf.clear();
    }

    let (statistics, mut output) = merger.finish()?;
    output.flush()?;
    info!(
        succeeded = statistics.succeeded,
        failed = statistics.failed,
        untimed = statistics.untimed,
        "merged heart rate into track"
    );
    Ok(statistics)
}
