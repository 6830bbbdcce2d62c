//! Merge a heart-rate measurement series into the track points of a GPX file.

use std::io::{BufRead, Write};

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod document;
pub mod indent;
pub mod index;
pub mod row;
pub mod splice;
pub mod state;

pub use document::{ensure_extension_namespace, merge_document};
pub use index::{find_closest, BinarySearch, ClosestSearch, HeartRateIndex};
pub use row::{parse_line, read_rows, HeartRateRow, LineFormat};

/// Prefix bound to the Garmin track point extension on the root element.
pub const EXTENSION_PREFIX: &str = "gpxtpx";
pub const EXTENSION_URI: &str = "http://www.garmin.com/xmlschemas/TrackPointExtension/v1";

pub const DEFAULT_MAX_HEART_RATE: u32 = 190;
pub const DEFAULT_ACCEPTANCE_WINDOW_S: u32 = 60;

#[derive(Error, Debug)]
pub enum HrError {
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("unrecognized heart-rate line: {0}")]
    UnrecognizedLineFormat(String),
    #[error("expected {expected} fields but found {found}: {line}")]
    FieldCount {
        expected: usize,
        found: usize,
        line: String,
    },
    #[error("invalid heart-rate row: {0}")]
    InvalidRow(String),
    #[error("malformed track: {0}")]
    MalformedInput(String),
    #[error("track point already has '{0}', refusing to overwrite it")]
    DuplicateField(String),
    #[error("prefix '{prefix}' is bound to {found}, expected {expected}")]
    NamespaceConflict {
        prefix: String,
        expected: String,
        found: String,
    },
    #[error("unsupported track point structure: {0}")]
    UnsupportedStructure(String),
    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("xml attribute error: {0}")]
    Attribute(#[from] quick_xml::events::attributes::AttrError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Params {
    /// Used to derive the zone of rows that carry none.
    pub max_heart_rate: u32,
    /// Largest gap between a track point and a sample that still counts as a match.
    pub acceptance_window_s: u32,
    /// One indentation level of the rewritten document.
    pub indent: String,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            max_heart_rate: DEFAULT_MAX_HEART_RATE,
            acceptance_window_s: DEFAULT_ACCEPTANCE_WINDOW_S,
            indent: "\t".to_string(),
        }
    }
}

impl Params {
    pub fn acceptance_window(&self) -> TimeDelta {
        TimeDelta::seconds(i64::from(self.acceptance_window_s))
    }

    pub fn validate(&self) -> Result<(), HrError> {
        if self.max_heart_rate == 0 {
            return Err(HrError::Configuration(
                "maximum heart rate must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Outcome counters of one merge run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    /// Track points that received a heart rate.
    pub succeeded: u64,
    /// Lookups with no sample inside the acceptance window.
    pub failed: u64,
    /// Track points without a timestamp.
    pub untimed: u64,
}

impl Statistics {
    pub fn rejected(&self) -> u64 {
        self.failed + self.untimed
    }

    pub fn total(&self) -> u64 {
        self.succeeded + self.rejected()
    }
}

/// Read a measurement export, then stream `track` into `output` with heart
/// rates spliced into every matching track point.
pub fn process<T, H, W>(track: T, heart_rates: H, output: W, params: &Params) -> Result<Statistics, HrError>
where
    T: BufRead,
    H: BufRead,
    W: Write,
{
    params.validate()?;
    let rows = read_rows(heart_rates, params.max_heart_rate)?;
    let mut index = HeartRateIndex::new(rows)?.with_acceptance_window(params.acceptance_window());
    merge_document(track, output, &mut index, params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statistics_totals() {
        let stats = Statistics {
            succeeded: 3,
            failed: 2,
            untimed: 1,
        };
        assert_eq!(stats.rejected(), 3);
        assert_eq!(stats.total(), 6);
    }

    #[test]
    fn default_params() {
        let params = Params::default();
        assert_eq!(params.max_heart_rate, 190);
        assert_eq!(params.acceptance_window(), TimeDelta::minutes(1));
        assert!(params.validate().is_ok());
    }

    #[test]
    fn zero_max_heart_rate_is_rejected() {
        let params = Params {
            max_heart_rate: 0,
            ..Params::default()
        };
        assert!(matches!(params.validate(), Err(HrError::Configuration(_))));
    }

    #[test]
    fn empty_series_is_a_configuration_error() {
        let track = "<gpx></gpx>";
        let err = process(track.as_bytes(), "header\n\n".as_bytes(), Vec::new(), &Params::default())
            .unwrap_err();
        assert!(matches!(err, HrError::Configuration(_)));
    }

    #[test]
    fn statistics_serialize_as_flat_object() {
        let stats = Statistics {
            succeeded: 1,
            failed: 0,
            untimed: 2,
        };
        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["succeeded"], 1);
        assert_eq!(json["untimed"], 2);
    }
}
