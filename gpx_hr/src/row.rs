//! Measurement rows and the two text layouts they are exported in.

use std::io::BufRead;

use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, TimeDelta, TimeZone};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::HrError;

const MAX_RATE_ZONE: i64 = 150;
const LOCAL_DATE_TIME_FORMAT: &str = "%d.%m.%Y %H:%M:%S";

/// One heart-rate sample.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartRateRow {
    timestamp: DateTime<FixedOffset>,
    rate: u32,
    rate_zone: u32,
}

impl HeartRateRow {
    pub fn new(timestamp: DateTime<FixedOffset>, rate: i64, rate_zone: i64) -> Result<Self, HrError> {
        if rate <= 0 {
            return Err(HrError::InvalidRow(format!(
                "rate must be positive, but was {rate}"
            )));
        }
        if !(0..=MAX_RATE_ZONE).contains(&rate_zone) {
            return Err(HrError::InvalidRow(format!(
                "rate zone must be in [0; {MAX_RATE_ZONE}], but was {rate_zone}"
            )));
        }
        let rate = u32::try_from(rate)
            .map_err(|_| HrError::InvalidRow(format!("rate {rate} is out of range")))?;
        let rate_zone = u32::try_from(rate_zone)
            .map_err(|_| HrError::InvalidRow(format!("rate zone {rate_zone} is out of range")))?;
        Ok(Self {
            timestamp,
            rate,
            rate_zone,
        })
    }

    pub fn timestamp(&self) -> DateTime<FixedOffset> {
        self.timestamp
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    pub fn rate_zone(&self) -> u32 {
        self.rate_zone
    }
}

/// Export layouts understood by [`parse_line`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineFormat {
    /// `04.01.2000 00:00:00,4,1%`
    MiBandTools,
    /// `60;1589922120000;20 May 2020;00:02:00`
    NotifyFitness,
}

impl LineFormat {
    pub fn detect(line: &str) -> Option<Self> {
        if line.contains(';') {
            Some(LineFormat::NotifyFitness)
        } else if line.contains(',') {
            Some(LineFormat::MiBandTools)
        } else {
            None
        }
    }
}

/// Parse a single data line. `max_heart_rate` is only used to derive the zone
/// of [`LineFormat::NotifyFitness`] rows, which carry no zone of their own.
pub fn parse_line(line: &str, max_heart_rate: u32) -> Result<HeartRateRow, HrError> {
    match LineFormat::detect(line) {
        Some(LineFormat::MiBandTools) => parse_mi_band_tools(line),
        Some(LineFormat::NotifyFitness) => parse_notify_fitness(line, max_heart_rate),
        None => Err(HrError::UnrecognizedLineFormat(line.to_string())),
    }
}

fn parse_mi_band_tools(line: &str) -> Result<HeartRateRow, HrError> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() != 3 {
        return Err(HrError::FieldCount {
            expected: 3,
            found: fields.len(),
            line: line.to_string(),
        });
    }

    let naive = NaiveDateTime::parse_from_str(fields[0].trim(), LOCAL_DATE_TIME_FORMAT)
        .map_err(|e| HrError::InvalidRow(format!("bad date '{}': {e}", fields[0])))?;
    let timestamp = local_to_fixed(naive)
        .ok_or_else(|| HrError::InvalidRow(format!("no local time for '{}'", fields[0])))?;

    let rate = parse_int(fields[1], line)?;
    let zone = fields[2]
        .trim()
        .strip_suffix('%')
        .ok_or_else(|| HrError::InvalidRow(format!("zone must end with '%': {line}")))?;
    let rate_zone = parse_int(zone, line)?;

    HeartRateRow::new(timestamp, rate, rate_zone)
}

fn parse_notify_fitness(line: &str, max_heart_rate: u32) -> Result<HeartRateRow, HrError> {
    let fields: Vec<&str> = line.split(';').collect();
    if fields.len() != 4 {
        return Err(HrError::FieldCount {
            expected: 4,
            found: fields.len(),
            line: line.to_string(),
        });
    }
    if max_heart_rate == 0 {
        return Err(HrError::Configuration(
            "maximum heart rate must be positive".into(),
        ));
    }

    let rate = parse_int(fields[0], line)?;
    let millis = parse_int(fields[1], line)?;
    let timestamp = DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| HrError::InvalidRow(format!("timestamp out of range: {line}")))?
        .with_timezone(&Local)
        .fixed_offset();
    let scaled = rate
        .checked_mul(100)
        .ok_or_else(|| HrError::InvalidRow(format!("rate {rate} is out of range")))?;
    let rate_zone = (scaled / i64::from(max_heart_rate)).min(100);

    HeartRateRow::new(timestamp, rate, rate_zone)
}

fn parse_int(field: &str, line: &str) -> Result<i64, HrError> {
    field
        .trim()
        .parse()
        .map_err(|e| HrError::InvalidRow(format!("bad number '{}' in '{line}': {e}", field.trim())))
}

/// Resolve a wall-clock time in the local zone. Ambiguous times take the
/// earlier instant, times skipped by a DST jump move forward one hour.
pub(crate) fn local_to_fixed(naive: NaiveDateTime) -> Option<DateTime<FixedOffset>> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .or_else(|| Local.from_local_datetime(&(naive + TimeDelta::hours(1))).earliest())
        .map(|dt| dt.fixed_offset())
}

/// Read every data row of a measurement export. The first line is a header and
/// is always dropped, blank lines are ignored.
pub fn read_rows<R: BufRead>(source: R, max_heart_rate: u32) -> Result<Vec<HeartRateRow>, HrError> {
    let mut rows = Vec::new();
    for (number, line) in source.lines().enumerate() {
        let line = line?;
        if number == 0 || line.trim().is_empty() {
            continue;
        }
        rows.push(parse_line(&line, max_heart_rate)?);
    }
    debug!("parsed {} heart-rate rows", rows.len());
    Ok(rows)
}

#[cfg(test)]
pub(crate) fn local(text: &str) -> DateTime<FixedOffset> {
    let naive = NaiveDateTime::parse_from_str(text, LOCAL_DATE_TIME_FORMAT).unwrap();
    local_to_fixed(naive).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mi_band_tools_line() {
        let row = parse_line("04.01.2000 00:00:00,4,1%", 190).unwrap();
        assert_eq!(row.timestamp(), local("04.01.2000 00:00:00"));
        assert_eq!(row.rate(), 4);
        assert_eq!(row.rate_zone(), 1);

        let row = parse_line("10.11.2018 23:15:36,91,47%", 190).unwrap();
        assert_eq!(row.timestamp(), local("10.11.2018 23:15:36"));
        assert_eq!(row.rate(), 91);
        assert_eq!(row.rate_zone(), 47);
    }

    #[test]
    fn parses_notify_fitness_line() {
        let row = parse_line("60;1589922120000;20 May 2020;00:02:00", 190).unwrap();
        assert_eq!(row.rate(), 60);
        assert_eq!(row.rate_zone(), 31);
        assert_eq!(row.timestamp().timestamp_millis(), 1_589_922_120_000);
    }

    #[test]
    fn zone_is_capped_at_one_hundred() {
        let row = parse_line("200;1589922120000;20 May 2020;00:02:00", 190).unwrap();
        assert_eq!(row.rate_zone(), 100);
        let row = parse_line("100;1589922120000;20 May 2020;00:02:00", 200).unwrap();
        assert_eq!(row.rate_zone(), 50);
    }

    #[test]
    fn rejects_unknown_layout() {
        let err = parse_line("04.01.2000 00:00:00 4 1%", 190).unwrap_err();
        assert!(matches!(err, HrError::UnrecognizedLineFormat(_)));
    }

    #[test]
    fn rejects_wrong_field_count() {
        let err = parse_line("04.01.2000 00:00:00,4", 190).unwrap_err();
        assert!(matches!(err, HrError::FieldCount { expected: 3, found: 2, .. }));
        let err = parse_line("60;1589922120000;20 May 2020", 190).unwrap_err();
        assert!(matches!(err, HrError::FieldCount { expected: 4, found: 3, .. }));
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(matches!(
            parse_line("04.01.2000 00:00:00,0,1%", 190),
            Err(HrError::InvalidRow(_))
        ));
        assert!(matches!(
            parse_line("04.01.2000 00:00:00,80,151%", 190),
            Err(HrError::InvalidRow(_))
        ));
        assert!(matches!(
            parse_line("04.01.2000 00:00:00,80,12", 190),
            Err(HrError::InvalidRow(_))
        ));
        assert!(matches!(
            parse_line("-5;1589922120000;20 May 2020;00:02:00", 190),
            Err(HrError::InvalidRow(_))
        ));
    }

    #[test]
    fn oversized_rate_is_an_invalid_row() {
        assert!(matches!(
            parse_line("100000000000000000;1589922120000;20 May 2020;00:02:00", 190),
            Err(HrError::InvalidRow(_))
        ));
        assert!(matches!(
            parse_line("5000000000;1589922120000;20 May 2020;00:02:00", 190),
            Err(HrError::InvalidRow(_))
        ));
        assert!(matches!(
            parse_line("04.01.2000 00:00:00,5000000000,10%", 190),
            Err(HrError::InvalidRow(_))
        ));
    }

    #[test]
    fn zero_max_heart_rate_is_a_configuration_error() {
        let err = parse_line("60;1589922120000;20 May 2020;00:02:00", 0).unwrap_err();
        assert!(matches!(err, HrError::Configuration(_)));
    }

    #[test]
    fn read_rows_skips_header_and_blank_lines() {
        let text = "date,rate,zone\n10.11.2018 23:15:36,91,47%\n\n   \n11.11.2018 23:15:36,92,48%\n";
        let rows = read_rows(text.as_bytes(), 190).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].rate(), 92);
    }

    #[test]
    fn read_rows_accepts_crlf_and_mixed_layouts() {
        let text = "header\r\n10.11.2018 23:15:36,91,47%\r\n60;1589922120000;20 May 2020;00:02:00\r\n";
        let rows = read_rows(text.as_bytes(), 190).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].rate_zone(), 47);
        assert_eq!(rows[1].rate_zone(), 31);
    }

    #[test]
    fn header_only_input_yields_no_rows() {
        assert!(read_rows("header".as_bytes(), 190).unwrap().is_empty());
    }
}
