//! Time-indexed nearest-sample lookup over a sorted heart-rate series.
//!
//! Track points arrive in (almost) increasing time order, so every lookup
//! remembers where the previous one landed and only searches the part of the
//! series on the matching side of it.

use chrono::{DateTime, FixedOffset, TimeDelta};
use tracing::{debug, trace};

use crate::row::HeartRateRow;
use crate::HrError;

/// Search for the row closest to `at` within `rows[from..=to]`.
pub trait ClosestSearch {
    fn closest(&mut self, rows: &[HeartRateRow], from: usize, to: usize, at: DateTime<FixedOffset>) -> usize;
}

/// The production search: [`find_closest`].
#[derive(Clone, Copy, Debug, Default)]
pub struct BinarySearch;

impl ClosestSearch for BinarySearch {
    fn closest(&mut self, rows: &[HeartRateRow], from: usize, to: usize, at: DateTime<FixedOffset>) -> usize {
        find_closest(rows, from, to, at)
    }
}

/// Index of the row in `rows[from..=to]` nearest to `at`.
///
/// Queries outside the range clamp to its first or last row. Between two
/// equally distant rows the later one wins. An exact hit returns the first
/// row in the range with that timestamp. `rows` must be sorted and
/// `from <= to < rows.len()`.
pub fn find_closest(rows: &[HeartRateRow], from: usize, to: usize, at: DateTime<FixedOffset>) -> usize {
    if at <= rows[from].timestamp() {
        return from;
    }
    if at >= rows[to].timestamp() {
        return to;
    }

    // rows[from] < at < rows[to], so both neighbours exist inside the range
    let right = from + rows[from..=to].partition_point(|row| row.timestamp() < at);
    if rows[right].timestamp() == at {
        return right;
    }
    let left = right - 1;
    let before = at - rows[left].timestamp();
    let after = rows[right].timestamp() - at;
    if before < after {
        left
    } else {
        right
    }
}

#[derive(Clone, Copy, Debug)]
struct Cursor {
    at: DateTime<FixedOffset>,
    rate: Option<u32>,
}

/// Sorted heart-rate series with a lookup cursor and match counters.
#[derive(Debug)]
pub struct HeartRateIndex<S = BinarySearch> {
    rows: Vec<HeartRateRow>,
    search: S,
    window: TimeDelta,
    last_index: usize,
    cursor: Option<Cursor>,
    succeeded: u64,
    failed: u64,
}

impl HeartRateIndex<BinarySearch> {
    pub fn new(rows: Vec<HeartRateRow>) -> Result<Self, HrError> {
        Self::with_search(rows, BinarySearch)
    }
}

impl<S: ClosestSearch> HeartRateIndex<S> {
    pub fn with_search(mut rows: Vec<HeartRateRow>, search: S) -> Result<Self, HrError> {
        if rows.is_empty() {
            return Err(HrError::Configuration(
                "no records in the heart-rate input".into(),
            ));
        }
        rows.sort_by_key(|row| (row.timestamp(), row.rate(), row.rate_zone()));
        debug!(
            rows = rows.len(),
            first = %rows[0].timestamp(),
            last = %rows[rows.len() - 1].timestamp(),
            "built heart-rate index"
        );
        let last_index = rows.len() - 1;
        Ok(Self {
            rows,
            search,
            window: TimeDelta::seconds(i64::from(crate::DEFAULT_ACCEPTANCE_WINDOW_S)),
            last_index,
            cursor: None,
            succeeded: 0,
            failed: 0,
        })
    }

    pub fn with_acceptance_window(mut self, window: TimeDelta) -> Self {
        self.window = window;
        self
    }

    pub fn rows(&self) -> &[HeartRateRow] {
        &self.rows
    }

    pub fn search(&self) -> &S {
        &self.search
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }

    /// Rows sharing a timestamp always answer with the first of them, whatever
    /// range the search was narrowed to.
    fn first_of_run(&self, mut index: usize) -> usize {
        let at = self.rows[index].timestamp();
        while index > 0 && self.rows[index - 1].timestamp() == at {
            index -= 1;
        }
        index
    }

    /// Heart rate of the sample nearest to `at`, if it lies inside the
    /// acceptance window.
    ///
    /// Repeating the previous timestamp returns the previous answer without
    /// searching or counting again.
    pub fn lookup(&mut self, at: DateTime<FixedOffset>) -> Option<u32> {
        let (from, to) = match self.cursor {
            Some(cursor) if cursor.at == at => return cursor.rate,
            Some(cursor) if at > cursor.at => (self.last_index, self.rows.len() - 1),
            Some(_) => (0, self.last_index),
            None => (0, self.rows.len() - 1),
        };
        trace!(from, to, %at, "searching heart-rate rows");

        let found = self.search.closest(&self.rows, from, to, at);
        let closest = self.first_of_run(found);
        self.last_index = closest;

        let row = &self.rows[closest];
        let rate = if (row.timestamp() - at).abs() <= self.window {
            self.succeeded += 1;
            Some(row.rate())
        } else {
            self.failed += 1;
            None
        };
        self.cursor = Some(Cursor { at, rate });
        rate
    }
}
