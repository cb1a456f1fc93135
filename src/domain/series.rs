//! Date-indexed numeric sequences.
//!
//! Missing samples are encoded as `f64::NAN`; booleans as `1.0` / `0.0`.

use chrono::{Duration, NaiveDate};
use std::collections::BTreeMap;
use std::fmt;

pub const MISSING: f64 = f64::NAN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// The same range with `days` calendar days of warmup prepended.
    pub fn extend_back(&self, days: u32) -> Self {
        Self {
            start: self.start - Duration::days(i64::from(days)),
            end: self.end,
        }
    }

    /// Positions of `index` (ascending) that fall inside the range.
    pub fn bounds_in(&self, index: &[NaiveDate]) -> std::ops::Range<usize> {
        let lo = index.partition_point(|d| *d < self.start);
        let hi = index.partition_point(|d| *d <= self.end);
        lo..hi.max(lo)
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Named sequences sharing one ascending date index.
#[derive(Debug, Clone, Default)]
pub struct SeriesFrame {
    index: Vec<NaiveDate>,
    columns: BTreeMap<String, Vec<f64>>,
}

impl SeriesFrame {
    pub fn new(index: Vec<NaiveDate>) -> Self {
        Self {
            index,
            columns: BTreeMap::new(),
        }
    }

    pub fn index(&self) -> &[NaiveDate] {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Insert a column aligned to the index. Returns `false` if the name is taken.
    pub fn insert(&mut self, name: impl Into<String>, values: Vec<f64>) -> bool {
        debug_assert_eq!(values.len(), self.index.len());
        let name = name.into();
        if self.columns.contains_key(&name) {
            return false;
        }
        self.columns.insert(name, values);
        true
    }

    pub fn get(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(Vec::as_slice)
    }
}
