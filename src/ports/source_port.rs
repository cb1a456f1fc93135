//! Time-series source port trait.

use crate::domain::definition::FilterValue;
use crate::domain::error::SourceError;
use crate::domain::series::DateRange;
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// One fetch: rows of `table` for a single entity within a date range.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceQuery {
    pub table: String,
    pub id_column: String,
    pub date_column: String,
    pub entity_id: String,
    pub range: DateRange,
    pub columns: Vec<String>,
    pub conditions: BTreeMap<String, FilterValue>,
}

/// Rows returned by a fetch, column-major.
///
/// `dates` is ascending with no duplicates. A requested column the table does
/// not have is omitted from `columns`; every present column has one value per
/// date, `NaN` where the stored value is null or non-numeric.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub dates: Vec<NaiveDate>,
    pub columns: BTreeMap<String, Vec<f64>>,
}

impl RowSet {
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}

pub trait TimeSeriesSource: Send + Sync {
    fn fetch(&self, query: &SourceQuery) -> Result<RowSet, SourceError>;

    /// Distinct values of `id_column` in `table`.
    fn list_entities(&self, table: &str, id_column: &str) -> Result<Vec<String>, SourceError>;
}
