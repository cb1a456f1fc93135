//! Result sink port trait.

use crate::domain::error::SinkError;
use chrono::NaiveDate;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Date(NaiveDate),
    /// `None` is written as NULL.
    Number(Option<f64>),
}

impl Cell {
    /// A numeric cell, mapping `NaN` to NULL.
    pub fn number(v: f64) -> Self {
        if v.is_nan() {
            Cell::Number(None)
        } else {
            Cell::Number(Some(v))
        }
    }
}

/// Column name -> value for one output row.
pub type Row = BTreeMap<String, Cell>;

pub trait ResultSink: Send + Sync {
    /// Insert `rows` into `table`, replacing rows that share the values of
    /// `key_columns`. Columns absent from an existing row are left untouched.
    fn upsert(&self, table: &str, key_columns: &[&str], rows: &[Row]) -> Result<usize, SinkError>;
}
