//! CSV file time-series source.
//!
//! Each table is `<base>/<table>.csv` with a header row naming its columns.
//! Dates are `YYYY-MM-DD` or `YYYYMMDD`; non-numeric cells read as missing.

use crate::domain::definition::FilterValue;
use crate::domain::error::SourceError;
use crate::ports::source_port::{RowSet, SourceQuery, TimeSeriesSource};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn csv_path(&self, table: &str) -> PathBuf {
        self.base_path.join(format!("{table}.csv"))
    }

    /// Open `table`, or `None` if the file does not exist.
    fn open(&self, table: &str) -> Result<Option<csv::Reader<std::fs::File>>, SourceError> {
        let path = self.csv_path(table);
        if !path.is_file() {
            return Ok(None);
        }
        csv::Reader::from_path(&path)
            .map(Some)
            .map_err(|e| source_error(table, format!("failed to open {}: {e}", path.display())))
    }
}

fn source_error(table: &str, reason: impl Into<String>) -> SourceError {
    SourceError {
        table: table.to_string(),
        reason: reason.into(),
    }
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y%m%d"))
        .ok()
}

fn parse_number(s: &str) -> f64 {
    s.trim().parse::<f64>().unwrap_or(f64::NAN)
}

fn matches_filter(cell: &str, expected: &FilterValue) -> bool {
    let cell = cell.trim();
    match expected {
        FilterValue::Text(s) => cell == s,
        FilterValue::Number(n) => cell.parse::<f64>().is_ok_and(|v| v == *n),
        FilterValue::Bool(b) => match cell.to_lowercase().as_str() {
            "true" | "1" => *b,
            "false" | "0" => !*b,
            _ => false,
        },
    }
}

impl TimeSeriesSource for CsvAdapter {
    fn fetch(&self, query: &SourceQuery) -> Result<RowSet, SourceError> {
        let table = query.table.as_str();
        let Some(mut rdr) = self.open(table)? else {
            tracing::debug!(table, "csv table not found");
            return Ok(RowSet::default());
        };

        let headers = rdr
            .headers()
            .map_err(|e| source_error(table, format!("CSV header error: {e}")))?
            .clone();
        let position = |name: &str| headers.iter().position(|h| h.trim() == name);

        let id_idx = position(&query.id_column)
            .ok_or_else(|| source_error(table, format!("missing id column '{}'", query.id_column)))?;
        let date_idx = position(&query.date_column).ok_or_else(|| {
            source_error(table, format!("missing date column '{}'", query.date_column))
        })?;

        let mut filters = Vec::new();
        for (column, expected) in &query.conditions {
            match position(column) {
                Some(idx) => filters.push((idx, expected)),
                // A filter on a column the table lacks matches nothing.
                None => return Ok(RowSet::default()),
            }
        }

        let wanted: Vec<(&str, usize)> = query
            .columns
            .iter()
            .filter_map(|c| position(c).map(|idx| (c.as_str(), idx)))
            .collect();

        let mut by_date: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
        for result in rdr.records() {
            let record = result.map_err(|e| source_error(table, format!("CSV parse error: {e}")))?;
            if record.get(id_idx).map(str::trim) != Some(query.entity_id.as_str()) {
                continue;
            }
            let Some(date) = record.get(date_idx).and_then(parse_date) else {
                continue;
            };
            if !query.range.contains(date) {
                continue;
            }
            if !filters
                .iter()
                .all(|(idx, expected)| record.get(*idx).is_some_and(|cell| matches_filter(cell, expected)))
            {
                continue;
            }
            let values = wanted
                .iter()
                .map(|(_, idx)| record.get(*idx).map(parse_number).unwrap_or(f64::NAN))
                .collect();
            by_date.insert(date, values);
        }

        let mut rows = RowSet {
            dates: by_date.keys().copied().collect(),
            columns: BTreeMap::new(),
        };
        for (i, (name, _)) in wanted.iter().enumerate() {
            let column = by_date.values().map(|values| values[i]).collect();
            rows.columns.insert(name.to_string(), column);
        }
        Ok(rows)
    }

    fn list_entities(&self, table: &str, id_column: &str) -> Result<Vec<String>, SourceError> {
        let Some(mut rdr) = self.open(table)? else {
            return Ok(vec![]);
        };
        let headers = rdr
            .headers()
            .map_err(|e| source_error(table, format!("CSV header error: {e}")))?
            .clone();
        let id_idx = headers
            .iter()
            .position(|h| h.trim() == id_column)
            .ok_or_else(|| source_error(table, format!("missing id column '{id_column}'")))?;

        let mut ids = BTreeSet::new();
        for result in rdr.records() {
            let record = result.map_err(|e| source_error(table, format!("CSV parse error: {e}")))?;
            if let Some(id) = record.get(id_idx).map(str::trim).filter(|s| !s.is_empty()) {
                ids.insert(id.to_string());
            }
        }
        Ok(ids.into_iter().collect())
    }
}
