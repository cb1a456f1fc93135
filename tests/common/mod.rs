#![allow(dead_code)]

use chrono::{Duration, NaiveDate};
use indicalc::domain::definition::IndicatorDefinition;
use indicalc::domain::definition_store::DefinitionIndex;
use indicalc::domain::error::{SinkError, SourceError};
use indicalc::ports::sink_port::{ResultSink, Row};
use indicalc::ports::source_port::{RowSet, SourceQuery, TimeSeriesSource};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Consecutive calendar days starting at `start`.
pub fn days(start: NaiveDate, count: usize) -> Vec<NaiveDate> {
    (0..count).map(|i| start + Duration::days(i as i64)).collect()
}

/// A smooth oscillating close that produces both crossings and RSI extremes.
pub fn wave(count: usize) -> Vec<f64> {
    (0..count)
        .map(|i| 100.0 + 12.0 * (i as f64 / 9.0).sin() + 0.05 * i as f64)
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct MockTable {
    pub dates: Vec<NaiveDate>,
    pub columns: BTreeMap<String, Vec<f64>>,
}

impl MockTable {
    pub fn new(dates: Vec<NaiveDate>) -> Self {
        Self {
            dates,
            columns: BTreeMap::new(),
        }
    }

    pub fn with_column(mut self, name: &str, values: Vec<f64>) -> Self {
        assert_eq!(values.len(), self.dates.len());
        self.columns.insert(name.to_string(), values);
        self
    }
}

/// In-memory source keyed by (table, entity id).
#[derive(Default)]
pub struct MockSource {
    pub tables: HashMap<(String, String), MockTable>,
    pub errors: HashMap<String, String>,
    pub fetches: AtomicUsize,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: &str, entity: &str, data: MockTable) -> Self {
        self.tables.insert((table.to_string(), entity.to_string()), data);
        self
    }

    /// Every fetch for `entity` fails with `reason`.
    pub fn with_error(mut self, entity: &str, reason: &str) -> Self {
        self.errors.insert(entity.to_string(), reason.to_string());
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl TimeSeriesSource for MockSource {
    fn fetch(&self, query: &SourceQuery) -> Result<RowSet, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.errors.get(&query.entity_id) {
            return Err(SourceError {
                table: query.table.clone(),
                reason: reason.clone(),
            });
        }
        let Some(table) = self
            .tables
            .get(&(query.table.clone(), query.entity_id.clone()))
        else {
            return Ok(RowSet::default());
        };

        let keep: Vec<usize> = (0..table.dates.len())
            .filter(|&i| query.range.contains(table.dates[i]))
            .collect();
        let dates = keep.iter().map(|&i| table.dates[i]).collect();
        let columns = query
            .columns
            .iter()
            .filter_map(|c| {
                table
                    .columns
                    .get(c)
                    .map(|values| (c.clone(), keep.iter().map(|&i| values[i]).collect()))
            })
            .collect();
        Ok(RowSet { dates, columns })
    }

    fn list_entities(&self, table: &str, _id_column: &str) -> Result<Vec<String>, SourceError> {
        let mut ids: Vec<String> = self
            .tables
            .keys()
            .filter(|(t, _)| t == table)
            .map(|(_, id)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

/// Collects every upserted row; optionally refuses writes to one table.
#[derive(Default)]
pub struct MockSink {
    pub rows: Mutex<Vec<(String, Row)>>,
    pub fail_table: Option<String>,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(table: &str) -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            fail_table: Some(table.to_string()),
        }
    }

    pub fn rows_for(&self, table: &str) -> Vec<Row> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == table)
            .map(|(_, r)| r.clone())
            .collect()
    }
}

impl ResultSink for MockSink {
    fn upsert(&self, table: &str, _key_columns: &[&str], rows: &[Row]) -> Result<usize, SinkError> {
        if self.fail_table.as_deref() == Some(table) {
            return Err(SinkError {
                table: table.to_string(),
                reason: "write refused".to_string(),
            });
        }
        let mut stored = self.rows.lock().unwrap();
        stored.extend(rows.iter().map(|r| (table.to_string(), r.clone())));
        Ok(rows.len())
    }
}

pub fn index_of(docs: &[&str]) -> Arc<DefinitionIndex> {
    Arc::new(DefinitionIndex::from_definitions(
        docs.iter().map(|d| IndicatorDefinition::from_json(d).unwrap()),
    ))
}

/// Write `docs` as `<root>/<entity_type>/<file>`.
pub fn write_definitions(root: &Path, docs: &[(&str, &str, &str)]) {
    for (entity_type, file, body) in docs {
        let dir = root.join(entity_type);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(file), body).unwrap();
    }
}

pub const GOLDEN_CROSS: &str = r#"{
    "name": "golden_cross",
    "entity_type": "stock",
    "description": "SMA5 crossing above SMA20",
    "data_sources": [{"table": "stock_daily", "columns": ["close"]}],
    "calculation": {
        "type": "crossover",
        "series1": {"type": "function", "function": "sma", "args": ["close", 5]},
        "series2": {"type": "function", "function": "sma", "args": ["close", 20]}
    },
    "output": {"table": "stock_signals", "column": "golden_cross"},
    "post_processing": {"dtype": "int", "fill_na": 0}
}"#;

pub const RSI_SIGNALS: &str = r#"{
    "name": "rsi_signals",
    "entity_type": "stock",
    "description": "RSI14 oversold",
    "data_sources": [{"table": "stock_daily", "columns": ["close"]}],
    "calculation": "rsi(close, 14) < 30",
    "output": {"table": "stock_signals", "column": "rsi_oversold"},
    "post_processing": {"dtype": "bool", "fill_na": 0}
}"#;

/// `stock_daily` for one entity from 2022-10-01 through 2023-01-31.
pub fn daily_source(entity: &str) -> MockSource {
    let dates = days(date(2022, 10, 1), 123);
    let close = wave(dates.len());
    MockSource::new().with_table("stock_daily", entity, MockTable::new(dates).with_column("close", close))
}
