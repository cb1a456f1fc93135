//! SQLite source and sink adapter.
//!
//! - Source: one parameterised SELECT per fetch, restricted to the requested
//!   columns the table actually has
//! - Sink: creates the table and missing columns on demand, then upserts with
//!   `ON CONFLICT ... DO UPDATE`
//!
//! Identifiers cannot be bound as parameters, so every table and column name
//! is checked against `[A-Za-z_][A-Za-z0-9_]*` before it is quoted into SQL.

use crate::adapters::csv_adapter::parse_date;
use crate::domain::definition::FilterValue;
use crate::domain::error::{SinkError, SourceError};
use crate::ports::sink_port::{Cell, ResultSink, Row};
use crate::ports::source_port::{RowSet, SourceQuery, TimeSeriesSource};
use chrono::NaiveDate;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Value as SqlValue;
use rusqlite::Connection;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

pub struct SqliteAdapter {
    pool: Pool<SqliteConnectionManager>,
    write_lock: Mutex<()>,
}

impl SqliteAdapter {
    pub fn open(path: impl AsRef<Path>, pool_size: u32) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let manager = SqliteConnectionManager::file(path).with_init(|conn| conn.busy_timeout(BUSY_TIMEOUT));
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .build(manager)
            .map_err(|e: r2d2::Error| SourceError {
                table: path.display().to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            pool,
            write_lock: Mutex::new(()),
        })
    }

    /// A private in-memory database. Limited to one connection so every
    /// caller sees the same data.
    pub fn in_memory() -> Result<Self, SourceError> {
        let pool = Pool::builder()
            .max_size(1)
            .build(SqliteConnectionManager::memory())
            .map_err(|e: r2d2::Error| SourceError {
                table: ":memory:".into(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            pool,
            write_lock: Mutex::new(()),
        })
    }

    fn connection(&self, table: &str) -> Result<PooledConnection<SqliteConnectionManager>, String> {
        self.pool
            .get()
            .map_err(|e: r2d2::Error| format!("connection pool: {e} (table {table})"))
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn check_identifiers<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<(), String> {
    for name in names {
        if !is_identifier(name) {
            return Err(format!("invalid identifier '{name}'"));
        }
    }
    Ok(())
}

fn quote(name: &str) -> String {
    format!("\"{name}\"")
}

/// Column names of `table`; empty when the table does not exist.
fn table_columns(conn: &Connection, table: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote(table)))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}

fn filter_param(value: &FilterValue) -> SqlValue {
    match value {
        FilterValue::Bool(b) => SqlValue::Integer(i64::from(*b)),
        FilterValue::Number(n) => SqlValue::Real(*n),
        FilterValue::Text(s) => SqlValue::Text(s.clone()),
    }
}

fn to_number(value: SqlValue) -> f64 {
    match value {
        SqlValue::Integer(i) => i as f64,
        SqlValue::Real(r) => r,
        SqlValue::Text(s) => s.trim().parse().unwrap_or(f64::NAN),
        SqlValue::Null | SqlValue::Blob(_) => f64::NAN,
    }
}

fn to_date(value: SqlValue) -> Option<NaiveDate> {
    match value {
        SqlValue::Text(s) => parse_date(&s),
        SqlValue::Integer(i) => parse_date(&i.to_string()),
        _ => None,
    }
}

impl TimeSeriesSource for SqliteAdapter {
    fn fetch(&self, query: &SourceQuery) -> Result<RowSet, SourceError> {
        let table = query.table.as_str();
        let err = |reason: String| SourceError {
            table: table.to_string(),
            reason,
        };

        check_identifiers(
            [table, query.id_column.as_str(), query.date_column.as_str()]
                .into_iter()
                .chain(query.columns.iter().map(String::as_str))
                .chain(query.conditions.keys().map(String::as_str)),
        )
        .map_err(err)?;

        let conn = self.connection(table).map_err(err)?;
        let existing: BTreeSet<String> = table_columns(&conn, table)
            .map_err(|e| err(e.to_string()))?
            .into_iter()
            .collect();
        if existing.is_empty() {
            tracing::debug!(table, "sqlite table not found");
            return Ok(RowSet::default());
        }
        for key in [&query.id_column, &query.date_column] {
            if !existing.contains(key) {
                return Err(err(format!("missing key column '{key}'")));
            }
        }
        if query.conditions.keys().any(|c| !existing.contains(c)) {
            return Ok(RowSet::default());
        }

        let wanted: Vec<&str> = query
            .columns
            .iter()
            .map(String::as_str)
            .filter(|c| existing.contains(*c))
            .collect();

        let mut select = vec![quote(&query.date_column)];
        select.extend(wanted.iter().map(|c| quote(c)));
        let mut sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1",
            select.join(", "),
            quote(table),
            quote(&query.id_column)
        );
        let mut params = vec![SqlValue::Text(query.entity_id.clone())];
        for (column, value) in &query.conditions {
            params.push(filter_param(value));
            sql.push_str(&format!(" AND {} = ?{}", quote(column), params.len()));
        }

        let mut stmt = conn.prepare(&sql).map_err(|e| err(e.to_string()))?;
        let mut rows = stmt
            .query(rusqlite::params_from_iter(params))
            .map_err(|e| err(e.to_string()))?;

        let mut by_date: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
        while let Some(row) = rows.next().map_err(|e| err(e.to_string()))? {
            let Some(date) = to_date(row.get::<_, SqlValue>(0).map_err(|e| err(e.to_string()))?) else {
                continue;
            };
            if !query.range.contains(date) {
                continue;
            }
            let mut values = Vec::with_capacity(wanted.len());
            for i in 0..wanted.len() {
                let value: SqlValue = row.get(i + 1).map_err(|e| err(e.to_string()))?;
                values.push(to_number(value));
            }
            by_date.insert(date, values);
        }

        let mut result = RowSet {
            dates: by_date.keys().copied().collect(),
            columns: BTreeMap::new(),
        };
        for (i, name) in wanted.iter().enumerate() {
            result
                .columns
                .insert(name.to_string(), by_date.values().map(|v| v[i]).collect());
        }
        Ok(result)
    }

    fn list_entities(&self, table: &str, id_column: &str) -> Result<Vec<String>, SourceError> {
        let err = |reason: String| SourceError {
            table: table.to_string(),
            reason,
        };
        check_identifiers([table, id_column]).map_err(err)?;
        let conn = self.connection(table).map_err(err)?;
        if table_columns(&conn, table).map_err(|e| err(e.to_string()))?.is_empty() {
            return Ok(vec![]);
        }
        let sql = format!(
            "SELECT DISTINCT CAST({id} AS TEXT) FROM {table} WHERE {id} IS NOT NULL ORDER BY 1",
            id = quote(id_column),
            table = quote(table)
        );
        let mut stmt = conn.prepare(&sql).map_err(|e| err(e.to_string()))?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| err(e.to_string()))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| err(e.to_string()))?;
        Ok(ids)
    }
}

fn cell_param(cell: &Cell) -> SqlValue {
    match cell {
        Cell::Text(s) => SqlValue::Text(s.clone()),
        Cell::Date(d) => SqlValue::Text(d.format("%Y-%m-%d").to_string()),
        Cell::Number(Some(v)) => SqlValue::Real(*v),
        Cell::Number(None) => SqlValue::Null,
    }
}

fn sql_type(cell: &Cell) -> &'static str {
    match cell {
        Cell::Text(_) | Cell::Date(_) => "TEXT",
        Cell::Number(_) => "REAL",
    }
}

fn upsert_rows(conn: &mut Connection, table: &str, keys: &[&str], rows: &[Row]) -> rusqlite::Result<usize> {
    let mut columns: BTreeMap<&str, &'static str> = BTreeMap::new();
    for row in rows {
        for (name, cell) in row {
            columns.entry(name.as_str()).or_insert(sql_type(cell));
        }
    }

    let tx = conn.transaction()?;

    let existing: BTreeSet<String> = table_columns(&tx, table)?.into_iter().collect();
    if existing.is_empty() {
        let mut defs: Vec<String> = keys
            .iter()
            .map(|k| format!("{} {} NOT NULL", quote(k), columns.get(k).copied().unwrap_or("TEXT")))
            .collect();
        defs.extend(
            columns
                .iter()
                .filter(|(name, _)| !keys.contains(*name))
                .map(|(name, ty)| format!("{} {ty}", quote(name))),
        );
        let primary: Vec<String> = keys.iter().map(|k| quote(k)).collect();
        tx.execute_batch(&format!(
            "CREATE TABLE {} ({}, PRIMARY KEY ({}))",
            quote(table),
            defs.join(", "),
            primary.join(", ")
        ))?;
        tracing::info!(table, columns = columns.len(), "created sink table");
    } else {
        for (name, ty) in columns.iter().filter(|(name, _)| !existing.contains(**name)) {
            tx.execute_batch(&format!(
                "ALTER TABLE {} ADD COLUMN {} {ty}",
                quote(table),
                quote(name)
            ))?;
            tracing::info!(table, column = *name, "added sink column");
        }
    }

    let conflict: Vec<String> = keys.iter().map(|k| quote(k)).collect();
    for row in rows {
        let names: Vec<&str> = row.keys().map(String::as_str).collect();
        let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{i}")).collect();
        let updates: Vec<String> = names
            .iter()
            .filter(|n| !keys.contains(*n))
            .map(|n| format!("{q} = excluded.{q}", q = quote(n)))
            .collect();
        let action = if updates.is_empty() {
            "NOTHING".to_string()
        } else {
            format!("UPDATE SET {}", updates.join(", "))
        };
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) DO {action}",
            quote(table),
            names.iter().map(|n| quote(n)).collect::<Vec<_>>().join(", "),
            placeholders.join(", "),
            conflict.join(", ")
        );
        let mut stmt = tx.prepare_cached(&sql)?;
        stmt.execute(rusqlite::params_from_iter(row.values().map(cell_param)))?;
    }

    tx.commit()?;
    Ok(rows.len())
}

impl ResultSink for SqliteAdapter {
    fn upsert(&self, table: &str, key_columns: &[&str], rows: &[Row]) -> Result<usize, SinkError> {
        let err = |reason: String| SinkError {
            table: table.to_string(),
            reason,
        };
        if rows.is_empty() {
            return Ok(0);
        }
        if key_columns.is_empty() {
            return Err(err("at least one key column is required".into()));
        }
        check_identifiers(
            std::iter::once(table)
                .chain(key_columns.iter().copied())
                .chain(rows.iter().flat_map(|r| r.keys().map(String::as_str))),
        )
        .map_err(err)?;
        if let Some(row) = rows.iter().find(|r| key_columns.iter().any(|k| !r.contains_key(*k))) {
            return Err(err(format!(
                "row is missing a key column, has {:?}",
                row.keys().collect::<Vec<_>>()
            )));
        }

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut conn = self.connection(table).map_err(err)?;
        let written = upsert_rows(&mut conn, table, key_columns, rows).map_err(|e| err(e.to_string()))?;
        tracing::debug!(table, rows = written, "sink upsert");
        Ok(written)
    }
}
