//! Data source resolution.
//!
//! Turns the `DataSourceSpec`s of a definition into one `SeriesFrame` for a
//! single entity:
//!
//! - One fetch per data source, never per column
//! - Aliases apply after retrieval
//! - Sources are outer-joined on date; gaps are missing
//! - A requested column the source lacks becomes an all-missing sequence
//! - The same visible name may come from several specs only if they point
//!   at the same table, column and filters

use crate::domain::definition::{DataSourceSpec, FilterValue};
use crate::domain::error::ResolveError;
use crate::domain::series::{DateRange, SeriesFrame, MISSING};
use crate::ports::source_port::{RowSet, SourceQuery, TimeSeriesSource};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};

type Origin<'a> = (&'a str, &'a str, &'a BTreeMap<String, FilterValue>);

pub fn query_for(spec: &DataSourceSpec, entity_id: &str, range: DateRange) -> SourceQuery {
    SourceQuery {
        table: spec.table.clone(),
        id_column: spec.id_column.clone(),
        date_column: spec.date_column.clone(),
        entity_id: entity_id.to_string(),
        range,
        columns: spec.columns.clone(),
        conditions: spec.conditions.clone(),
    }
}

pub fn resolve(
    source: &dyn TimeSeriesSource,
    specs: &[DataSourceSpec],
    entity_id: &str,
    range: DateRange,
) -> Result<SeriesFrame, ResolveError> {
    let fetched = specs
        .iter()
        .map(|spec| {
            let rows = source.fetch(&query_for(spec, entity_id, range))?;
            tracing::debug!(
                entity = entity_id,
                table = %spec.table,
                rows = rows.len(),
                "fetched source rows"
            );
            Ok((spec, rows))
        })
        .collect::<Result<Vec<(&DataSourceSpec, RowSet)>, ResolveError>>()?;

    let index: Vec<NaiveDate> = fetched
        .iter()
        .flat_map(|(_, rows)| rows.dates.iter().copied())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut frame = SeriesFrame::new(index);
    let mut origins: BTreeMap<&str, Origin<'_>> = BTreeMap::new();

    for (spec, rows) in &fetched {
        for (visible, column) in spec.exposed_columns() {
            let origin = (spec.table.as_str(), column, &spec.conditions);
            if let Some(existing) = origins.get(visible) {
                if *existing == origin {
                    continue;
                }
                return Err(ResolveError::AliasCollision {
                    name: visible.to_string(),
                });
            }
            origins.insert(visible, origin);

            let values = match rows.columns.get(column) {
                Some(values) => align(frame.index(), &rows.dates, values),
                None => {
                    tracing::debug!(
                        entity = entity_id,
                        table = %spec.table,
                        column,
                        "column absent from source, filling with missing values"
                    );
                    vec![MISSING; frame.len()]
                }
            };
            frame.insert(visible, values);
        }
    }

    Ok(frame)
}

/// Spread `values` (keyed by ascending `dates`) over the union `index`.
fn align(index: &[NaiveDate], dates: &[NaiveDate], values: &[f64]) -> Vec<f64> {
    let mut out = vec![MISSING; index.len()];
    for (date, value) in dates.iter().zip(values) {
        if let Ok(pos) = index.binary_search(date) {
            out[pos] = *value;
        }
    }
    out
}
