//! Indicator definition documents.
//!
//! One JSON document per indicator:
//!
//! ```json
//! {
//!   "name": "golden_cross",
//!   "entity_type": "stock",
//!   "data_sources": [{"table": "stock_daily", "columns": ["close"]}],
//!   "calculation": "crossover(sma(close, 5), sma(close, 20))",
//!   "output": {"table": "stock_signals", "column": "golden_cross"},
//!   "post_processing": {"dtype": "int", "fill_na": 0}
//! }
//! ```
//!
//! `entity_type` may be omitted; the store fills it from the directory the
//! document was loaded from.

use crate::domain::entity::EntityType;
use crate::domain::formula::Formula;
use crate::domain::post_process::PostProcessingSpec;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;

pub const DEFAULT_ID_COLUMN: &str = "code";
pub const DEFAULT_DATE_COLUMN: &str = "trade_date";

fn default_id_column() -> String {
    DEFAULT_ID_COLUMN.to_string()
}

fn default_date_column() -> String {
    DEFAULT_DATE_COLUMN.to_string()
}

/// Equality filter value applied when fetching a source table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::Bool(b) => write!(f, "{b}"),
            FilterValue::Number(n) => write!(f, "{n}"),
            FilterValue::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DataSourceSpec {
    #[serde(default)]
    pub table: String,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default = "default_id_column")]
    pub id_column: String,
    #[serde(default = "default_date_column")]
    pub date_column: String,
    #[serde(default)]
    pub conditions: BTreeMap<String, FilterValue>,
    /// Source column -> name visible to the formula.
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
}

impl DataSourceSpec {
    /// `(visible name, source column)` for every requested column, in order.
    pub fn exposed_columns(&self) -> impl Iterator<Item = (&str, &str)> {
        self.columns.iter().map(|column| {
            let visible = self
                .aliases
                .get(column)
                .map(String::as_str)
                .unwrap_or(column.as_str());
            (visible, column.as_str())
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OutputSpec {
    #[serde(default, alias = "table")]
    pub sink_table: Option<String>,
    #[serde(default, alias = "column")]
    pub sink_column: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IndicatorDefinition {
    pub name: String,
    #[serde(default)]
    pub entity_type: Option<EntityType>,
    #[serde(default)]
    pub applicable_entities: Vec<EntityType>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub data_sources: Vec<DataSourceSpec>,
    pub calculation: Formula,
    #[serde(default)]
    pub output: OutputSpec,
    #[serde(default)]
    pub post_processing: Option<PostProcessingSpec>,
    #[serde(default)]
    pub lookback_days: Option<u32>,
}

impl IndicatorDefinition {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type.unwrap_or(EntityType::Common)
    }

    /// Concrete entity types this indicator runs against.
    ///
    /// Defaults to the definition's own type, or to every concrete type for
    /// `common`. An explicit `common` entry also expands to every concrete type.
    pub fn applicable(&self) -> Vec<EntityType> {
        let declared = if self.applicable_entities.is_empty() {
            vec![self.entity_type()]
        } else {
            self.applicable_entities.clone()
        };
        let mut out: Vec<EntityType> = Vec::new();
        for entity_type in declared {
            let expanded: &[EntityType] = match entity_type {
                EntityType::Common => &EntityType::CONCRETE,
                ref t => std::slice::from_ref(t),
            };
            for t in expanded {
                if !out.contains(t) {
                    out.push(*t);
                }
            }
        }
        out.sort();
        out
    }

    pub fn applies_to(&self, entity_type: EntityType) -> bool {
        self.applicable().contains(&entity_type)
    }

    pub fn sink_table(&self) -> Option<&str> {
        self.output.sink_table.as_deref().filter(|s| !s.trim().is_empty())
    }

    pub fn sink_column(&self) -> Option<&str> {
        self.output.sink_column.as_deref().filter(|s| !s.trim().is_empty())
    }
}
