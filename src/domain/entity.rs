//! Entity types and the entity universe for a batch run.
//!
//! Parses entity filters from the command line and discovers entity ids per
//! type through the `TimeSeriesSource` port.

use crate::domain::error::SourceError;
use crate::ports::source_port::TimeSeriesSource;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Stock,
    Industry,
    Index,
    Common,
}

impl EntityType {
    /// Entity types that real entities belong to (`Common` is only a definition scope).
    pub const CONCRETE: [EntityType; 3] = [EntityType::Stock, EntityType::Industry, EntityType::Index];

    /// Definition directory names, in load order.
    pub const ALL: [EntityType; 4] = [
        EntityType::Common,
        EntityType::Stock,
        EntityType::Industry,
        EntityType::Index,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Stock => "stock",
            EntityType::Industry => "industry",
            EntityType::Index => "index",
            EntityType::Common => "common",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = EntityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "stock" => Ok(EntityType::Stock),
            "industry" => Ok(EntityType::Industry),
            "index" => Ok(EntityType::Index),
            "common" => Ok(EntityType::Common),
            other => Err(EntityError::UnknownType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EntityError {
    #[error("unknown entity type '{0}' (expected stock, industry, index or common)")]
    UnknownType(String),

    #[error("empty token in entity list")]
    EmptyToken,

    #[error("duplicate entity id: {0}")]
    DuplicateId(String),
}

/// Parse a comma-separated entity id list, rejecting empty tokens and duplicates.
pub fn parse_entity_ids(input: &str) -> Result<Vec<String>, EntityError> {
    let mut ids = Vec::new();
    let mut seen = HashSet::new();

    for token in input.split(',') {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return Err(EntityError::EmptyToken);
        }
        if !seen.insert(trimmed.to_string()) {
            return Err(EntityError::DuplicateId(trimmed.to_string()));
        }
        ids.push(trimmed.to_string());
    }

    Ok(ids)
}

/// Parse a comma-separated entity type list. `common` expands to every concrete type.
pub fn parse_entity_types(input: &str) -> Result<Vec<EntityType>, EntityError> {
    let mut types = BTreeSet::new();
    for token in input.split(',') {
        if token.trim().is_empty() {
            return Err(EntityError::EmptyToken);
        }
        match token.parse::<EntityType>()? {
            EntityType::Common => types.extend(EntityType::CONCRETE),
            t => {
                types.insert(t);
            }
        }
    }
    Ok(types.into_iter().collect())
}

/// Where the ids of one entity type are listed.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityTable {
    pub table: String,
    pub id_column: String,
}

/// Entity ids to compute for, grouped by concrete entity type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityUniverse {
    entities: BTreeMap<EntityType, Vec<String>>,
}

impl EntityUniverse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entity_type: EntityType, ids: Vec<String>) {
        if !ids.is_empty() {
            self.entities.entry(entity_type).or_default().extend(ids);
        }
    }

    pub fn get(&self, entity_type: EntityType) -> &[String] {
        self.entities
            .get(&entity_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn types(&self) -> impl Iterator<Item = EntityType> + '_ {
        self.entities.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.values().all(Vec::is_empty)
    }

    /// Number of distinct entity ids across all types.
    pub fn total_distinct(&self) -> usize {
        self.entities
            .values()
            .flatten()
            .collect::<HashSet<_>>()
            .len()
    }
}

/// Build the universe for `types`, preferring explicit `ids` over source discovery.
///
/// Explicit ids apply to every requested type. Types without an entity table
/// are left empty; a listing failure for one type is returned to the caller.
pub fn discover_universe(
    source: &dyn TimeSeriesSource,
    tables: &BTreeMap<EntityType, EntityTable>,
    types: &[EntityType],
    ids: &[String],
) -> Result<EntityUniverse, SourceError> {
    let mut universe = EntityUniverse::new();

    for &entity_type in types {
        if !ids.is_empty() {
            universe.insert(entity_type, ids.to_vec());
            continue;
        }
        let Some(table) = tables.get(&entity_type) else {
            tracing::debug!(entity_type = %entity_type, "no entity table configured");
            continue;
        };
        let mut listed = source.list_entities(&table.table, &table.id_column)?;
        listed.sort();
        listed.dedup();
        tracing::debug!(
            entity_type = %entity_type,
            table = %table.table,
            count = listed.len(),
            "discovered entities"
        );
        universe.insert(entity_type, listed);
    }

    Ok(universe)
}
