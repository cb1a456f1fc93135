//! Indicator definition store.
//!
//! Definitions live under a root directory, one JSON document per file,
//! grouped by entity type:
//!
//! ```text
//! definitions/
//!   common/   stock/   industry/   index/
//! ```
//!
//! - A document without `entity_type` takes the type of its directory
//! - Unreadable or malformed documents are logged and skipped
//! - On duplicate names the first file (in path order) wins
//! - `reload` builds a fresh index and swaps it in; readers holding a
//!   snapshot keep the old one until they drop it

use crate::domain::definition::{DataSourceSpec, IndicatorDefinition};
use crate::domain::definition_validation::{self, DefinitionLookup, ValidationResult};
use crate::domain::entity::EntityType;
use crate::domain::error::{DefinitionError, EngineError};
use crate::domain::formula::Formula;
use crate::domain::formula_eval::{IndicatorLookup, DEFAULT_MAX_DEPTH};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// An immutable set of loaded definitions.
#[derive(Debug, Default)]
pub struct DefinitionIndex {
    definitions: BTreeMap<String, Arc<IndicatorDefinition>>,
    origins: BTreeMap<String, PathBuf>,
    rejected: Vec<DefinitionError>,
}

impl DefinitionIndex {
    /// Build an index from in-memory definitions. Later duplicates are rejected.
    pub fn from_definitions(definitions: impl IntoIterator<Item = IndicatorDefinition>) -> Self {
        let mut index = Self::default();
        for def in definitions {
            index.add(def, PathBuf::from("<memory>"));
        }
        index
    }

    fn add(&mut self, def: IndicatorDefinition, path: PathBuf) {
        if self.definitions.contains_key(&def.name) {
            let err = DefinitionError::Duplicate {
                name: def.name.clone(),
                path: path.display().to_string(),
            };
            tracing::warn!(error = %err, "skipping duplicate definition");
            self.rejected.push(err);
            return;
        }
        self.origins.insert(def.name.clone(), path);
        self.definitions.insert(def.name.clone(), Arc::new(def));
    }

    fn reject(&mut self, err: DefinitionError) {
        tracing::warn!(error = %err, "skipping definition");
        self.rejected.push(err);
    }

    pub fn get(&self, name: &str) -> Option<Arc<IndicatorDefinition>> {
        self.definitions.get(name).cloned()
    }

    pub fn origin(&self, name: &str) -> Option<&Path> {
        self.origins.get(name).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(String::as_str)
    }

    pub fn all(&self) -> Vec<Arc<IndicatorDefinition>> {
        self.definitions.values().cloned().collect()
    }

    /// Documents that failed to load.
    pub fn rejected(&self) -> &[DefinitionError] {
        &self.rejected
    }

    /// Definitions whose applicable types include `entity_type`.
    ///
    /// For `Common`, only definitions declared as common are returned.
    pub fn list_by_entity_type(&self, entity_type: EntityType) -> Vec<Arc<IndicatorDefinition>> {
        self.definitions
            .values()
            .filter(|def| match entity_type {
                EntityType::Common => def.entity_type() == EntityType::Common,
                t => def.applies_to(t),
            })
            .cloned()
            .collect()
    }

    pub fn validate(&self, name: &str, max_depth: usize) -> ValidationResult {
        match self.definitions.get(name) {
            Some(def) => definition_validation::validate_definition(def, self, max_depth),
            None => ValidationResult::unknown(name),
        }
    }

    /// `name` followed by every indicator it references, transitively, each once.
    pub fn dependency_closure(&self, name: &str, max_depth: usize) -> Vec<Arc<IndicatorDefinition>> {
        let mut seen = BTreeSet::new();
        let mut pending = vec![name.to_string()];
        let mut out = Vec::new();
        while let Some(next) = pending.pop() {
            if !seen.insert(next.clone()) {
                continue;
            }
            let Some(def) = self.get(&next) else {
                continue;
            };
            if let Ok(refs) = def.calculation.references(max_depth) {
                pending.extend(refs.indicators.into_iter().rev());
            }
            out.push(def);
        }
        out
    }

    /// Data sources needed to evaluate `name`, including those of referenced
    /// indicators. Identical specs are listed once.
    pub fn required_sources(&self, name: &str, max_depth: usize) -> Vec<DataSourceSpec> {
        let mut sources: Vec<DataSourceSpec> = Vec::new();
        for def in self.dependency_closure(name, max_depth) {
            for source in &def.data_sources {
                if !sources.contains(source) {
                    sources.push(source.clone());
                }
            }
        }
        sources
    }
}

impl IndicatorLookup for DefinitionIndex {
    fn formula(&self, name: &str) -> Option<&Formula> {
        self.definitions.get(name).map(|def| &def.calculation)
    }
}

impl DefinitionLookup for DefinitionIndex {
    fn definition(&self, name: &str) -> Option<&IndicatorDefinition> {
        self.definitions.get(name).map(Arc::as_ref)
    }
}

/// Directory-backed definition store with copy-and-swap reload.
#[derive(Debug)]
pub struct DefinitionStore {
    root: PathBuf,
    max_depth: usize,
    current: RwLock<Arc<DefinitionIndex>>,
}

impl DefinitionStore {
    pub fn load(root: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let root = root.into();
        let index = scan(&root)?;
        Ok(Self {
            root,
            max_depth: DEFAULT_MAX_DEPTH,
            current: RwLock::new(Arc::new(index)),
        })
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The current index. Stays valid across later reloads.
    pub fn snapshot(&self) -> Arc<DefinitionIndex> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Rescan the root directory and swap the new index in.
    ///
    /// On failure the previous index stays in place.
    pub fn reload(&self) -> Result<usize, EngineError> {
        let index = Arc::new(scan(&self.root)?);
        let count = index.len();
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = index;
        tracing::info!(root = %self.root.display(), count, "definitions reloaded");
        Ok(count)
    }

    pub fn get(&self, name: &str) -> Option<Arc<IndicatorDefinition>> {
        self.snapshot().get(name)
    }

    pub fn list_by_entity_type(&self, entity_type: EntityType) -> Vec<Arc<IndicatorDefinition>> {
        self.snapshot().list_by_entity_type(entity_type)
    }

    pub fn validate(&self, name: &str) -> ValidationResult {
        self.snapshot().validate(name, self.max_depth)
    }
}

fn scan(root: &Path) -> Result<DefinitionIndex, EngineError> {
    if !root.is_dir() {
        return Err(EngineError::StoreLoad {
            path: root.display().to_string(),
            reason: "not a directory".to_string(),
        });
    }

    let mut index = DefinitionIndex::default();
    for entity_type in EntityType::ALL {
        let dir = root.join(entity_type.as_str());
        if !dir.is_dir() {
            continue;
        }
        let entries = std::fs::read_dir(&dir).map_err(|e| EngineError::StoreLoad {
            path: dir.display().to_string(),
            reason: e.to_string(),
        })?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();

        for path in files {
            match read_definition(&path) {
                Ok(mut def) => {
                    if def.entity_type.is_none() {
                        def.entity_type = Some(entity_type);
                    }
                    index.add(def, path);
                }
                Err(err) => index.reject(err),
            }
        }
    }

    tracing::info!(
        root = %root.display(),
        loaded = index.len(),
        rejected = index.rejected.len(),
        "definitions loaded"
    );
    Ok(index)
}

fn read_definition(path: &Path) -> Result<IndicatorDefinition, DefinitionError> {
    let text = std::fs::read_to_string(path).map_err(|source| DefinitionError::Read {
        path: path.display().to_string(),
        source,
    })?;
    IndicatorDefinition::from_json(&text).map_err(|e| DefinitionError::Parse {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}
