//! Indicator definition validation.
//!
//! Checks a definition against the rest of the loaded set without evaluating
//! anything. Every problem is collected rather than stopping at the first.

use crate::domain::definition::IndicatorDefinition;
use crate::domain::error::EvalError;
use crate::domain::formula::FormulaRefs;
use crate::domain::function::FunctionLibrary;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    pub name: String,
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    fn from_errors(name: &str, errors: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            valid: errors.is_empty(),
            errors,
        }
    }

    pub fn unknown(name: &str) -> Self {
        Self::from_errors(name, vec![format!("indicator '{name}' is not defined")])
    }
}

/// Read access to the other definitions a definition may reference.
pub trait DefinitionLookup {
    fn definition(&self, name: &str) -> Option<&IndicatorDefinition>;
}

pub fn validate_definition(
    def: &IndicatorDefinition,
    others: &dyn DefinitionLookup,
    max_depth: usize,
) -> ValidationResult {
    let mut errors = Vec::new();

    validate_name(def, &mut errors);
    validate_sources(def, &mut errors);
    validate_output(def, &mut errors);
    let visible = validate_aliases(def, &mut errors);

    match def.calculation.references(max_depth) {
        Ok(refs) => {
            validate_references(&refs, &visible, others, &mut errors);
            if let Some(path) = find_cycle(&def.name, others, max_depth) {
                errors.push(EvalError::FormulaCycle { path }.to_string());
            }
        }
        Err(EvalError::Parse(e)) => {
            let text = def.calculation.to_string();
            errors.push(format!("calculation: {}", e.display_with_context(&text)));
        }
        Err(e) => errors.push(format!("calculation: {e}")),
    }

    if let Some(pp) = &def.post_processing {
        errors.extend(pp.problems().into_iter().map(|p| format!("post_processing: {p}")));
    }

    ValidationResult::from_errors(&def.name, errors)
}

fn validate_name(def: &IndicatorDefinition, errors: &mut Vec<String>) {
    if def.name.trim().is_empty() {
        errors.push("name must not be empty".to_string());
    }
}

fn validate_sources(def: &IndicatorDefinition, errors: &mut Vec<String>) {
    if def.data_sources.is_empty() {
        errors.push("data_sources must list at least one source".to_string());
    }
    for (i, source) in def.data_sources.iter().enumerate() {
        if source.table.trim().is_empty() {
            errors.push(format!("data_sources[{i}]: table is required"));
        }
        if source.columns.is_empty() {
            errors.push(format!("data_sources[{i}]: columns must not be empty"));
        }
        for column in source.aliases.keys() {
            if !source.columns.contains(column) {
                errors.push(format!(
                    "data_sources[{i}]: alias given for column '{column}' which is not requested"
                ));
            }
        }
    }
}

fn validate_output(def: &IndicatorDefinition, errors: &mut Vec<String>) {
    if def.sink_table().is_none() {
        errors.push("output.sink_table is required".to_string());
    }
    if def.sink_column().is_none() {
        errors.push("output.sink_column is required".to_string());
    }
}

/// Returns the names visible to the formula; reports names provided twice
/// by different origins.
fn validate_aliases(def: &IndicatorDefinition, errors: &mut Vec<String>) -> BTreeSet<String> {
    let mut origins: BTreeMap<&str, (&str, &str)> = BTreeMap::new();
    for source in &def.data_sources {
        for (visible, column) in source.exposed_columns() {
            let origin = (source.table.as_str(), column);
            match origins.get(visible) {
                Some(existing) if *existing != origin => errors.push(format!(
                    "sequence name '{visible}' is provided by both {}.{} and {}.{}",
                    existing.0, existing.1, origin.0, origin.1
                )),
                Some(_) => {}
                None => {
                    origins.insert(visible, origin);
                }
            }
        }
    }
    origins.keys().map(|k| k.to_string()).collect()
}

fn validate_references(
    refs: &FormulaRefs,
    visible: &BTreeSet<String>,
    others: &dyn DefinitionLookup,
    errors: &mut Vec<String>,
) {
    let library = FunctionLibrary::standard();
    for name in &refs.sequences {
        if !visible.contains(name) {
            errors.push(format!(
                "calculation references undefined sequence '{name}'"
            ));
        }
    }
    for name in &refs.functions {
        if !library.contains(name) {
            errors.push(format!("calculation calls unknown function '{name}'"));
        }
    }
    for name in &refs.indicators {
        if others.definition(name).is_none() {
            errors.push(format!("calculation references unknown indicator '{name}'"));
        }
    }
}

/// Depth-first search over indicator references starting at `start`.
///
/// Returns the first cycle found as a path that begins and ends with the
/// repeated name.
pub fn find_cycle(start: &str, others: &dyn DefinitionLookup, max_depth: usize) -> Option<Vec<String>> {
    fn visit(
        name: &str,
        others: &dyn DefinitionLookup,
        max_depth: usize,
        path: &mut Vec<String>,
        done: &mut BTreeSet<String>,
    ) -> Option<Vec<String>> {
        if let Some(pos) = path.iter().position(|p| p == name) {
            let mut cycle = path[pos..].to_vec();
            cycle.push(name.to_string());
            return Some(cycle);
        }
        if done.contains(name) {
            return None;
        }
        let refs = others
            .definition(name)
            .and_then(|def| def.calculation.references(max_depth).ok())?;

        path.push(name.to_string());
        for next in &refs.indicators {
            if let Some(cycle) = visit(next, others, max_depth, path, done) {
                return Some(cycle);
            }
        }
        path.pop();
        done.insert(name.to_string());
        None
    }

    visit(start, others, max_depth, &mut Vec::new(), &mut BTreeSet::new())
}
