//! Typed run configuration.
//!
//! INI layout:
//!
//! ```ini
//! [definitions]
//! path = definitions
//!
//! [source]
//! kind = sqlite        ; or csv
//! path = market.db
//!
//! [sink]
//! kind = sqlite
//! path = signals.db
//!
//! [entities]
//! stock = stock_daily
//! index = index_daily
//! id_column = code
//!
//! [engine]
//! workers = 8
//! batch_size = 64
//! max_depth = 32
//! lookback_days = 60
//! task_timeout_secs = 0
//!
//! [logging]
//! level = info
//! format = pretty      ; or json
//! ```

use crate::domain::config_validation::validate_engine_config;
use crate::domain::definition::{DEFAULT_DATE_COLUMN, DEFAULT_ID_COLUMN};
use crate::domain::entity::{EntityTable, EntityType};
use crate::domain::error::EngineError;
use crate::domain::formula_eval::DEFAULT_MAX_DEPTH;
use crate::domain::orchestrator::{default_workers, RunOptions, DEFAULT_BATCH_SIZE, DEFAULT_LOOKBACK_DAYS};
use crate::ports::config_port::ConfigPort;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Csv,
    Sqlite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SinkConfig {
    pub path: PathBuf,
    pub id_column: String,
    pub date_column: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub definitions: Option<PathBuf>,
    pub source: SourceConfig,
    pub sink: Option<SinkConfig>,
    pub entity_tables: BTreeMap<EntityType, EntityTable>,
    pub workers: usize,
    pub batch_size: usize,
    pub max_depth: usize,
    pub lookback_days: u32,
    pub task_timeout: Option<Duration>,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl EngineConfig {
    /// Validate `config` and read it into typed form.
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, EngineError> {
        validate_engine_config(config)?;

        let source_kind = match config.get_string("source", "kind").as_deref().map(str::trim) {
            Some(k) if k.eq_ignore_ascii_case("sqlite") => SourceKind::Sqlite,
            _ => SourceKind::Csv,
        };
        let source = SourceConfig {
            kind: source_kind,
            path: path_value(config, "source").unwrap_or_default(),
        };

        let sink = path_value(config, "sink").map(|path| SinkConfig {
            path,
            id_column: string_or(config, "sink", "id_column", DEFAULT_ID_COLUMN),
            date_column: string_or(config, "sink", "date_column", DEFAULT_DATE_COLUMN),
        });

        let id_column = string_or(config, "entities", "id_column", DEFAULT_ID_COLUMN);
        let mut entity_tables = BTreeMap::new();
        for entity_type in EntityType::CONCRETE {
            if let Some(table) = config
                .get_string("entities", entity_type.as_str())
                .filter(|t| !t.trim().is_empty())
            {
                entity_tables.insert(
                    entity_type,
                    EntityTable {
                        table: table.trim().to_string(),
                        id_column: id_column.clone(),
                    },
                );
            }
        }

        let timeout_secs = config.get_int("engine", "task_timeout_secs", 0);
        let log_format = match config.get_string("logging", "format").as_deref().map(str::trim) {
            Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Self {
            definitions: path_value(config, "definitions"),
            source,
            sink,
            entity_tables,
            workers: config.get_int("engine", "workers", default_workers() as i64) as usize,
            batch_size: config.get_int("engine", "batch_size", DEFAULT_BATCH_SIZE as i64) as usize,
            max_depth: config.get_int("engine", "max_depth", DEFAULT_MAX_DEPTH as i64) as usize,
            lookback_days: u32::try_from(config.get_int("engine", "lookback_days", i64::from(DEFAULT_LOOKBACK_DAYS)))
                .unwrap_or(DEFAULT_LOOKBACK_DAYS),
            task_timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs as u64)),
            log_level: string_or(config, "logging", "level", "info").to_lowercase(),
            log_format,
        })
    }

    pub fn run_options(&self, dry_run: bool) -> RunOptions {
        let (id_column, date_column) = match &self.sink {
            Some(sink) => (sink.id_column.clone(), sink.date_column.clone()),
            None => (DEFAULT_ID_COLUMN.to_string(), DEFAULT_DATE_COLUMN.to_string()),
        };
        RunOptions {
            workers: self.workers,
            batch_size: self.batch_size,
            dry_run,
            max_depth: self.max_depth,
            lookback_days: self.lookback_days,
            task_timeout: self.task_timeout,
            id_column,
            date_column,
        }
    }
}

fn path_value(config: &dyn ConfigPort, section: &str) -> Option<PathBuf> {
    config
        .get_string(section, "path")
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
}

fn string_or(config: &dyn ConfigPort, section: &str, key: &str, default: &str) -> String {
    config
        .get_string(section, key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;

    fn load(content: &str) -> Result<EngineConfig, EngineError> {
        EngineConfig::from_config(&FileConfigAdapter::from_string(content).unwrap())
    }

    #[test]
    fn defaults_applied() {
        let config = load("[source]\nkind = csv\npath = data\n").unwrap();
        assert_eq!(config.source.kind, SourceKind::Csv);
        assert_eq!(config.source.path, PathBuf::from("data"));
        assert_eq!(config.sink, None);
        assert_eq!(config.definitions, None);
        assert_eq!(config.batch_size, 64);
        assert_eq!(config.max_depth, 32);
        assert_eq!(config.lookback_days, 60);
        assert_eq!(config.task_timeout, None);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.workers >= 1);
    }

    #[test]
    fn full_config_read() {
        let config = load(
            "[definitions]\npath = defs\n\
             [source]\nkind = SQLite\npath = market.db\n\
             [sink]\nkind = sqlite\npath = out.db\nid_column = ts_code\n\
             [entities]\nstock = stock_daily\nindex = index_daily\nid_column = ts_code\n\
             [engine]\nworkers = 3\nbatch_size = 8\nmax_depth = 16\nlookback_days = 120\ntask_timeout_secs = 5\n\
             [logging]\nlevel = DEBUG\nformat = json\n",
        )
        .unwrap();
        assert_eq!(config.definitions, Some(PathBuf::from("defs")));
        assert_eq!(config.source.kind, SourceKind::Sqlite);
        let sink = config.sink.as_ref().unwrap();
        assert_eq!(sink.id_column, "ts_code");
        assert_eq!(sink.date_column, "trade_date");
        assert_eq!(config.entity_tables.len(), 2);
        assert_eq!(config.entity_tables[&EntityType::Index].table, "index_daily");
        assert_eq!(config.entity_tables[&EntityType::Stock].id_column, "ts_code");
        assert_eq!(config.task_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.log_format, LogFormat::Json);

        let options = config.run_options(true);
        assert_eq!(options.workers, 3);
        assert_eq!(options.batch_size, 8);
        assert_eq!(options.max_depth, 16);
        assert_eq!(options.lookback_days, 120);
        assert_eq!(options.id_column, "ts_code");
        assert!(options.dry_run);
    }

    #[test]
    fn invalid_config_rejected() {
        let err = load("[source]\nkind = csv\npath = data\n[engine]\nmax_depth = 0\n").unwrap_err();
        assert!(matches!(err, EngineError::ConfigInvalid { ref key, .. } if key == "max_depth"));
    }
}
