//! CLI definition and dispatch.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::definition_store::DefinitionStore;
use crate::domain::definition_validation::ValidationResult;
use crate::domain::engine_config::{EngineConfig, LogFormat, SourceKind};
use crate::domain::entity::{parse_entity_ids, parse_entity_types, EntityType};
use crate::domain::error::{EngineError, SinkError};
use crate::domain::formula_eval::DEFAULT_MAX_DEPTH;
use crate::domain::orchestrator::{Orchestrator, RunRequest, RunSummary};
use crate::domain::series::DateRange;
use crate::logging::setup_logging;
use crate::ports::sink_port::{ResultSink, Row};
use crate::ports::source_port::TimeSeriesSource;

/// Exit status when definitions fail validation.
const EXIT_INVALID_DEFINITIONS: u8 = 4;

#[derive(Parser, Debug)]
#[command(name = "indicalc", about = "Configuration-driven indicator engine")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compute indicators over a date range
    Run {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long, value_parser = parse_cli_date)]
        start: NaiveDate,
        #[arg(long, value_parser = parse_cli_date)]
        end: NaiveDate,
        /// Overrides `[definitions] path`
        #[arg(short, long)]
        definitions: Option<PathBuf>,
        /// stock, industry, index or common; repeatable or comma-separated
        #[arg(long = "entity-type")]
        entity_types: Vec<String>,
        #[arg(long = "indicator")]
        indicators: Vec<String>,
        /// Entity ids; repeatable or comma-separated
        #[arg(long = "entity")]
        entities: Vec<String>,
        #[arg(long)]
        workers: Option<usize>,
        #[arg(long)]
        batch_size: Option<usize>,
        /// Evaluate without writing to the sink
        #[arg(long)]
        dry_run: bool,
        /// Print the run summary as JSON on stdout
        #[arg(long)]
        json: bool,
    },
    /// Validate indicator definitions
    Validate {
        #[arg(short, long)]
        definitions: PathBuf,
        #[arg(long = "indicator")]
        indicators: Vec<String>,
        #[arg(long, default_value_t = DEFAULT_MAX_DEPTH)]
        max_depth: usize,
    },
    /// List loaded indicator definitions
    List {
        #[arg(short, long)]
        definitions: PathBuf,
        #[arg(long = "entity-type")]
        entity_type: Option<String>,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    let result = match cli.command {
        Command::Run {
            config,
            start,
            end,
            definitions,
            entity_types,
            indicators,
            entities,
            workers,
            batch_size,
            dry_run,
            json,
        } => {
            let args = RunArgs {
                start,
                end,
                definitions,
                entity_types,
                indicators,
                entities,
                workers,
                batch_size,
                dry_run,
            };
            run_batch(&config, args).map(|summary| print_summary(&summary, json))
        }
        Command::Validate {
            definitions,
            indicators,
            max_depth,
        } => {
            setup_logging("warn", LogFormat::Pretty);
            run_validate(&definitions, &indicators, max_depth)
        }
        Command::List {
            definitions,
            entity_type,
        } => {
            setup_logging("warn", LogFormat::Pretty);
            run_list(&definitions, entity_type.as_deref())
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {e}");
            ExitCode::from(&e)
        }
    }
}

fn parse_cli_date(s: &str) -> Result<NaiveDate, String> {
    crate::adapters::csv_adapter::parse_date(s)
        .ok_or_else(|| format!("invalid date '{s}', expected YYYY-MM-DD or YYYYMMDD"))
}

/// Arguments of the `run` command once clap has parsed them.
#[derive(Debug, Clone)]
pub struct RunArgs {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub definitions: Option<PathBuf>,
    pub entity_types: Vec<String>,
    pub indicators: Vec<String>,
    pub entities: Vec<String>,
    pub workers: Option<usize>,
    pub batch_size: Option<usize>,
    pub dry_run: bool,
}

/// Accepts nothing during dry runs.
struct DiscardSink;

impl ResultSink for DiscardSink {
    fn upsert(&self, _table: &str, _key_columns: &[&str], rows: &[Row]) -> Result<usize, SinkError> {
        Ok(rows.len())
    }
}

fn invalid_arg(key: &str, reason: impl Into<String>) -> EngineError {
    EngineError::ConfigInvalid {
        section: "run".to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

/// Load configuration and definitions, then execute one batch run.
pub fn run_batch(config_path: &Path, args: RunArgs) -> Result<RunSummary, EngineError> {
    let adapter = FileConfigAdapter::from_file(config_path)?;
    let config = EngineConfig::from_config(&adapter)?;
    setup_logging(&config.log_level, config.log_format);
    tracing::info!(config = %config_path.display(), "configuration loaded");

    if args.start > args.end {
        return Err(invalid_arg("start", "start must not be after end"));
    }
    let entity_types: Vec<EntityType> = if args.entity_types.is_empty() {
        vec![]
    } else {
        parse_entity_types(&args.entity_types.join(","))
            .map_err(|e| invalid_arg("entity-type", e.to_string()))?
    };
    let entity_ids = if args.entities.is_empty() {
        vec![]
    } else {
        parse_entity_ids(&args.entities.join(",")).map_err(|e| invalid_arg("entity", e.to_string()))?
    };

    let definitions = args
        .definitions
        .or_else(|| config.definitions.clone())
        .ok_or_else(|| EngineError::ConfigMissing {
            section: "definitions".to_string(),
            key: "path".to_string(),
        })?;
    let store = DefinitionStore::load(&definitions)?.with_max_depth(config.max_depth);

    let mut options = config.run_options(args.dry_run);
    if let Some(workers) = args.workers {
        options.workers = workers.max(1);
    }
    if let Some(batch_size) = args.batch_size {
        options.batch_size = batch_size.max(1);
    }

    let source = open_source(&config, options.workers)?;
    let sink = if args.dry_run {
        Box::new(DiscardSink) as Box<dyn ResultSink>
    } else {
        open_sink(&config)?
    };

    let request = RunRequest {
        entity_types,
        indicators: args.indicators,
        entity_ids,
        range: DateRange::new(args.start, args.end),
    };
    Orchestrator::new(source.as_ref(), sink.as_ref(), store.snapshot())
        .with_options(options)
        .with_entity_tables(config.entity_tables.clone())
        .run(&request)
}

fn open_source(config: &EngineConfig, workers: usize) -> Result<Box<dyn TimeSeriesSource>, EngineError> {
    match config.source.kind {
        SourceKind::Csv => Ok(Box::new(CsvAdapter::new(config.source.path.clone()))),
        #[cfg(feature = "sqlite")]
        SourceKind::Sqlite => {
            let pool_size = u32::try_from(workers).unwrap_or(u32::MAX);
            let adapter = crate::adapters::sqlite_adapter::SqliteAdapter::open(&config.source.path, pool_size)?;
            Ok(Box::new(adapter))
        }
        #[cfg(not(feature = "sqlite"))]
        SourceKind::Sqlite => {
            let _ = workers;
            Err(EngineError::ConfigInvalid {
                section: "source".to_string(),
                key: "kind".to_string(),
                reason: "sqlite support is not compiled in".to_string(),
            })
        }
    }
}

fn open_sink(config: &EngineConfig) -> Result<Box<dyn ResultSink>, EngineError> {
    let sink = config.sink.as_ref().ok_or_else(|| EngineError::ConfigMissing {
        section: "sink".to_string(),
        key: "path".to_string(),
    })?;

    #[cfg(feature = "sqlite")]
    {
        let adapter = crate::adapters::sqlite_adapter::SqliteAdapter::open(&sink.path, 1).map_err(|e| {
            SinkError {
                table: e.table,
                reason: e.reason,
            }
        })?;
        Ok(Box::new(adapter))
    }

    #[cfg(not(feature = "sqlite"))]
    {
        let _ = sink;
        Err(EngineError::ConfigInvalid {
            section: "sink".to_string(),
            key: "kind".to_string(),
            reason: "sqlite support is not compiled in".to_string(),
        })
    }
}

fn print_summary(summary: &RunSummary, json: bool) -> ExitCode {
    eprintln!("{summary}");
    if json {
        match serde_json::to_string_pretty(summary) {
            Ok(text) => println!("{text}"),
            Err(e) => {
                eprintln!("error: failed to serialise summary: {e}");
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::SUCCESS
}

/// Validate the selected definitions (all when `indicators` is empty).
///
/// Documents rejected at load time are reported first, named by their error.
pub fn collect_validation(
    definitions: &Path,
    indicators: &[String],
    max_depth: usize,
) -> Result<Vec<ValidationResult>, EngineError> {
    let store = DefinitionStore::load(definitions)?.with_max_depth(max_depth);
    let index = store.snapshot();

    let mut results: Vec<ValidationResult> = index
        .rejected()
        .iter()
        .map(|e| ValidationResult {
            name: "<load>".to_string(),
            valid: false,
            errors: vec![e.to_string()],
        })
        .collect();

    let names: Vec<String> = if indicators.is_empty() {
        index.names().map(str::to_string).collect()
    } else {
        indicators.to_vec()
    };
    results.extend(names.iter().map(|name| store.validate(name)));
    Ok(results)
}

fn run_validate(definitions: &Path, indicators: &[String], max_depth: usize) -> Result<ExitCode, EngineError> {
    let results = collect_validation(definitions, indicators, max_depth)?;
    for result in &results {
        if result.valid {
            println!("ok   {}", result.name);
        } else {
            println!("FAIL {}", result.name);
            for error in &result.errors {
                for line in error.lines() {
                    println!("       {line}");
                }
            }
        }
    }

    let failed = results.iter().filter(|r| !r.valid).count();
    eprintln!("{} checked, {failed} invalid", results.len());
    Ok(if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_INVALID_DEFINITIONS)
    })
}

fn run_list(definitions: &Path, entity_type: Option<&str>) -> Result<ExitCode, EngineError> {
    let store = DefinitionStore::load(definitions)?;
    let defs = match entity_type {
        Some(raw) => {
            let entity_type = raw.parse::<EntityType>().map_err(|e| EngineError::ConfigInvalid {
                section: "list".to_string(),
                key: "entity-type".to_string(),
                reason: e.to_string(),
            })?;
            store.list_by_entity_type(entity_type)
        }
        None => store.snapshot().all(),
    };

    for def in &defs {
        println!(
            "{}\t{}\t{}.{}\t{}",
            def.name,
            def.entity_type(),
            def.sink_table().unwrap_or("-"),
            def.sink_column().unwrap_or("-"),
            def.description.as_deref().unwrap_or("")
        );
    }
    Ok(ExitCode::SUCCESS)
}
