//! Run configuration validation.
//!
//! Validates every config field before a run is planned.

use crate::domain::error::EngineError;
use crate::ports::config_port::ConfigPort;

pub const MAX_DEPTH_LIMIT: i64 = 256;
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

pub fn validate_engine_config(config: &dyn ConfigPort) -> Result<(), EngineError> {
    validate_source(config)?;
    validate_sink(config)?;
    validate_workers(config)?;
    validate_batch_size(config)?;
    validate_max_depth(config)?;
    validate_non_negative(config, "lookback_days")?;
    validate_non_negative(config, "task_timeout_secs")?;
    validate_logging(config)?;
    Ok(())
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> EngineError {
    EngineError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn require_path(config: &dyn ConfigPort, section: &str) -> Result<(), EngineError> {
    match config.get_string(section, "path") {
        Some(s) if !s.trim().is_empty() => Ok(()),
        _ => Err(EngineError::ConfigMissing {
            section: section.to_string(),
            key: "path".to_string(),
        }),
    }
}

fn validate_source(config: &dyn ConfigPort) -> Result<(), EngineError> {
    let kind = config
        .get_string("source", "kind")
        .ok_or_else(|| EngineError::ConfigMissing {
            section: "source".to_string(),
            key: "kind".to_string(),
        })?;
    match kind.trim().to_lowercase().as_str() {
        "csv" | "sqlite" => {}
        other => {
            return Err(invalid(
                "source",
                "kind",
                format!("unknown source kind '{other}', expected csv or sqlite"),
            ))
        }
    }
    require_path(config, "source")
}

/// The sink section is optional (dry runs need none), but when present it
/// must be complete.
fn validate_sink(config: &dyn ConfigPort) -> Result<(), EngineError> {
    let kind = config.get_string("sink", "kind");
    let path = config.get_string("sink", "path");
    if kind.is_none() && path.is_none() {
        return Ok(());
    }
    if let Some(kind) = kind {
        if !kind.trim().eq_ignore_ascii_case("sqlite") {
            return Err(invalid(
                "sink",
                "kind",
                format!("unknown sink kind '{}', expected sqlite", kind.trim()),
            ));
        }
    }
    require_path(config, "sink")?;
    for key in ["id_column", "date_column"] {
        if let Some(value) = config.get_string("sink", key) {
            if value.trim().is_empty() {
                return Err(invalid("sink", key, format!("{key} must not be empty")));
            }
        }
    }
    Ok(())
}

fn validate_workers(config: &dyn ConfigPort) -> Result<(), EngineError> {
    let value = config.get_int("engine", "workers", 1);
    if value < 1 {
        return Err(invalid("engine", "workers", "workers must be at least 1"));
    }
    Ok(())
}

fn validate_batch_size(config: &dyn ConfigPort) -> Result<(), EngineError> {
    let value = config.get_int("engine", "batch_size", 1);
    if value < 1 {
        return Err(invalid("engine", "batch_size", "batch_size must be at least 1"));
    }
    Ok(())
}

fn validate_max_depth(config: &dyn ConfigPort) -> Result<(), EngineError> {
    let value = config.get_int("engine", "max_depth", 1);
    if !(1..=MAX_DEPTH_LIMIT).contains(&value) {
        return Err(invalid(
            "engine",
            "max_depth",
            format!("max_depth must be between 1 and {MAX_DEPTH_LIMIT}"),
        ));
    }
    Ok(())
}

fn validate_non_negative(config: &dyn ConfigPort, key: &str) -> Result<(), EngineError> {
    if config.get_int("engine", key, 0) < 0 {
        return Err(invalid("engine", key, format!("{key} must be non-negative")));
    }
    Ok(())
}

fn validate_logging(config: &dyn ConfigPort) -> Result<(), EngineError> {
    if let Some(level) = config.get_string("logging", "level") {
        if !LOG_LEVELS.contains(&level.trim().to_lowercase().as_str()) {
            return Err(invalid(
                "logging",
                "level",
                format!("unknown log level '{}'", level.trim()),
            ));
        }
    }
    if let Some(format) = config.get_string("logging", "format") {
        match format.trim().to_lowercase().as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(invalid(
                    "logging",
                    "format",
                    format!("unknown log format '{other}', expected pretty or json"),
                ))
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;

    const SOURCE: &str = "[source]\nkind = csv\npath = data\n";

    fn make_config(content: &str) -> FileConfigAdapter {
        FileConfigAdapter::from_string(content).unwrap()
    }

    #[test]
    fn minimal_config_is_valid() {
        assert!(validate_engine_config(&make_config(SOURCE)).is_ok());
    }

    #[test]
    fn full_config_is_valid() {
        let config = make_config(&format!(
            "{SOURCE}[sink]\nkind = sqlite\npath = out.db\n[engine]\nworkers = 4\nbatch_size = 16\nmax_depth = 64\nlookback_days = 90\n[logging]\nlevel = debug\nformat = json\n"
        ));
        assert!(validate_engine_config(&config).is_ok());
    }

    #[test]
    fn source_kind_required() {
        let err = validate_engine_config(&make_config("[source]\npath = data\n")).unwrap_err();
        assert!(matches!(err, EngineError::ConfigMissing { ref key, .. } if key == "kind"));
    }

    #[test]
    fn unknown_source_kind_fails() {
        let err = validate_engine_config(&make_config("[source]\nkind = parquet\npath = x\n")).unwrap_err();
        assert!(matches!(err, EngineError::ConfigInvalid { ref key, .. } if key == "kind"));
    }

    #[test]
    fn source_path_required() {
        let err = validate_engine_config(&make_config("[source]\nkind = csv\n")).unwrap_err();
        assert!(
            matches!(err, EngineError::ConfigMissing { section, key } if section == "source" && key == "path")
        );
    }

    #[test]
    fn partial_sink_fails() {
        let config = make_config(&format!("{SOURCE}[sink]\nkind = sqlite\n"));
        let err = validate_engine_config(&config).unwrap_err();
        assert!(matches!(err, EngineError::ConfigMissing { ref section, .. } if section == "sink"));
    }

    #[test]
    fn workers_zero_fails() {
        let config = make_config(&format!("{SOURCE}[engine]\nworkers = 0\n"));
        let err = validate_engine_config(&config).unwrap_err();
        assert!(matches!(err, EngineError::ConfigInvalid { ref key, .. } if key == "workers"));
    }

    #[test]
    fn batch_size_zero_fails() {
        let config = make_config(&format!("{SOURCE}[engine]\nbatch_size = 0\n"));
        let err = validate_engine_config(&config).unwrap_err();
        assert!(matches!(err, EngineError::ConfigInvalid { ref key, .. } if key == "batch_size"));
    }

    #[test]
    fn max_depth_out_of_range_fails() {
        let config = make_config(&format!("{SOURCE}[engine]\nmax_depth = 1000\n"));
        let err = validate_engine_config(&config).unwrap_err();
        assert!(matches!(err, EngineError::ConfigInvalid { ref key, .. } if key == "max_depth"));
    }

    #[test]
    fn negative_lookback_fails() {
        let config = make_config(&format!("{SOURCE}[engine]\nlookback_days = -1\n"));
        let err = validate_engine_config(&config).unwrap_err();
        assert!(matches!(err, EngineError::ConfigInvalid { ref key, .. } if key == "lookback_days"));
    }

    #[test]
    fn unknown_log_level_fails() {
        let config = make_config(&format!("{SOURCE}[logging]\nlevel = loud\n"));
        let err = validate_engine_config(&config).unwrap_err();
        assert!(matches!(err, EngineError::ConfigInvalid { ref key, .. } if key == "level"));
        assert_eq!(err.exit_status(), 2);
    }
}
