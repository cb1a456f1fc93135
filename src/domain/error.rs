//! Error types for every layer of the engine.
//!
//! Per-task errors (`EvalError`, `ResolveError`, `SinkError`) are caught at the
//! task boundary by the orchestrator. `EngineError` is reserved for failures
//! that abort a whole run.

/// A parse error with position information for raw expression parsing.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("parse error at position {position}: {message}")]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl ParseError {
    /// Format the error with a caret pointing at the error position in the input.
    pub fn display_with_context(&self, input: &str) -> String {
        let caret = " ".repeat(self.position) + "^";
        format!(
            "{input}\n{caret}\n{err}",
            input = input,
            caret = caret,
            err = self
        )
    }
}

/// Failure raised by a Technical Function Library primitive.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FunctionError {
    #[error("{function}: insufficient data, need {required} samples, have {available}")]
    InsufficientData {
        function: String,
        required: usize,
        available: usize,
    },

    #[error("{function}: invalid argument: {reason}")]
    InvalidArgument { function: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("undefined sequence '{name}'")]
    UndefinedSequence { name: String },

    #[error("unknown function '{name}'")]
    UnknownFunction { name: String },

    #[error("unknown indicator '{name}'")]
    UnknownIndicator { name: String },

    #[error("formula exceeds maximum nesting depth of {limit}")]
    FormulaTooDeep { limit: usize },

    #[error("cyclic indicator reference: {}", .path.join(" -> "))]
    FormulaCycle { path: Vec<String> },

    #[error("type mismatch: {reason}")]
    TypeMismatch { reason: String },

    #[error(transparent)]
    Function(#[from] FunctionError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("in `{formula}`: {source}")]
    Context {
        formula: String,
        source: Box<EvalError>,
    },
}

impl EvalError {
    /// Attach the failing sub-formula, keeping only the innermost context.
    /// Structural errors (depth, cycles) are left bare.
    pub fn within(self, formula: impl std::fmt::Display) -> Self {
        match self {
            EvalError::Context { .. }
            | EvalError::FormulaTooDeep { .. }
            | EvalError::FormulaCycle { .. } => self,
            other => EvalError::Context {
                formula: formula.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// The error with any context wrapper stripped.
    pub fn root(&self) -> &EvalError {
        match self {
            EvalError::Context { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_insufficient_data(&self) -> bool {
        matches!(
            self.root(),
            EvalError::Function(FunctionError::InsufficientData { .. })
        )
    }
}

/// Failure reported by a `TimeSeriesSource` implementation.
#[derive(Debug, Clone, thiserror::Error)]
#[error("source error on table {table}: {reason}")]
pub struct SourceError {
    pub table: String,
    pub reason: String,
}

/// Failure reported by a `ResultSink` implementation.
#[derive(Debug, Clone, thiserror::Error)]
#[error("sink error on table {table}: {reason}")]
pub struct SinkError {
    pub table: String,
    pub reason: String,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    Fetch(#[from] SourceError),

    #[error("sequence name '{name}' is provided by more than one source")]
    AliasCollision { name: String },
}

/// A definition document that could not be read or parsed.
#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("duplicate indicator '{name}' in {path}")]
    Duplicate { name: String, path: String },
}

/// Top-level error type for indicalc.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("definition store failed to load from {path}: {reason}")]
    StoreLoad { path: String, reason: String },

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("no indicators matched the requested filters")]
    NoIndicatorsMatched,

    #[error("no entities resolvable for the requested entity types")]
    NoEntities,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Process exit status for this error category.
    pub fn exit_status(&self) -> u8 {
        match self {
            EngineError::Io(_) => 1,
            EngineError::ConfigParse { .. }
            | EngineError::ConfigMissing { .. }
            | EngineError::ConfigInvalid { .. } => 2,
            EngineError::Source(_) | EngineError::Sink(_) => 3,
            EngineError::StoreLoad { .. } => 4,
            EngineError::NoIndicatorsMatched | EngineError::NoEntities => 5,
        }
    }
}

impl From<&EngineError> for std::process::ExitCode {
    fn from(err: &EngineError) -> Self {
        std::process::ExitCode::from(err.exit_status())
    }
}
