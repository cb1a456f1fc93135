//! Technical function library.
//!
//! Every function is pure and operates on sequences aligned to one date index.
//! The registry is a static table mapping a name to its parameter list and an
//! implementation pointer; binding checks arity, keyword names and argument
//! kinds before the implementation runs.
//!
//! Conventions shared by all functions:
//! - Input shorter than the window parameter fails with `InsufficientData`
//! - A missing sample inside a window yields a missing output at that index
//! - Non-positive windows fail with `InvalidArgument`

pub mod bollinger;
pub mod cross;
pub mod macd;
pub mod moving_average;
pub mod rsi;
pub mod window;

use crate::domain::error::{EvalError, FunctionError};
use crate::domain::value::Value;
use std::collections::HashMap;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// A sequence; scalars are broadcast to the index length.
    Series,
    /// A positive integer window length.
    Period,
    /// Any integer, e.g. a signed shift.
    Integer,
    /// Any finite number.
    Number,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamDefault {
    Required,
    Value(f64),
    /// Optional with no default (`window=None`).
    Absent,
}

#[derive(Debug, Clone, Copy)]
pub struct Param {
    pub name: &'static str,
    pub kind: ParamKind,
    pub default: ParamDefault,
}

const fn series(name: &'static str) -> Param {
    Param {
        name,
        kind: ParamKind::Series,
        default: ParamDefault::Required,
    }
}

const fn period(name: &'static str) -> Param {
    Param {
        name,
        kind: ParamKind::Period,
        default: ParamDefault::Required,
    }
}

const fn period_or(name: &'static str, default: f64) -> Param {
    Param {
        name,
        kind: ParamKind::Period,
        default: ParamDefault::Value(default),
    }
}

const fn optional_period(name: &'static str) -> Param {
    Param {
        name,
        kind: ParamKind::Period,
        default: ParamDefault::Absent,
    }
}

const fn integer(name: &'static str) -> Param {
    Param {
        name,
        kind: ParamKind::Integer,
        default: ParamDefault::Required,
    }
}

const fn number_or(name: &'static str, default: f64) -> Param {
    Param {
        name,
        kind: ParamKind::Number,
        default: ParamDefault::Value(default),
    }
}

/// A bound argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Series(Vec<f64>),
    Scalar(f64),
    Absent,
}

/// Arguments after binding, in parameter order.
#[derive(Debug, Clone)]
pub struct Args {
    pub function: &'static str,
    values: Vec<Arg>,
}

impl Args {
    pub fn new(function: &'static str, values: Vec<Arg>) -> Self {
        Self { function, values }
    }

    pub fn series(&self, i: usize) -> &[f64] {
        match self.values.get(i) {
            Some(Arg::Series(values)) => values,
            _ => &[],
        }
    }

    pub fn period(&self, i: usize) -> usize {
        self.optional_period(i).unwrap_or(0)
    }

    pub fn optional_period(&self, i: usize) -> Option<usize> {
        match self.values.get(i) {
            Some(Arg::Scalar(v)) => Some(*v as usize),
            _ => None,
        }
    }

    pub fn integer(&self, i: usize) -> i64 {
        match self.values.get(i) {
            Some(Arg::Scalar(v)) => *v as i64,
            _ => 0,
        }
    }

    pub fn number(&self, i: usize) -> f64 {
        match self.values.get(i) {
            Some(Arg::Scalar(v)) => *v,
            _ => f64::NAN,
        }
    }

    pub fn insufficient(&self, required: usize, available: usize) -> FunctionError {
        FunctionError::InsufficientData {
            function: self.function.to_string(),
            required,
            available,
        }
    }

    pub fn invalid(&self, reason: impl Into<String>) -> FunctionError {
        FunctionError::InvalidArgument {
            function: self.function.to_string(),
            reason: reason.into(),
        }
    }

    /// Fail with `InsufficientData` when `available < required`.
    pub fn require_len(&self, available: usize, required: usize) -> Result<(), FunctionError> {
        if available < required {
            return Err(self.insufficient(required, available));
        }
        Ok(())
    }
}

pub type FunctionImpl = fn(&Args) -> Result<Value, FunctionError>;

#[derive(Debug, Clone, Copy)]
pub struct FunctionSpec {
    pub name: &'static str,
    pub params: &'static [Param],
    pub call: FunctionImpl,
}

static FUNCTIONS: &[FunctionSpec] = &[
    FunctionSpec {
        name: "sma",
        params: &[series("series"), period("period")],
        call: moving_average::sma,
    },
    FunctionSpec {
        name: "ema",
        params: &[series("series"), period("period")],
        call: moving_average::ema,
    },
    FunctionSpec {
        name: "wma",
        params: &[series("series"), period("period")],
        call: moving_average::wma,
    },
    FunctionSpec {
        name: "rsi",
        params: &[series("series"), period_or("period", 14.0)],
        call: rsi::rsi,
    },
    FunctionSpec {
        name: "macd",
        params: MACD_PARAMS,
        call: macd::macd,
    },
    FunctionSpec {
        name: "macd_line",
        params: MACD_PARAMS,
        call: macd::macd_line,
    },
    FunctionSpec {
        name: "macd_signal",
        params: MACD_PARAMS,
        call: macd::macd_signal,
    },
    FunctionSpec {
        name: "macd_hist",
        params: MACD_PARAMS,
        call: macd::macd_hist,
    },
    FunctionSpec {
        name: "bollinger",
        params: BOLLINGER_PARAMS,
        call: bollinger::bollinger,
    },
    FunctionSpec {
        name: "bb_upper",
        params: BOLLINGER_PARAMS,
        call: bollinger::bb_upper,
    },
    FunctionSpec {
        name: "bb_middle",
        params: BOLLINGER_PARAMS,
        call: bollinger::bb_middle,
    },
    FunctionSpec {
        name: "bb_lower",
        params: BOLLINGER_PARAMS,
        call: bollinger::bb_lower,
    },
    FunctionSpec {
        name: "crossover",
        params: &[series("a"), series("b")],
        call: cross::crossover,
    },
    FunctionSpec {
        name: "crossunder",
        params: &[series("a"), series("b")],
        call: cross::crossunder,
    },
    FunctionSpec {
        name: "shift",
        params: &[series("series"), integer("periods")],
        call: window::shift,
    },
    FunctionSpec {
        name: "diff",
        params: &[series("series"), period_or("periods", 1.0)],
        call: window::diff,
    },
    FunctionSpec {
        name: "pct_change",
        params: &[series("series"), period_or("periods", 1.0)],
        call: window::pct_change,
    },
    FunctionSpec {
        name: "rolling_max",
        params: &[series("series"), period("window")],
        call: window::rolling_max,
    },
    FunctionSpec {
        name: "rolling_min",
        params: &[series("series"), period("window")],
        call: window::rolling_min,
    },
    FunctionSpec {
        name: "rolling_mean",
        params: &[series("series"), period("window")],
        call: window::rolling_mean,
    },
    FunctionSpec {
        name: "rolling_sum",
        params: &[series("series"), period("window")],
        call: window::rolling_sum,
    },
    FunctionSpec {
        name: "rolling_std",
        params: &[series("series"), period("window")],
        call: window::rolling_std,
    },
    FunctionSpec {
        name: "rank",
        params: &[series("series"), optional_period("window")],
        call: window::rank,
    },
    FunctionSpec {
        name: "abs",
        params: &[series("series")],
        call: window::abs,
    },
    FunctionSpec {
        name: "max",
        params: &[series("a"), series("b")],
        call: window::max,
    },
    FunctionSpec {
        name: "min",
        params: &[series("a"), series("b")],
        call: window::min,
    },
];

const MACD_PARAMS: &[Param] = &[
    series("series"),
    period_or("fast", 12.0),
    period_or("slow", 26.0),
    period_or("signal", 9.0),
];

const BOLLINGER_PARAMS: &[Param] = &[
    series("series"),
    period_or("period", 20.0),
    number_or("std_dev", 2.0),
];

/// Name-indexed view over the static function table.
#[derive(Debug)]
pub struct FunctionLibrary {
    by_name: HashMap<&'static str, &'static FunctionSpec>,
}

impl FunctionLibrary {
    /// The process-wide library, built on first use.
    pub fn standard() -> &'static FunctionLibrary {
        static LIBRARY: OnceLock<FunctionLibrary> = OnceLock::new();
        LIBRARY.get_or_init(|| FunctionLibrary {
            by_name: FUNCTIONS.iter().map(|spec| (spec.name, spec)).collect(),
        })
    }

    pub fn get(&self, name: &str) -> Option<&'static FunctionSpec> {
        self.by_name.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.by_name.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Look up, bind and invoke `name`. `len` is the shared index length.
    pub fn call(
        &self,
        name: &str,
        positional: Vec<Value>,
        keywords: Vec<(String, Value)>,
        len: usize,
    ) -> Result<Value, EvalError> {
        let spec = self.get(name).ok_or_else(|| EvalError::UnknownFunction {
            name: name.to_string(),
        })?;
        let args = bind(spec, positional, keywords, len)?;
        Ok((spec.call)(&args)?)
    }
}

fn bind(
    spec: &'static FunctionSpec,
    positional: Vec<Value>,
    keywords: Vec<(String, Value)>,
    len: usize,
) -> Result<Args, FunctionError> {
    let invalid = |reason: String| FunctionError::InvalidArgument {
        function: spec.name.to_string(),
        reason,
    };

    if positional.len() > spec.params.len() {
        return Err(invalid(format!(
            "takes at most {} arguments, got {}",
            spec.params.len(),
            positional.len()
        )));
    }

    let mut slots: Vec<Option<Value>> = vec![None; spec.params.len()];
    for (slot, value) in slots.iter_mut().zip(positional) {
        *slot = Some(value);
    }
    for (key, value) in keywords {
        let idx = spec
            .params
            .iter()
            .position(|p| p.name == key)
            .ok_or_else(|| invalid(format!("unexpected keyword argument '{key}'")))?;
        if slots[idx].is_some() {
            return Err(invalid(format!("argument '{key}' given more than once")));
        }
        slots[idx] = Some(value);
    }

    let mut values = Vec::with_capacity(spec.params.len());
    for (param, slot) in spec.params.iter().zip(slots) {
        let arg = match slot {
            Some(value) => coerce(param, value, len).map_err(&invalid)?,
            None => match param.default {
                ParamDefault::Required => {
                    return Err(invalid(format!("missing argument '{}'", param.name)));
                }
                ParamDefault::Value(v) => Arg::Scalar(v),
                ParamDefault::Absent => Arg::Absent,
            },
        };
        values.push(arg);
    }

    Ok(Args::new(spec.name, values))
}

fn coerce(param: &Param, value: Value, len: usize) -> Result<Arg, String> {
    match (param.kind, value) {
        (ParamKind::Series, Value::Series(values)) => Ok(Arg::Series(values)),
        (ParamKind::Series, Value::Scalar(v)) => Ok(Arg::Series(vec![v; len])),
        (ParamKind::Period, Value::Scalar(v)) => {
            if !v.is_finite() || v.fract() != 0.0 {
                Err(format!("'{}' must be an integer, got {v}", param.name))
            } else if v <= 0.0 {
                Err(format!("'{}' must be positive, got {v}", param.name))
            } else {
                Ok(Arg::Scalar(v))
            }
        }
        (ParamKind::Integer, Value::Scalar(v)) => {
            if !v.is_finite() || v.fract() != 0.0 {
                Err(format!("'{}' must be an integer, got {v}", param.name))
            } else {
                Ok(Arg::Scalar(v))
            }
        }
        (ParamKind::Number, Value::Scalar(v)) => {
            if v.is_finite() {
                Ok(Arg::Scalar(v))
            } else {
                Err(format!("'{}' must be a finite number", param.name))
            }
        }
        (kind, other) => Err(format!(
            "'{}' expects a {}, got a {}",
            param.name,
            match kind {
                ParamKind::Series => "series",
                ParamKind::Period | ParamKind::Integer | ParamKind::Number => "scalar",
            },
            other.kind()
        )),
    }
}

/// Reduce each trailing window of `period` samples. Missing until the window
/// fills, and wherever the window holds a missing sample.
pub(crate) fn rolling<F>(values: &[f64], period: usize, reduce: F) -> Vec<f64>
where
    F: Fn(&[f64]) -> f64,
{
    (0..values.len())
        .map(|i| {
            if i + 1 < period {
                return f64::NAN;
            }
            let window = &values[i + 1 - period..=i];
            if window.iter().any(|v| v.is_nan()) {
                f64::NAN
            } else {
                reduce(window)
            }
        })
        .collect()
}
