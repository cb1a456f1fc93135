//! Runtime values produced while evaluating a formula.
//!
//! # Numeric conventions
//!
//! - Arithmetic propagates NaN; division by zero yields NaN
//! - Comparisons and `and` / `or` yield NaN when either operand is NaN
//! - `==` / `!=` compare with an absolute tolerance of `EPSILON`
//! - `and` / `or` treat any non-zero sample as true
//! - Unary `not` and `-` keep missing samples missing

use crate::domain::error::EvalError;
use std::collections::BTreeMap;
use std::fmt;

pub const EPSILON: f64 = 1e-9;

pub fn truthy(v: f64) -> bool {
    !v.is_nan() && v != 0.0
}

pub fn from_bool(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(f64),
    Series(Vec<f64>),
    /// Named fields of a multi-output function, e.g. `macd`.
    Bundle(BTreeMap<String, Vec<f64>>),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Scalar(_) => "scalar",
            Value::Series(_) => "series",
            Value::Bundle(_) => "bundle",
        }
    }

    /// Expand to a sequence of `len` samples. Bundles cannot be flattened.
    pub fn into_series(self, len: usize) -> Result<Vec<f64>, EvalError> {
        match self {
            Value::Scalar(v) => Ok(vec![v; len]),
            Value::Series(values) => Ok(values),
            Value::Bundle(fields) => Err(EvalError::TypeMismatch {
                reason: format!(
                    "expected a series, got a bundle with fields [{}]",
                    fields.keys().cloned().collect::<Vec<_>>().join(", ")
                ),
            }),
        }
    }

    fn sample(&self, i: usize) -> f64 {
        match self {
            Value::Scalar(v) => *v,
            Value::Series(values) => values.get(i).copied().unwrap_or(f64::NAN),
            Value::Bundle(_) => f64::NAN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Gt => ">",
            BinaryOp::Lt => "<",
            BinaryOp::Ge => ">=",
            BinaryOp::Le => "<=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }

    pub fn is_predicate(&self) -> bool {
        !matches!(self, BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div)
    }

    pub fn apply(&self, a: f64, b: f64) -> f64 {
        if self.is_predicate() && (a.is_nan() || b.is_nan()) {
            return f64::NAN;
        }
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => {
                if b == 0.0 {
                    f64::NAN
                } else {
                    a / b
                }
            }
            BinaryOp::Gt => from_bool(a > b),
            BinaryOp::Lt => from_bool(a < b),
            BinaryOp::Ge => from_bool(a >= b),
            BinaryOp::Le => from_bool(a <= b),
            BinaryOp::Eq => from_bool((a - b).abs() < EPSILON),
            BinaryOp::Ne => from_bool((a - b).abs() >= EPSILON),
            BinaryOp::And => from_bool(truthy(a) && truthy(b)),
            BinaryOp::Or => from_bool(truthy(a) || truthy(b)),
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

impl UnaryOp {
    pub fn apply(&self, v: f64) -> f64 {
        if v.is_nan() {
            return f64::NAN;
        }
        match self {
            UnaryOp::Neg => -v,
            UnaryOp::Not => from_bool(v == 0.0),
        }
    }
}

/// Apply `op` element-wise. Two scalars stay scalar; anything else yields a series.
pub fn binary(op: BinaryOp, left: &Value, right: &Value, len: usize) -> Result<Value, EvalError> {
    for side in [left, right] {
        if let Value::Bundle(_) = side {
            return Err(EvalError::TypeMismatch {
                reason: format!("operator '{op}' cannot be applied to a bundle"),
            });
        }
    }
    if let (Value::Scalar(a), Value::Scalar(b)) = (left, right) {
        return Ok(Value::Scalar(op.apply(*a, *b)));
    }
    Ok(Value::Series(
        (0..len)
            .map(|i| op.apply(left.sample(i), right.sample(i)))
            .collect(),
    ))
}

pub fn unary(op: UnaryOp, value: Value) -> Result<Value, EvalError> {
    match value {
        Value::Scalar(v) => Ok(Value::Scalar(op.apply(v))),
        Value::Series(values) => Ok(Value::Series(values.into_iter().map(|v| op.apply(v)).collect())),
        Value::Bundle(_) => Err(EvalError::TypeMismatch {
            reason: "unary operator cannot be applied to a bundle".into(),
        }),
    }
}

/// Element-wise select. A missing condition sample yields a missing output.
pub fn select(
    condition: &Value,
    when_true: &Value,
    when_false: &Value,
    len: usize,
) -> Result<Value, EvalError> {
    for side in [condition, when_true, when_false] {
        if let Value::Bundle(_) = side {
            return Err(EvalError::TypeMismatch {
                reason: "if_then_else operands must be scalars or series".into(),
            });
        }
    }
    Ok(Value::Series(
        (0..len)
            .map(|i| {
                let c = condition.sample(i);
                if c.is_nan() {
                    f64::NAN
                } else if c != 0.0 {
                    when_true.sample(i)
                } else {
                    when_false.sample(i)
                }
            })
            .collect(),
    ))
}
