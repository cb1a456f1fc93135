//! Crossover predicates.
//!
//! - `crossover(a, b)`: true at i when a was below b at i-1 and reaches or
//!   passes it at i
//! - `crossunder(a, b)`: the mirrored condition
//!
//! Index 0 is false unless one of its samples is missing. Any missing sample
//! in the pair makes the output missing.

use super::Args;
use crate::domain::error::FunctionError;
use crate::domain::value::{Value, from_bool};

pub fn crossover(args: &Args) -> Result<Value, FunctionError> {
    Ok(Value::Series(crossed(args.series(0), args.series(1), |prev_a, prev_b, a, b| {
        prev_a < prev_b && a >= b
    })))
}

pub fn crossunder(args: &Args) -> Result<Value, FunctionError> {
    Ok(Value::Series(crossed(args.series(0), args.series(1), |prev_a, prev_b, a, b| {
        prev_a > prev_b && a <= b
    })))
}

/// Apply `cond(a[i-1], b[i-1], a[i], b[i])` over consecutive pairs.
pub(crate) fn crossed<F>(a: &[f64], b: &[f64], cond: F) -> Vec<f64>
where
    F: Fn(f64, f64, f64, f64) -> bool,
{
    let len = a.len().min(b.len());
    (0..len)
        .map(|i| {
            if a[i].is_nan() || b[i].is_nan() {
                return f64::NAN;
            }
            if i == 0 {
                return 0.0;
            }
            let (prev_a, prev_b) = (a[i - 1], b[i - 1]);
            if prev_a.is_nan() || prev_b.is_nan() {
                return f64::NAN;
            }
            from_bool(cond(prev_a, prev_b, a[i], b[i]))
        })
        .collect()
}
