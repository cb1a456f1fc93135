//! Shifts, differences, rolling reductions and element-wise helpers.

use super::bollinger::population_std;
use super::{Args, rolling};
use crate::domain::error::FunctionError;
use crate::domain::value::Value;

/// `shift(series, periods)`: positive periods look back, negative look ahead.
pub fn shift(args: &Args) -> Result<Value, FunctionError> {
    let values = args.series(0);
    let len = values.len() as i64;
    // Any shift beyond the length moves every sample out of range.
    let periods = args.integer(1).clamp(-len, len);

    Ok(Value::Series(
        (0..len)
            .map(|i| {
                let src = i - periods;
                if (0..len).contains(&src) {
                    values[src as usize]
                } else {
                    f64::NAN
                }
            })
            .collect(),
    ))
}

pub fn diff(args: &Args) -> Result<Value, FunctionError> {
    lagged(args, |current, previous| current - previous)
}

/// `pct_change(series, periods=1)`. A zero base yields a missing sample.
pub fn pct_change(args: &Args) -> Result<Value, FunctionError> {
    lagged(args, |current, previous| {
        if previous == 0.0 {
            f64::NAN
        } else {
            current / previous - 1.0
        }
    })
}

fn lagged<F>(args: &Args, f: F) -> Result<Value, FunctionError>
where
    F: Fn(f64, f64) -> f64,
{
    let values = args.series(0);
    let periods = args.period(1);
    args.require_len(values.len(), periods)?;

    Ok(Value::Series(
        (0..values.len())
            .map(|i| {
                if i < periods {
                    f64::NAN
                } else {
                    f(values[i], values[i - periods])
                }
            })
            .collect(),
    ))
}

fn rolling_reduce<F>(args: &Args, reduce: F) -> Result<Value, FunctionError>
where
    F: Fn(&[f64]) -> f64,
{
    let values = args.series(0);
    let window = args.period(1);
    args.require_len(values.len(), window)?;
    Ok(Value::Series(rolling(values, window, reduce)))
}

pub fn rolling_max(args: &Args) -> Result<Value, FunctionError> {
    rolling_reduce(args, |w| w.iter().copied().fold(f64::NEG_INFINITY, f64::max))
}

pub fn rolling_min(args: &Args) -> Result<Value, FunctionError> {
    rolling_reduce(args, |w| w.iter().copied().fold(f64::INFINITY, f64::min))
}

pub fn rolling_mean(args: &Args) -> Result<Value, FunctionError> {
    rolling_reduce(args, |w| w.iter().sum::<f64>() / w.len() as f64)
}

pub fn rolling_sum(args: &Args) -> Result<Value, FunctionError> {
    rolling_reduce(args, |w| w.iter().sum())
}

pub fn rolling_std(args: &Args) -> Result<Value, FunctionError> {
    rolling_reduce(args, population_std)
}

/// Percentile rank in (0, 1], ties share their average rank.
///
/// Without a window every sample is ranked against the whole sequence. With
/// a window the last sample of each trailing window is ranked within it.
pub fn rank(args: &Args) -> Result<Value, FunctionError> {
    let values = args.series(0);

    match args.optional_period(1) {
        Some(window) => {
            args.require_len(values.len(), window)?;
            Ok(Value::Series(rolling(values, window, |w| {
                percentile_of(w, w[w.len() - 1])
            })))
        }
        None => {
            let valid: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
            Ok(Value::Series(
                values
                    .iter()
                    .map(|&v| {
                        if v.is_nan() {
                            f64::NAN
                        } else {
                            percentile_of(&valid, v)
                        }
                    })
                    .collect(),
            ))
        }
    }
}

fn percentile_of(population: &[f64], v: f64) -> f64 {
    let below = population.iter().filter(|&&x| x < v).count() as f64;
    let equal = population.iter().filter(|&&x| x == v).count() as f64;
    (below + (equal + 1.0) / 2.0) / population.len() as f64
}

pub fn abs(args: &Args) -> Result<Value, FunctionError> {
    Ok(Value::Series(args.series(0).iter().map(|v| v.abs()).collect()))
}

pub fn max(args: &Args) -> Result<Value, FunctionError> {
    pairwise(args, f64::max)
}

pub fn min(args: &Args) -> Result<Value, FunctionError> {
    pairwise(args, f64::min)
}

/// `f64::max`/`min` ignore NaN, so a missing side is handled first.
fn pairwise(args: &Args, f: fn(f64, f64) -> f64) -> Result<Value, FunctionError> {
    Ok(Value::Series(
        args.series(0)
            .iter()
            .zip(args.series(1))
            .map(|(&a, &b)| {
                if a.is_nan() || b.is_nan() {
                    f64::NAN
                } else {
                    f(a, b)
                }
            })
            .collect(),
    ))
}
