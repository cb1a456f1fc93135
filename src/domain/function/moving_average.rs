//! Moving averages.
//!
//! - SMA(n): mean of the trailing n samples
//! - WMA(n): (1*P[i-n+1] + 2*P[i-n+2] + ... + n*P[i]) / (n*(n+1)/2)
//! - EMA(n): k = 2/(n+1), seeded with the first valid sample, then
//!   EMA[i] = P[i]*k + EMA[i-1]*(1-k)

use super::{Args, rolling};
use crate::domain::error::FunctionError;
use crate::domain::value::Value;

pub fn sma(args: &Args) -> Result<Value, FunctionError> {
    let values = args.series(0);
    let period = args.period(1);
    args.require_len(values.len(), period)?;
    Ok(Value::Series(simple_moving_average(values, period)))
}

pub fn ema(args: &Args) -> Result<Value, FunctionError> {
    let values = args.series(0);
    let period = args.period(1);
    args.require_len(values.len(), period)?;
    Ok(Value::Series(exponential_moving_average(values, period)))
}

pub fn wma(args: &Args) -> Result<Value, FunctionError> {
    let values = args.series(0);
    let period = args.period(1);
    args.require_len(values.len(), period)?;
    let divisor = (period * (period + 1)) as f64 / 2.0;
    Ok(Value::Series(rolling(values, period, |window| {
        window
            .iter()
            .enumerate()
            .map(|(i, v)| (i + 1) as f64 * v)
            .sum::<f64>()
            / divisor
    })))
}

pub(crate) fn simple_moving_average(values: &[f64], period: usize) -> Vec<f64> {
    rolling(values, period, |window| {
        window.iter().sum::<f64>() / period as f64
    })
}

/// Missing inputs produce a missing output and leave the running average untouched.
pub(crate) fn exponential_moving_average(values: &[f64], period: usize) -> Vec<f64> {
    let k = 2.0 / (period as f64 + 1.0);
    let mut ema: Option<f64> = None;

    values
        .iter()
        .map(|&v| {
            if v.is_nan() {
                return f64::NAN;
            }
            let next = match ema {
                None => v,
                Some(prev) => v * k + prev * (1.0 - k),
            };
            ema = Some(next);
            next
        })
        .collect()
}
