//! MACD (Moving Average Convergence Divergence).
//!
//! line = EMA(fast) - EMA(slow), signal = EMA(line, signal), histogram = line - signal.
//! `macd` returns all three as a bundle; the `macd_*` selectors return one field.

use super::Args;
use super::moving_average::exponential_moving_average;
use crate::domain::error::FunctionError;
use crate::domain::value::Value;
use std::collections::BTreeMap;

struct MacdOutput {
    line: Vec<f64>,
    signal: Vec<f64>,
    histogram: Vec<f64>,
}

fn compute(args: &Args) -> Result<MacdOutput, FunctionError> {
    let values = args.series(0);
    let fast = args.period(1);
    let slow = args.period(2);
    let signal_period = args.period(3);

    if fast >= slow {
        return Err(args.invalid(format!(
            "fast period ({fast}) must be shorter than slow period ({slow})"
        )));
    }
    args.require_len(values.len(), slow)?;

    let fast_ema = exponential_moving_average(values, fast);
    let slow_ema = exponential_moving_average(values, slow);
    let line: Vec<f64> = fast_ema
        .iter()
        .zip(&slow_ema)
        .map(|(f, s)| f - s)
        .collect();
    let signal = exponential_moving_average(&line, signal_period);
    let histogram = line.iter().zip(&signal).map(|(l, s)| l - s).collect();

    Ok(MacdOutput {
        line,
        signal,
        histogram,
    })
}

pub fn macd(args: &Args) -> Result<Value, FunctionError> {
    let out = compute(args)?;
    let mut fields = BTreeMap::new();
    fields.insert("macd".to_string(), out.line);
    fields.insert("signal".to_string(), out.signal);
    fields.insert("histogram".to_string(), out.histogram);
    Ok(Value::Bundle(fields))
}

pub fn macd_line(args: &Args) -> Result<Value, FunctionError> {
    Ok(Value::Series(compute(args)?.line))
}

pub fn macd_signal(args: &Args) -> Result<Value, FunctionError> {
    Ok(Value::Series(compute(args)?.signal))
}

pub fn macd_hist(args: &Args) -> Result<Value, FunctionError> {
    Ok(Value::Series(compute(args)?.histogram))
}
