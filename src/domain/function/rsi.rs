//! RSI (Relative Strength Index).
//!
//! Uses Wilder's smoothing for average gain/loss:
//! - First average: simple mean of the first n price changes
//! - Subsequent: avg = (prev_avg * (n-1) + current) / n
//!
//! Formula: RSI = 100 - (100 / (1 + avg_gain / avg_loss))
//! If avg_loss == 0: RSI = 100
//!
//! Warmup: the first n samples are missing. A missing price change restarts
//! the warmup.

use super::Args;
use crate::domain::error::FunctionError;
use crate::domain::value::Value;

pub fn rsi(args: &Args) -> Result<Value, FunctionError> {
    let values = args.series(0);
    let period = args.period(1);
    args.require_len(values.len(), period)?;
    Ok(Value::Series(relative_strength_index(values, period)))
}

fn relative_strength_index(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];

    let mut seed_gain = 0.0;
    let mut seed_loss = 0.0;
    let mut seeded = 0usize;
    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;

    for i in 1..values.len() {
        let change = values[i] - values[i - 1];
        if change.is_nan() {
            seed_gain = 0.0;
            seed_loss = 0.0;
            seeded = 0;
            continue;
        }
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);

        if seeded < period {
            seed_gain += gain;
            seed_loss += loss;
            seeded += 1;
            if seeded < period {
                continue;
            }
            avg_gain = seed_gain / period as f64;
            avg_loss = seed_loss / period as f64;
        } else {
            avg_gain = (avg_gain * (period - 1) as f64 + gain) / period as f64;
            avg_loss = (avg_loss * (period - 1) as f64 + loss) / period as f64;
        }

        out[i] = if avg_loss == 0.0 {
            100.0
        } else {
            100.0 - (100.0 / (1.0 + avg_gain / avg_loss))
        };
    }

    out
}
