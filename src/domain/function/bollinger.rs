//! Bollinger Bands.
//!
//! - Middle: SMA over n samples
//! - Upper: Middle + (std_dev × StdDev)
//! - Lower: Middle - (std_dev × StdDev)
//!
//! StdDev is the population standard deviation (divides by N, not N-1).
//! Defaults: period=20, std_dev=2.0. Warmup: first (period-1) samples are missing.

use super::{Args, rolling};
use crate::domain::error::FunctionError;
use crate::domain::value::Value;
use std::collections::BTreeMap;

struct Bands {
    upper: Vec<f64>,
    middle: Vec<f64>,
    lower: Vec<f64>,
}

pub(crate) fn population_std(window: &[f64]) -> f64 {
    let n = window.len() as f64;
    let mean = window.iter().sum::<f64>() / n;
    let variance = window
        .iter()
        .map(|v| {
            let diff = v - mean;
            diff * diff
        })
        .sum::<f64>()
        / n;
    variance.sqrt()
}

fn compute(args: &Args) -> Result<Bands, FunctionError> {
    let values = args.series(0);
    let period = args.period(1);
    let mult = args.number(2);

    if mult < 0.0 {
        return Err(args.invalid(format!("std_dev must not be negative, got {mult}")));
    }
    args.require_len(values.len(), period)?;

    let middle = rolling(values, period, |w| w.iter().sum::<f64>() / period as f64);
    let std = rolling(values, period, population_std);
    let upper = middle.iter().zip(&std).map(|(m, s)| m + mult * s).collect();
    let lower = middle.iter().zip(&std).map(|(m, s)| m - mult * s).collect();

    Ok(Bands {
        upper,
        middle,
        lower,
    })
}

pub fn bollinger(args: &Args) -> Result<Value, FunctionError> {
    let bands = compute(args)?;
    let mut fields = BTreeMap::new();
    fields.insert("upper".to_string(), bands.upper);
    fields.insert("middle".to_string(), bands.middle);
    fields.insert("lower".to_string(), bands.lower);
    Ok(Value::Bundle(fields))
}

pub fn bb_upper(args: &Args) -> Result<Value, FunctionError> {
    Ok(Value::Series(compute(args)?.upper))
}

pub fn bb_middle(args: &Args) -> Result<Value, FunctionError> {
    Ok(Value::Series(compute(args)?.middle))
}

pub fn bb_lower(args: &Args) -> Result<Value, FunctionError> {
    Ok(Value::Series(compute(args)?.lower))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::function::Arg;
    use approx::assert_relative_eq;

    fn args(values: &[f64], period: usize, mult: f64) -> Args {
        Args::new(
            "bollinger",
            vec![
                Arg::Series(values.to_vec()),
                Arg::Scalar(period as f64),
                Arg::Scalar(mult),
            ],
        )
    }

    #[test]
    fn bands_use_population_stddev() {
        // window [2, 4, 4, 4, 5, 5, 7, 9]: mean 5, population std 2
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let Value::Bundle(fields) = bollinger(&args(&values, 8, 2.0)).unwrap() else {
            panic!("expected bundle");
        };
        assert_relative_eq!(fields["middle"][7], 5.0);
        assert_relative_eq!(fields["upper"][7], 9.0);
        assert_relative_eq!(fields["lower"][7], 1.0);
        assert!(fields["upper"][6].is_nan());
    }

    #[test]
    fn flat_prices_collapse_bands() {
        let a = args(&[3.0; 5], 3, 2.0);
        let (Value::Series(upper), Value::Series(lower)) =
            (bb_upper(&a).unwrap(), bb_lower(&a).unwrap())
        else {
            panic!("expected series");
        };
        assert_relative_eq!(upper[4], 3.0);
        assert_relative_eq!(lower[4], 3.0);
    }

    #[test]
    fn middle_matches_sma() {
        let Value::Series(middle) = bb_middle(&args(&[1.0, 2.0, 3.0, 4.0], 2, 2.0)).unwrap() else {
            panic!("expected series");
        };
        assert_relative_eq!(middle[3], 3.5);
    }

    #[test]
    fn negative_multiplier_rejected() {
        let err = bollinger(&args(&[1.0; 30], 20, -1.0)).unwrap_err();
        assert!(matches!(err, FunctionError::InvalidArgument { .. }));
    }

    #[test]
    fn insufficient_data() {
        let err = bollinger(&args(&[1.0; 5], 20, 2.0)).unwrap_err();
        assert!(matches!(err, FunctionError::InsufficientData { .. }));
    }
}
