//! Post-processing pipeline.
//!
//! Applied to every output column in a fixed order:
//! dtype coercion -> fill_na -> clip -> round.
//!
//! Coercion turns non-finite or out-of-range samples into missing ones, so a
//! later `fill_na` also covers them.

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    #[serde(alias = "int64", alias = "integer")]
    Int,
    #[serde(alias = "boolean")]
    Bool,
    #[serde(alias = "float64", alias = "double")]
    Float,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct ClipSpec {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PostProcessingSpec {
    #[serde(default)]
    pub dtype: Option<DType>,
    #[serde(default)]
    pub fill_na: Option<f64>,
    #[serde(default)]
    pub clip: Option<ClipSpec>,
    #[serde(default)]
    pub round: Option<u32>,
}

/// Largest magnitude an `Int` coercion keeps; beyond it integers lose precision in f64.
const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0;

impl PostProcessingSpec {
    pub fn is_empty(&self) -> bool {
        self.dtype.is_none() && self.fill_na.is_none() && self.clip.is_none() && self.round.is_none()
    }

    /// Check parameter sanity; returns one message per problem.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if let Some(ClipSpec {
            min: Some(lo),
            max: Some(hi),
        }) = self.clip
        {
            if lo > hi {
                problems.push(format!("clip min ({lo}) exceeds clip max ({hi})"));
            }
        }
        if let Some(fill) = self.fill_na {
            if !fill.is_finite() {
                problems.push("fill_na must be a finite number".to_string());
            }
        }
        if let Some(decimals) = self.round {
            if decimals > 15 {
                problems.push(format!("round supports at most 15 decimals, got {decimals}"));
            }
        }
        problems
    }

    pub fn apply(&self, values: &mut [f64]) {
        if let Some(dtype) = self.dtype {
            for v in values.iter_mut() {
                *v = coerce(*v, dtype);
            }
        }
        if let Some(fill) = self.fill_na {
            for v in values.iter_mut().filter(|v| v.is_nan()) {
                *v = fill;
            }
        }
        if let Some(clip) = self.clip {
            for v in values.iter_mut().filter(|v| !v.is_nan()) {
                if let Some(lo) = clip.min {
                    *v = v.max(lo);
                }
                if let Some(hi) = clip.max {
                    *v = v.min(hi);
                }
            }
        }
        if let Some(decimals) = self.round {
            let factor = 10f64.powi(decimals as i32);
            for v in values.iter_mut().filter(|v| v.is_finite()) {
                *v = (*v * factor).round() / factor;
            }
        }
    }
}

fn coerce(v: f64, dtype: DType) -> f64 {
    if !v.is_finite() {
        return f64::NAN;
    }
    match dtype {
        DType::Float => v,
        DType::Int => {
            if v.abs() > MAX_EXACT_INT {
                f64::NAN
            } else {
                v.trunc()
            }
        }
        DType::Bool => {
            if v != 0.0 {
                1.0
            } else {
                0.0
            }
        }
    }
}
