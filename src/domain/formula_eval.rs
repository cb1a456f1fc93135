//! Formula evaluation.
//!
//! Evaluates a `Formula` against a `SeriesFrame` of aligned input sequences.
//!
//! # Evaluation Semantics
//!
//! - Raw expressions are parsed into an `Expr` AST, never executed as code
//! - Identifiers resolve by exact lookup in the input frame
//! - Literals broadcast across the shared date index
//! - `ValueRef::Indicator` evaluates the referenced definition's calculation
//!   against the same inputs; a name already on the evaluation path is a cycle
//! - Every nested formula or indicator reference adds one level of depth;
//!   exceeding `max_depth` fails with `FormulaTooDeep`
//! - Errors carry the innermost failing sub-formula as context

use crate::domain::error::EvalError;
use crate::domain::expr::Expr;
use crate::domain::expr_parser;
use crate::domain::formula::{Formula, StructuredFormula, ValueRef};
use crate::domain::function::FunctionLibrary;
use crate::domain::series::SeriesFrame;
use crate::domain::value::{self, Value};
use std::collections::HashMap;

pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Resolves indicator names referenced from formulas.
pub trait IndicatorLookup {
    fn formula(&self, name: &str) -> Option<&Formula>;
}

impl IndicatorLookup for HashMap<String, Formula> {
    fn formula(&self, name: &str) -> Option<&Formula> {
        self.get(name)
    }
}

pub struct Evaluator<'a> {
    library: &'static FunctionLibrary,
    inputs: &'a SeriesFrame,
    indicators: Option<&'a dyn IndicatorLookup>,
    max_depth: usize,
}

impl<'a> Evaluator<'a> {
    pub fn new(inputs: &'a SeriesFrame) -> Self {
        Self {
            library: FunctionLibrary::standard(),
            inputs,
            indicators: None,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_indicators(mut self, indicators: &'a dyn IndicatorLookup) -> Self {
        self.indicators = Some(indicators);
        self
    }

    pub fn evaluate(&self, formula: &Formula) -> Result<Value, EvalError> {
        self.eval_formula(formula, 1, &mut Vec::new())
    }

    /// Evaluate the calculation of indicator `name`, so that references back
    /// to `name` are reported as cycles.
    pub fn evaluate_indicator(&self, name: &str, formula: &Formula) -> Result<Value, EvalError> {
        self.eval_formula(formula, 1, &mut vec![name.to_string()])
    }

    fn len(&self) -> usize {
        self.inputs.len()
    }

    fn eval_formula(
        &self,
        formula: &Formula,
        depth: usize,
        path: &mut Vec<String>,
    ) -> Result<Value, EvalError> {
        if depth > self.max_depth {
            return Err(EvalError::FormulaTooDeep {
                limit: self.max_depth,
            });
        }
        let result = match formula {
            Formula::Raw(text) => self.eval_raw(text, depth),
            Formula::Structured(s) => self.eval_structured(s, depth, path),
        };
        result.map_err(|e| e.within(formula))
    }

    fn eval_raw(&self, text: &str, depth: usize) -> Result<Value, EvalError> {
        let remaining = self.max_depth - depth + 1;
        let expr = expr_parser::parse(text, remaining).map_err(|e| match e {
            EvalError::FormulaTooDeep { .. } => EvalError::FormulaTooDeep {
                limit: self.max_depth,
            },
            other => other,
        })?;
        self.eval_expr(&expr)
    }

    fn eval_expr(&self, expr: &Expr) -> Result<Value, EvalError> {
        match expr {
            Expr::Number(n) => Ok(Value::Scalar(*n)),
            Expr::Bool(b) => Ok(Value::Scalar(value::from_bool(*b))),
            Expr::Ident(name) => self.lookup(name),
            Expr::Call { name, args, kwargs } => {
                if !self.library.contains(name) {
                    return Err(EvalError::UnknownFunction { name: name.clone() });
                }
                let positional = args
                    .iter()
                    .map(|a| self.eval_expr(a))
                    .collect::<Result<Vec<_>, _>>()?;
                let keywords = kwargs
                    .iter()
                    .map(|(k, a)| Ok((k.clone(), self.eval_expr(a)?)))
                    .collect::<Result<Vec<_>, EvalError>>()?;
                self.library
                    .call(name, positional, keywords, self.len())
                    .map_err(|e| e.within(expr))
            }
            Expr::Unary { op, operand } => value::unary(*op, self.eval_expr(operand)?),
            Expr::Binary { op, left, right } => {
                let left = self.eval_expr(left)?;
                let right = self.eval_expr(right)?;
                value::binary(*op, &left, &right, self.len()).map_err(|e| e.within(expr))
            }
        }
    }

    fn lookup(&self, name: &str) -> Result<Value, EvalError> {
        self.inputs
            .get(name)
            .map(|values| Value::Series(values.to_vec()))
            .ok_or_else(|| EvalError::UndefinedSequence {
                name: name.to_string(),
            })
    }

    fn eval_structured(
        &self,
        formula: &StructuredFormula,
        depth: usize,
        path: &mut Vec<String>,
    ) -> Result<Value, EvalError> {
        let child = depth + 1;
        match formula {
            StructuredFormula::Condition {
                operator,
                left,
                right,
            } => {
                let left = self.resolve(left, child, path)?;
                let right = self.resolve(right, child, path)?;
                value::binary(operator.binary_op(), &left, &right, self.len())
            }
            StructuredFormula::Crossover { series1, series2 } => {
                let a = self.resolve(series1, child, path)?;
                let b = self.resolve(series2, child, path)?;
                self.library.call("crossover", vec![a, b], vec![], self.len())
            }
            StructuredFormula::Crossunder { series1, series2 } => {
                let a = self.resolve(series1, child, path)?;
                let b = self.resolve(series2, child, path)?;
                self.library.call("crossunder", vec![a, b], vec![], self.len())
            }
            StructuredFormula::FunctionCall {
                function,
                args,
                kwargs,
            } => {
                if !self.library.contains(function) {
                    return Err(EvalError::UnknownFunction {
                        name: function.clone(),
                    });
                }
                let positional = args
                    .iter()
                    .map(|a| self.resolve(a, child, path))
                    .collect::<Result<Vec<_>, _>>()?;
                let mut keywords = Vec::with_capacity(kwargs.len());
                for (key, arg) in kwargs {
                    keywords.push((key.clone(), self.resolve(arg, child, path)?));
                }
                self.library.call(function, positional, keywords, self.len())
            }
            StructuredFormula::IfThenElse {
                condition,
                true_value,
                false_value,
            } => {
                let condition = self.eval_formula(condition, child, path)?;
                let when_true = self.resolve(true_value, child, path)?;
                let when_false = self.resolve(false_value, child, path)?;
                value::select(&condition, &when_true, &when_false, self.len())
            }
        }
    }

    fn resolve(
        &self,
        value_ref: &ValueRef,
        depth: usize,
        path: &mut Vec<String>,
    ) -> Result<Value, EvalError> {
        match value_ref {
            ValueRef::Literal(v) => Ok(Value::Scalar(*v)),
            ValueRef::Sequence(name) => self.lookup(name),
            ValueRef::Formula(formula) => self.eval_formula(formula, depth, path),
            ValueRef::Indicator(name) => {
                if path.iter().any(|p| p == name) {
                    let mut cycle = path.clone();
                    cycle.push(name.clone());
                    return Err(EvalError::FormulaCycle { path: cycle });
                }
                let formula = self
                    .indicators
                    .and_then(|lookup| lookup.formula(name))
                    .ok_or_else(|| EvalError::UnknownIndicator { name: name.clone() })?;
                path.push(name.clone());
                let result = self.eval_formula(formula, depth, path);
                path.pop();
                result
            }
        }
    }
}
