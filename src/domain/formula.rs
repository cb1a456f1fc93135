//! Formula data structures.
//!
//! - `Formula`: a raw textual expression or a structured operation tree
//! - `StructuredFormula`: condition, crossover/crossunder, function call, if-then-else
//! - `ValueRef`: literal, sequence name, another indicator, or a nested formula
//!
//! JSON shape: a formula is a string, `{"expression": "..."}`, or an object
//! tagged by `"type"`. A value ref is a number or bool, a string, an
//! `{"indicator": "..."}` object, or any formula object.

use crate::domain::error::EvalError;
use crate::domain::expr_parser;
use crate::domain::value::BinaryOp;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "FormulaRepr")]
pub enum Formula {
    Raw(String),
    Structured(Box<StructuredFormula>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FormulaRepr {
    Text(String),
    Expression { expression: String },
    Structured(Box<StructuredFormula>),
}

impl From<FormulaRepr> for Formula {
    fn from(repr: FormulaRepr) -> Self {
        match repr {
            FormulaRepr::Text(text) | FormulaRepr::Expression { expression: text } => {
                Formula::Raw(text)
            }
            FormulaRepr::Structured(s) => Formula::Structured(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StructuredFormula {
    Condition {
        operator: ConditionOperator,
        left: ValueRef,
        right: ValueRef,
    },
    Crossover {
        series1: ValueRef,
        series2: ValueRef,
    },
    Crossunder {
        series1: ValueRef,
        series2: ValueRef,
    },
    #[serde(rename = "function", alias = "function_call")]
    FunctionCall {
        function: String,
        #[serde(default)]
        args: Vec<ValueRef>,
        #[serde(default)]
        kwargs: BTreeMap<String, ValueRef>,
    },
    IfThenElse {
        condition: Formula,
        true_value: ValueRef,
        false_value: ValueRef,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ConditionOperator {
    #[serde(rename = ">", alias = "gt")]
    Gt,
    #[serde(rename = "<", alias = "lt")]
    Lt,
    #[serde(rename = ">=", alias = "ge")]
    Ge,
    #[serde(rename = "<=", alias = "le")]
    Le,
    #[serde(rename = "==", alias = "eq")]
    Eq,
    #[serde(rename = "!=", alias = "ne")]
    Ne,
    #[serde(rename = "and")]
    And,
    #[serde(rename = "or")]
    Or,
}

impl ConditionOperator {
    pub fn binary_op(self) -> BinaryOp {
        match self {
            ConditionOperator::Gt => BinaryOp::Gt,
            ConditionOperator::Lt => BinaryOp::Lt,
            ConditionOperator::Ge => BinaryOp::Ge,
            ConditionOperator::Le => BinaryOp::Le,
            ConditionOperator::Eq => BinaryOp::Eq,
            ConditionOperator::Ne => BinaryOp::Ne,
            ConditionOperator::And => BinaryOp::And,
            ConditionOperator::Or => BinaryOp::Or,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "ValueRefRepr")]
pub enum ValueRef {
    Literal(f64),
    Sequence(String),
    /// Another definition's calculation, evaluated for the same entity.
    Indicator(String),
    Formula(Box<Formula>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ValueRefRepr {
    Number(f64),
    Bool(bool),
    Name(String),
    Indicator { indicator: String },
    Nested(Box<Formula>),
}

impl From<ValueRefRepr> for ValueRef {
    fn from(repr: ValueRefRepr) -> Self {
        match repr {
            ValueRefRepr::Number(n) => ValueRef::Literal(n),
            ValueRefRepr::Bool(b) => ValueRef::Literal(if b { 1.0 } else { 0.0 }),
            // A bare identifier names a sequence; any other text is an expression.
            ValueRefRepr::Name(name) if is_identifier(&name) => ValueRef::Sequence(name),
            ValueRefRepr::Name(text) => ValueRef::Formula(Box::new(Formula::Raw(text))),
            ValueRefRepr::Indicator { indicator } => ValueRef::Indicator(indicator),
            ValueRefRepr::Nested(formula) => ValueRef::Formula(formula),
        }
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !matches!(s, "true" | "false" | "and" | "or" | "not")
}

/// Names a formula depends on, gathered without evaluating it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormulaRefs {
    pub sequences: BTreeSet<String>,
    pub functions: BTreeSet<String>,
    pub indicators: BTreeSet<String>,
}

impl Formula {
    /// Collect referenced sequences, functions and indicators.
    ///
    /// Raw expressions are parsed, so syntax errors and excessive nesting are
    /// reported here.
    pub fn references(&self, max_depth: usize) -> Result<FormulaRefs, EvalError> {
        let mut refs = FormulaRefs::default();
        self.collect(&mut refs, 1, max_depth)?;
        Ok(refs)
    }

    fn collect(&self, refs: &mut FormulaRefs, depth: usize, max_depth: usize) -> Result<(), EvalError> {
        if depth > max_depth {
            return Err(EvalError::FormulaTooDeep { limit: max_depth });
        }
        match self {
            Formula::Raw(text) => {
                let remaining = max_depth - depth + 1;
                let expr = expr_parser::parse(text, remaining).map_err(|e| match e {
                    EvalError::FormulaTooDeep { .. } => EvalError::FormulaTooDeep { limit: max_depth },
                    other => other,
                })?;
                refs.sequences
                    .extend(expr.identifiers().into_iter().map(str::to_string));
                refs.functions
                    .extend(expr.functions().into_iter().map(str::to_string));
            }
            Formula::Structured(s) => match s.as_ref() {
                StructuredFormula::Condition { left, right, .. } => {
                    left.collect(refs, depth + 1, max_depth)?;
                    right.collect(refs, depth + 1, max_depth)?;
                }
                StructuredFormula::Crossover { series1, series2 }
                | StructuredFormula::Crossunder { series1, series2 } => {
                    refs.functions.insert(s.function_name().to_string());
                    series1.collect(refs, depth + 1, max_depth)?;
                    series2.collect(refs, depth + 1, max_depth)?;
                }
                StructuredFormula::FunctionCall {
                    function,
                    args,
                    kwargs,
                } => {
                    refs.functions.insert(function.clone());
                    for arg in args.iter().chain(kwargs.values()) {
                        arg.collect(refs, depth + 1, max_depth)?;
                    }
                }
                StructuredFormula::IfThenElse {
                    condition,
                    true_value,
                    false_value,
                } => {
                    condition.collect(refs, depth + 1, max_depth)?;
                    true_value.collect(refs, depth + 1, max_depth)?;
                    false_value.collect(refs, depth + 1, max_depth)?;
                }
            },
        }
        Ok(())
    }
}

impl StructuredFormula {
    fn function_name(&self) -> &'static str {
        match self {
            StructuredFormula::Condition { .. } => "condition",
            StructuredFormula::Crossover { .. } => "crossover",
            StructuredFormula::Crossunder { .. } => "crossunder",
            StructuredFormula::FunctionCall { .. } => "function",
            StructuredFormula::IfThenElse { .. } => "if_then_else",
        }
    }
}

impl ValueRef {
    fn collect(&self, refs: &mut FormulaRefs, depth: usize, max_depth: usize) -> Result<(), EvalError> {
        match self {
            ValueRef::Literal(_) => Ok(()),
            ValueRef::Sequence(name) => {
                refs.sequences.insert(name.clone());
                Ok(())
            }
            ValueRef::Indicator(name) => {
                refs.indicators.insert(name.clone());
                Ok(())
            }
            ValueRef::Formula(formula) => formula.collect(refs, depth, max_depth),
        }
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Formula::Raw(text) => f.write_str(text.trim()),
            Formula::Structured(s) => write!(f, "{s}"),
        }
    }
}

impl fmt::Display for StructuredFormula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StructuredFormula::Condition {
                operator,
                left,
                right,
            } => write!(f, "{left} {} {right}", operator.binary_op()),
            StructuredFormula::Crossover { series1, series2 }
            | StructuredFormula::Crossunder { series1, series2 } => {
                write!(f, "{}({series1}, {series2})", self.function_name())
            }
            StructuredFormula::FunctionCall {
                function,
                args,
                kwargs,
            } => {
                let rendered: Vec<String> = args
                    .iter()
                    .map(ToString::to_string)
                    .chain(kwargs.iter().map(|(k, v)| format!("{k}={v}")))
                    .collect();
                write!(f, "{function}({})", rendered.join(", "))
            }
            StructuredFormula::IfThenElse {
                condition,
                true_value,
                false_value,
            } => write!(f, "if_then_else({condition}, {true_value}, {false_value})"),
        }
    }
}

impl fmt::Display for ValueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueRef::Literal(v) => write!(f, "{v}"),
            ValueRef::Sequence(name) => f.write_str(name),
            ValueRef::Indicator(name) => write!(f, "indicator({name})"),
            ValueRef::Formula(formula) => match formula.as_ref() {
                Formula::Raw(_) => write!(f, "({formula})"),
                Formula::Structured(s) => match s.as_ref() {
                    StructuredFormula::Condition { .. } => write!(f, "({formula})"),
                    _ => write!(f, "{formula}"),
                },
            },
        }
    }
}
