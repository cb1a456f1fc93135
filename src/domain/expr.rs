//! Expression AST for raw textual formulas.
//!
//! - `Number` / `Bool`: literals (booleans are 1.0 / 0.0 at evaluation)
//! - `Ident`: a named input sequence
//! - `Call`: a function library call with positional and keyword arguments
//! - `Unary` / `Binary`: operators from `value`

use crate::domain::value::{BinaryOp, UnaryOp};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Bool(bool),
    Ident(String),
    Call {
        name: String,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

impl Expr {
    /// Height of the tree; a leaf has depth 1.
    pub fn depth(&self) -> usize {
        match self {
            Expr::Number(_) | Expr::Bool(_) | Expr::Ident(_) => 1,
            Expr::Call { args, kwargs, .. } => {
                1 + args
                    .iter()
                    .chain(kwargs.iter().map(|(_, e)| e))
                    .map(Expr::depth)
                    .max()
                    .unwrap_or(0)
            }
            Expr::Unary { operand, .. } => 1 + operand.depth(),
            Expr::Binary { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }

    /// Every sequence name the expression reads.
    pub fn identifiers(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.walk(&mut |e| {
            if let Expr::Ident(name) = e {
                out.insert(name.as_str());
            }
        });
        out
    }

    /// Every function name the expression calls.
    pub fn functions(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.walk(&mut |e| {
            if let Expr::Call { name, .. } = e {
                out.insert(name.as_str());
            }
        });
        out
    }

    fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Expr)) {
        visit(self);
        match self {
            Expr::Number(_) | Expr::Bool(_) | Expr::Ident(_) => {}
            Expr::Call { args, kwargs, .. } => {
                for arg in args {
                    arg.walk(visit);
                }
                for (_, arg) in kwargs {
                    arg.walk(visit);
                }
            }
            Expr::Unary { operand, .. } => operand.walk(visit),
            Expr::Binary { left, right, .. } => {
                left.walk(visit);
                right.walk(visit);
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(n) => write!(f, "{n}"),
            Expr::Bool(b) => write!(f, "{b}"),
            Expr::Ident(name) => f.write_str(name),
            Expr::Call { name, args, kwargs } => {
                write!(f, "{name}(")?;
                let mut first = true;
                for arg in args {
                    if !first {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                    first = false;
                }
                for (key, arg) in kwargs {
                    if !first {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}={arg}")?;
                    first = false;
                }
                f.write_str(")")
            }
            Expr::Unary { op, operand } => {
                let prefix = match op {
                    UnaryOp::Neg => "-",
                    UnaryOp::Not => "not ",
                };
                match operand.as_ref() {
                    Expr::Binary { .. } => write!(f, "{prefix}({operand})"),
                    _ => write!(f, "{prefix}{operand}"),
                }
            }
            Expr::Binary { op, left, right } => {
                fmt_operand(f, left)?;
                write!(f, " {op} ")?;
                fmt_operand(f, right)
            }
        }
    }
}

fn fmt_operand(f: &mut fmt::Formatter<'_>, e: &Expr) -> fmt::Result {
    match e {
        Expr::Binary { .. } => write!(f, "({e})"),
        _ => write!(f, "{e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(name: &str) -> Expr {
        Expr::Ident(name.into())
    }

    fn sma(series: &str, period: f64) -> Expr {
        Expr::Call {
            name: "sma".into(),
            args: vec![ident(series), Expr::Number(period)],
            kwargs: vec![],
        }
    }

    fn golden_cross() -> Expr {
        Expr::Binary {
            op: BinaryOp::And,
            left: Box::new(Expr::Binary {
                op: BinaryOp::Gt,
                left: Box::new(sma("close", 5.0)),
                right: Box::new(sma("close", 20.0)),
            }),
            right: Box::new(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(ident("halted")),
            }),
        }
    }

    #[test]
    fn depth_counts_levels() {
        assert_eq!(Expr::Number(1.0).depth(), 1);
        assert_eq!(sma("close", 5.0).depth(), 2);
        assert_eq!(golden_cross().depth(), 4);
    }

    #[test]
    fn collects_identifiers_and_functions() {
        let expr = golden_cross();
        assert_eq!(
            expr.identifiers().into_iter().collect::<Vec<_>>(),
            vec!["close", "halted"]
        );
        assert_eq!(expr.functions().into_iter().collect::<Vec<_>>(), vec!["sma"]);
    }

    #[test]
    fn display_is_readable() {
        assert_eq!(
            golden_cross().to_string(),
            "(sma(close, 5) > sma(close, 20)) and not halted"
        );
        let call = Expr::Call {
            name: "rsi".into(),
            args: vec![ident("close")],
            kwargs: vec![("period".into(), Expr::Number(14.0))],
        };
        assert_eq!(call.to_string(), "rsi(close, period=14)");
    }
}
