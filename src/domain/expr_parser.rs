//! Raw expression parser.
//!
//! Recursive descent parser for the formula expression grammar. Converts text
//! to an `Expr` AST with error messages carrying the character offset and the
//! expected/found tokens.
//!
//! Precedence, lowest first:
//!
//! ```text
//! or    := and (("or" | "||" | "|") and)*
//! and   := not (("and" | "&&" | "&") not)*
//! not   := ("not" | "!") not | cmp
//! cmp   := sum (("<=" | ">=" | "==" | "!=" | "<" | ">") sum)?
//! sum   := term (("+" | "-") term)*
//! term  := unary (("*" | "/") unary)*
//! unary := "-" unary | primary
//! primary := number | "true" | "false" | ident | ident "(" args ")" | "(" or ")"
//! args  := [arg ("," arg)*]        arg := ident "=" or | or
//! ```
//!
//! Comparisons do not chain. There is no attribute access, no string literal
//! and no assignment.

use crate::domain::error::{EvalError, ParseError};
use crate::domain::expr::Expr;
use crate::domain::value::{BinaryOp, UnaryOp};

const RESERVED: &[&str] = &["and", "or", "not", "true", "false"];

struct Parser<'a> {
    input: &'a str,
    pos: usize,
    depth: usize,
    max_depth: usize,
    too_deep: bool,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str, max_depth: usize) -> Self {
        Self {
            input,
            pos: 0,
            depth: 0,
            max_depth,
            too_deep: false,
        }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            position: self.pos,
        }
    }

    fn expect_char(&mut self, expected: char) -> Result<(), ParseError> {
        self.skip_whitespace();
        match self.peek() {
            Some(ch) if ch == expected => {
                self.advance();
                Ok(())
            }
            Some(ch) => Err(self.error(format!("expected '{}', found '{}'", expected, ch))),
            None => Err(self.error(format!("expected '{}', found end of input", expected))),
        }
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        let remaining = self.remaining();
        remaining.starts_with(keyword)
            && !remaining[keyword.len()..]
                .chars()
                .next()
                .is_some_and(|c| c.is_alphanumeric() || c == '_')
    }

    fn consume_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.pos += keyword.len();
            true
        } else {
            false
        }
    }

    /// Consume `symbol` unless it is immediately followed by a char in `not_before`.
    fn consume_symbol(&mut self, symbol: &str, not_before: &[char]) -> bool {
        let remaining = self.remaining();
        if remaining.starts_with(symbol)
            && !remaining[symbol.len()..]
                .chars()
                .next()
                .is_some_and(|c| not_before.contains(&c))
        {
            self.pos += symbol.len();
            true
        } else {
            false
        }
    }

    fn peek_word(&self) -> String {
        let word: String = self
            .remaining()
            .chars()
            .take_while(|ch| ch.is_alphanumeric() || *ch == '_')
            .collect();
        if word.is_empty() {
            self.peek()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "end of input".to_string())
        } else {
            word
        }
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > self.max_depth {
            self.too_deep = true;
            return Err(self.error(format!(
                "expression nested deeper than {} levels",
                self.max_depth
            )));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.enter()?;
        let expr = self.parse_or();
        self.leave();
        expr
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and()?;
        loop {
            self.skip_whitespace();
            if !(self.consume_keyword("or")
                || self.consume_symbol("||", &[])
                || self.consume_symbol("|", &[]))
            {
                return Ok(left);
            }
            let right = self.parse_and()?;
            left = binary(BinaryOp::Or, left, right);
        }
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_not()?;
        loop {
            self.skip_whitespace();
            if !(self.consume_keyword("and")
                || self.consume_symbol("&&", &[])
                || self.consume_symbol("&", &[]))
            {
                return Ok(left);
            }
            let right = self.parse_not()?;
            left = binary(BinaryOp::And, left, right);
        }
    }

    fn parse_not(&mut self) -> Result<Expr, ParseError> {
        self.skip_whitespace();
        if self.consume_keyword("not") || self.consume_symbol("!", &['=']) {
            self.enter()?;
            let operand = self.parse_not();
            self.leave();
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand?),
            });
        }
        self.parse_comparison()
    }

    fn comparison_op(&mut self) -> Option<BinaryOp> {
        self.skip_whitespace();
        const OPS: [(&str, BinaryOp); 6] = [
            ("<=", BinaryOp::Le),
            (">=", BinaryOp::Ge),
            ("==", BinaryOp::Eq),
            ("!=", BinaryOp::Ne),
            ("<", BinaryOp::Lt),
            (">", BinaryOp::Gt),
        ];
        for (symbol, op) in OPS {
            if self.consume_symbol(symbol, &[]) {
                return Some(op);
            }
        }
        None
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_sum()?;
        let Some(op) = self.comparison_op() else {
            return Ok(left);
        };
        let right = self.parse_sum()?;

        let checkpoint = self.pos;
        if self.comparison_op().is_some() {
            self.pos = checkpoint;
            self.skip_whitespace();
            return Err(self.error("comparison operators cannot be chained"));
        }
        self.pos = checkpoint;
        Ok(binary(op, left, right))
    }

    fn parse_sum(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_term()?;
        loop {
            self.skip_whitespace();
            let op = if self.consume_symbol("+", &[]) {
                BinaryOp::Add
            } else if self.consume_symbol("-", &[]) {
                BinaryOp::Sub
            } else {
                return Ok(left);
            };
            let right = self.parse_term()?;
            left = binary(op, left, right);
        }
    }

    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            self.skip_whitespace();
            let op = if self.consume_symbol("*", &[]) {
                BinaryOp::Mul
            } else if self.consume_symbol("/", &[]) {
                BinaryOp::Div
            } else {
                return Ok(left);
            };
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        self.skip_whitespace();
        if self.consume_symbol("-", &[]) {
            self.enter()?;
            let operand = self.parse_unary();
            self.leave();
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand?),
            });
        }
        self.parse_primary()
    }

    fn parse_number(&mut self) -> Result<f64, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        let mut has_dot = false;
        let mut digits = 0;

        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                digits += 1;
                self.advance();
            } else if ch == '.' && !has_dot {
                has_dot = true;
                self.advance();
            } else {
                break;
            }
        }

        if digits == 0 {
            return Err(ParseError {
                message: "expected number".to_string(),
                position: start,
            });
        }

        let num_str = &self.input[start..self.pos];
        num_str.parse::<f64>().map_err(|_| ParseError {
            message: format!("invalid number: {}", num_str),
            position: start,
        })
    }

    fn parse_identifier(&mut self) -> Result<String, ParseError> {
        self.skip_whitespace();
        match self.peek() {
            Some(ch) if ch.is_ascii_alphabetic() || ch == '_' => {}
            _ => {
                return Err(self.error(format!("expected expression, found '{}'", self.peek_word())));
            }
        }
        let word: String = self
            .remaining()
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .collect();
        self.pos += word.len();
        Ok(word)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        self.skip_whitespace();

        match self.peek() {
            None => Err(self.error("expected expression, found end of input")),
            Some(ch) if ch.is_ascii_digit() || ch == '.' => Ok(Expr::Number(self.parse_number()?)),
            Some('(') => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect_char(')')?;
                Ok(inner)
            }
            Some('"') | Some('\'') => Err(self.error("string literals are not supported")),
            Some(_) => {
                if self.consume_keyword("true") {
                    return Ok(Expr::Bool(true));
                }
                if self.consume_keyword("false") {
                    return Ok(Expr::Bool(false));
                }
                let start = self.pos;
                let name = self.parse_identifier()?;
                if RESERVED.contains(&name.as_str()) {
                    return Err(ParseError {
                        message: format!("unexpected keyword '{}'", name),
                        position: start,
                    });
                }
                self.skip_whitespace();
                if self.peek() == Some('(') {
                    self.advance();
                    self.parse_call(name)
                } else {
                    Ok(Expr::Ident(name))
                }
            }
        }
    }

    /// Arguments of a call whose opening parenthesis is already consumed.
    fn parse_call(&mut self, name: String) -> Result<Expr, ParseError> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();

        self.skip_whitespace();
        if self.peek() == Some(')') {
            self.advance();
            return Ok(Expr::Call { name, args, kwargs });
        }

        loop {
            self.skip_whitespace();
            let checkpoint = self.pos;
            let keyword = match self.parse_identifier() {
                Ok(word) => {
                    self.skip_whitespace();
                    if self.consume_symbol("=", &['=']) {
                        Some(word)
                    } else {
                        self.pos = checkpoint;
                        None
                    }
                }
                Err(_) => {
                    self.pos = checkpoint;
                    None
                }
            };

            let arg_pos = self.pos;
            let value = self.parse_expr()?;
            match keyword {
                Some(key) => {
                    if kwargs.iter().any(|(k, _)| *k == key) {
                        return Err(ParseError {
                            message: format!("keyword argument '{}' repeated", key),
                            position: checkpoint,
                        });
                    }
                    kwargs.push((key, value));
                }
                None if !kwargs.is_empty() => {
                    return Err(ParseError {
                        message: "positional argument follows keyword argument".to_string(),
                        position: arg_pos,
                    });
                }
                None => args.push(value),
            }

            self.skip_whitespace();
            match self.peek() {
                Some(',') => {
                    self.advance();
                }
                Some(')') => {
                    self.advance();
                    return Ok(Expr::Call { name, args, kwargs });
                }
                Some(ch) => return Err(self.error(format!("expected ',' or ')', found '{}'", ch))),
                None => return Err(self.error("expected ')', found end of input")),
            }
        }
    }

    fn parse(&mut self) -> Result<Expr, ParseError> {
        let expr = self.parse_expr()?;
        self.skip_whitespace();
        if self.pos < self.input.len() {
            return Err(self.error(format!(
                "unexpected input after expression: '{}'",
                self.remaining()
            )));
        }
        Ok(expr)
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

/// Parse `input`, refusing nesting deeper than `max_depth`.
///
/// Syntax errors surface as `EvalError::Parse`; excessive nesting as
/// `EvalError::FormulaTooDeep`.
pub fn parse(input: &str, max_depth: usize) -> Result<Expr, EvalError> {
    let mut parser = Parser::new(input, max_depth);
    match parser.parse() {
        Ok(expr) => Ok(expr),
        Err(_) if parser.too_deep => Err(EvalError::FormulaTooDeep { limit: max_depth }),
        Err(err) => Err(EvalError::Parse(err)),
    }
}
