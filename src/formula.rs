//! Read/write formulas over attribute values.
//!
//! Attributes may transform values on the way in or out of PLC memory with a
//! small expression, e.g. `VALUE / 10.0` on read or
//! `VALUE and HVPS_ONC == 1` as a write guard. Expressions are parsed once
//! at configuration time into an AST; anything outside the bounded operator
//! set is rejected at load time, never at evaluation time.
//!
//! # Grammar
//!
//! ```text
//! expr    := or
//! or      := and ("or" and)*
//! and     := cmp ("and" cmp)*
//! cmp     := sum (("==" | "!=" | "<" | "<=" | ">" | ">=") sum)?
//! sum     := term (("+" | "-") term)*
//! term    := unary (("*" | "/") unary)*
//! unary   := ("-" | "not") unary | primary
//! primary := NUMBER | "true" | "false" | "VALUE" | IDENT | "(" expr ")"
//! ```
//!
//! `VALUE` is the value being read or written; any other identifier is
//! resolved through the attribute registry at evaluation time. Booleans are
//! numeric: comparisons yield 1.0/0.0 and any non-zero value is truthy.
//!
//! # Example
//!
//! ```
//! use plc_mirror::Formula;
//!
//! let f = Formula::parse("VALUE * 1.5 + 2").unwrap();
//! let v = f.eval(10.0, &|name| {
//!     Err(plc_mirror::PlcError::unknown_attribute(name))
//! }).unwrap();
//! assert_eq!(v, 17.0);
//! ```

use crate::error::{PlcError, Result};

/// Resolves a sibling attribute name to its current numeric value.
pub type Resolver<'a> = dyn Fn(&str) -> Result<f64> + 'a;

/// Binary operators of the bounded set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
}

/// Unary operators of the bounded set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Number(f64),
    ValueRef,
    AttrRef(String),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Op("+"));
                i += 1;
            }
            '-' => {
                tokens.push(Token::Op("-"));
                i += 1;
            }
            '*' => {
                tokens.push(Token::Op("*"));
                i += 1;
            }
            '/' => {
                tokens.push(Token::Op("/"));
                i += 1;
            }
            '=' | '!' | '<' | '>' => {
                let two = i + 1 < bytes.len() && bytes[i + 1] == b'=';
                let op = match (c, two) {
                    ('=', true) => "==",
                    ('!', true) => "!=",
                    ('<', true) => "<=",
                    ('>', true) => ">=",
                    ('<', false) => "<",
                    ('>', false) => ">",
                    _ => {
                        return Err(PlcError::formula(format!(
                            "unexpected character '{c}' in '{text}'"
                        )))
                    }
                };
                tokens.push(Token::Op(op));
                i += if two { 2 } else { 1 };
            }
            '0'..='9' | '.' => {
                let start = i;
                while i < bytes.len()
                    && ((bytes[i] as char).is_ascii_digit() || bytes[i] == b'.')
                {
                    i += 1;
                }
                let num = text[start..i]
                    .parse::<f64>()
                    .map_err(|_| PlcError::formula(format!("bad number in '{text}'")))?;
                tokens.push(Token::Number(num));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < bytes.len()
                    && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] == b'_')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(text[start..i].to_string()));
            }
            _ => {
                return Err(PlcError::formula(format!(
                    "unexpected character '{c}' in '{text}'"
                )))
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    text: &'a str,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Some(Token::Op(o)) if *o == op) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn eat_ident(&mut self, word: &str) -> bool {
        if matches!(self.peek(), Some(Token::Ident(w)) if w == word) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn expr(&mut self) -> Result<Expr> {
        self.or()
    }

    fn or(&mut self) -> Result<Expr> {
        let mut lhs = self.and()?;
        while self.eat_ident("or") {
            let rhs = self.and()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr> {
        let mut lhs = self.cmp()?;
        while self.eat_ident("and") {
            let rhs = self.cmp()?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn cmp(&mut self) -> Result<Expr> {
        let lhs = self.sum()?;
        for (op, bin) in [
            ("==", BinOp::Eq),
            ("!=", BinOp::Ne),
            ("<=", BinOp::Le),
            (">=", BinOp::Ge),
            ("<", BinOp::Lt),
            (">", BinOp::Gt),
        ] {
            if self.eat_op(op) {
                let rhs = self.sum()?;
                return Ok(Expr::Binary(bin, Box::new(lhs), Box::new(rhs)));
            }
        }
        Ok(lhs)
    }

    fn sum(&mut self) -> Result<Expr> {
        let mut lhs = self.term()?;
        loop {
            if self.eat_op("+") {
                let rhs = self.term()?;
                lhs = Expr::Binary(BinOp::Add, Box::new(lhs), Box::new(rhs));
            } else if self.eat_op("-") {
                let rhs = self.term()?;
                lhs = Expr::Binary(BinOp::Sub, Box::new(lhs), Box::new(rhs));
            } else {
                return Ok(lhs);
            }
        }
    }

    fn term(&mut self) -> Result<Expr> {
        let mut lhs = self.unary()?;
        loop {
            if self.eat_op("*") {
                let rhs = self.unary()?;
                lhs = Expr::Binary(BinOp::Mul, Box::new(lhs), Box::new(rhs));
            } else if self.eat_op("/") {
                let rhs = self.unary()?;
                lhs = Expr::Binary(BinOp::Div, Box::new(lhs), Box::new(rhs));
            } else {
                return Ok(lhs);
            }
        }
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.eat_op("-") {
            return Ok(Expr::Unary(UnOp::Neg, Box::new(self.unary()?)));
        }
        if self.eat_ident("not") {
            return Ok(Expr::Unary(UnOp::Not, Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.bump() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Ident(word)) => match word.as_str() {
                "VALUE" => Ok(Expr::ValueRef),
                "true" => Ok(Expr::Number(1.0)),
                "false" => Ok(Expr::Number(0.0)),
                _ => Ok(Expr::AttrRef(word)),
            },
            Some(Token::LParen) => {
                let inner = self.expr()?;
                if !matches!(self.bump(), Some(Token::RParen)) {
                    return Err(PlcError::formula(format!(
                        "missing ')' in '{}'",
                        self.text
                    )));
                }
                Ok(inner)
            }
            other => Err(PlcError::formula(format!(
                "unexpected token {other:?} in '{}'",
                self.text
            ))),
        }
    }
}

fn truthy(v: f64) -> bool {
    v != 0.0
}

fn eval_expr(expr: &Expr, value: f64, resolve: &Resolver<'_>) -> Result<f64> {
    Ok(match expr {
        Expr::Number(n) => *n,
        Expr::ValueRef => value,
        Expr::AttrRef(name) => resolve(name)?,
        Expr::Unary(op, inner) => {
            let v = eval_expr(inner, value, resolve)?;
            match op {
                UnOp::Neg => -v,
                UnOp::Not => f64::from(!truthy(v)),
            }
        }
        Expr::Binary(op, lhs, rhs) => {
            let l = eval_expr(lhs, value, resolve)?;
            // `and`/`or` short-circuit so a broken reference on the dead
            // branch does not fail the whole formula.
            match op {
                BinOp::And => {
                    return Ok(if !truthy(l) {
                        0.0
                    } else {
                        f64::from(truthy(eval_expr(rhs, value, resolve)?))
                    })
                }
                BinOp::Or => {
                    return Ok(if truthy(l) {
                        1.0
                    } else {
                        f64::from(truthy(eval_expr(rhs, value, resolve)?))
                    })
                }
                _ => {}
            }
            let r = eval_expr(rhs, value, resolve)?;
            match op {
                BinOp::Eq => f64::from(l == r),
                BinOp::Ne => f64::from(l != r),
                BinOp::Lt => f64::from(l < r),
                BinOp::Le => f64::from(l <= r),
                BinOp::Gt => f64::from(l > r),
                BinOp::Ge => f64::from(l >= r),
                BinOp::Add => l + r,
                BinOp::Sub => l - r,
                BinOp::Mul => l * r,
                BinOp::Div => {
                    if r == 0.0 {
                        return Err(PlcError::formula("division by zero"));
                    }
                    l / r
                }
                BinOp::And | BinOp::Or => unreachable!("handled above"),
            }
        }
    })
}

/// A parsed formula, evaluated against `VALUE` and sibling attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    expr: Expr,
    text: String,
}

impl Formula {
    /// Parses a formula, rejecting anything outside the bounded operator set.
    ///
    /// # Errors
    ///
    /// Returns `PlcError::FormulaEval` describing the first offending token.
    pub fn parse(text: &str) -> Result<Self> {
        let tokens = tokenize(text)?;
        if tokens.is_empty() {
            return Err(PlcError::formula("empty formula"));
        }
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            text,
        };
        let expr = parser.expr()?;
        if parser.pos != tokens.len() {
            return Err(PlcError::formula(format!(
                "trailing tokens after expression in '{text}'"
            )));
        }
        Ok(Self {
            expr,
            text: text.to_string(),
        })
    }

    /// Evaluates the formula with `VALUE = value`.
    ///
    /// Sibling attribute references resolve through `resolve`; a failed
    /// resolution fails only this evaluation.
    pub fn eval(&self, value: f64, resolve: &Resolver<'_>) -> Result<f64> {
        eval_expr(&self.expr, value, resolve)
    }

    /// Evaluates the formula as a predicate (non-zero is true).
    pub fn eval_bool(&self, value: f64, resolve: &Resolver<'_>) -> Result<bool> {
        Ok(truthy(self.eval(value, resolve)?))
    }

    /// Returns the original formula text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Returns the sibling attribute names this formula references.
    pub fn references(&self) -> Vec<String> {
        fn walk(expr: &Expr, out: &mut Vec<String>) {
            match expr {
                Expr::AttrRef(name) => {
                    if !out.contains(name) {
                        out.push(name.clone());
                    }
                }
                Expr::Unary(_, inner) => walk(inner, out),
                Expr::Binary(_, l, r) => {
                    walk(l, out);
                    walk(r, out);
                }
                Expr::Number(_) | Expr::ValueRef => {}
            }
        }
        let mut out = Vec::new();
        walk(&self.expr, &mut out);
        out
    }
}

impl std::fmt::Display for Formula {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_attrs(name: &str) -> Result<f64> {
        Err(PlcError::unknown_attribute(name))
    }

    fn eval(text: &str, value: f64) -> f64 {
        Formula::parse(text).unwrap().eval(value, &no_attrs).unwrap()
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval("VALUE * 1.5 + 2", 10.0), 17.0);
        assert_eq!(eval("VALUE / 4", 10.0), 2.5);
        assert_eq!(eval("-VALUE", 3.0), -3.0);
        assert_eq!(eval("(VALUE + 1) * 2", 3.0), 8.0);
    }

    #[test]
    fn test_precedence() {
        assert_eq!(eval("2 + 3 * 4", 0.0), 14.0);
        assert_eq!(eval("10 - 4 - 3", 0.0), 3.0);
    }

    #[test]
    fn test_comparisons_and_logic() {
        assert_eq!(eval("VALUE > 5", 10.0), 1.0);
        assert_eq!(eval("VALUE > 5 and VALUE < 8", 10.0), 0.0);
        assert_eq!(eval("VALUE == 10 or VALUE == 20", 10.0), 1.0);
        assert_eq!(eval("not VALUE", 0.0), 1.0);
        assert_eq!(eval("not VALUE", 2.0), 0.0);
        assert_eq!(eval("true and false", 0.0), 0.0);
    }

    #[test]
    fn test_attr_reference_resolution() {
        let f = Formula::parse("VALUE and HVPS_ONC == 1").unwrap();
        let resolve = |name: &str| -> Result<f64> {
            match name {
                "HVPS_ONC" => Ok(1.0),
                other => Err(PlcError::unknown_attribute(other)),
            }
        };
        assert_eq!(f.eval(1.0, &resolve).unwrap(), 1.0);
        assert_eq!(f.eval(0.0, &resolve).unwrap(), 0.0);
    }

    #[test]
    fn test_short_circuit_skips_dead_branch() {
        let f = Formula::parse("VALUE and MISSING > 0").unwrap();
        // VALUE = 0 short-circuits before MISSING is resolved.
        assert_eq!(f.eval(0.0, &no_attrs).unwrap(), 0.0);
        assert!(f.eval(1.0, &no_attrs).is_err());
    }

    #[test]
    fn test_references() {
        let f = Formula::parse("A and (B or A) and VALUE > 2").unwrap();
        assert_eq!(f.references(), vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn test_rejected_at_parse_time() {
        assert!(Formula::parse("").is_err());
        assert!(Formula::parse("VALUE %").is_err());
        assert!(Formula::parse("VALUE + ").is_err());
        assert!(Formula::parse("(VALUE").is_err());
        assert!(Formula::parse("VALUE 3").is_err());
        assert!(Formula::parse("import os").is_err());
    }

    #[test]
    fn test_division_by_zero_fails_evaluation() {
        let f = Formula::parse("VALUE / 0").unwrap();
        assert!(matches!(
            f.eval(1.0, &no_attrs),
            Err(PlcError::FormulaEval { .. })
        ));
    }

    #[test]
    fn test_unknown_reference_fails_evaluation_only() {
        // Parses fine, fails at eval: the attribute registry decides names.
        let f = Formula::parse("GHOST + 1").unwrap();
        assert!(matches!(
            f.eval(0.0, &no_attrs),
            Err(PlcError::UnknownAttribute { .. })
        ));
    }

    #[test]
    fn test_display_round_trip() {
        let f = Formula::parse("VALUE / 10").unwrap();
        assert_eq!(f.to_string(), "VALUE / 10");
    }
}
