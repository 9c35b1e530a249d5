// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! `math` — safe arithmetic expression evaluation (T0).
//!
//! Accepts numbers, `+ - * / // **`, unary minus and parentheses.
//! Nothing else parses, so there is no way to reach names, calls or
//! anything with side effects.  Integer arithmetic stays integral until
//! an operation forces a float (`/` always does; overflow promotes).

use async_trait::async_trait;
use serde_json::{json, Value};

use haven_policy::ToolTier;

use crate::tool::{Tool, ToolOutcome};

pub struct MathTool;

#[async_trait]
impl Tool for MathTool {
    fn name(&self) -> &str {
        "math"
    }

    fn tier(&self) -> ToolTier {
        ToolTier::T0
    }

    async fn execute(&self, payload: &Value) -> ToolOutcome {
        let expr = payload
            .get("expression")
            .or_else(|| payload.get("expr"))
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or("");
        if expr.is_empty() {
            return ToolOutcome::err("missing 'expression' or 'expr'");
        }
        match eval(expr) {
            Ok(result) => ToolOutcome::ok(json!({
                "expression": expr,
                "result": result.to_json(),
            })),
            Err(e) => ToolOutcome::err(e),
        }
    }
}

// ── Evaluator ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    fn to_json(self) -> Value {
        match self {
            Number::Int(i) => json!(i),
            Number::Float(f) => json!(f),
        }
    }

    fn add(self, rhs: Self) -> Result<Self, String> {
        match (self, rhs) {
            (Number::Int(a), Number::Int(b)) => Ok(a
                .checked_add(b)
                .map(Number::Int)
                .unwrap_or(Number::Float(a as f64 + b as f64))),
            _ => Ok(Number::Float(self.as_f64() + rhs.as_f64())),
        }
    }

    fn sub(self, rhs: Self) -> Result<Self, String> {
        match (self, rhs) {
            (Number::Int(a), Number::Int(b)) => Ok(a
                .checked_sub(b)
                .map(Number::Int)
                .unwrap_or(Number::Float(a as f64 - b as f64))),
            _ => Ok(Number::Float(self.as_f64() - rhs.as_f64())),
        }
    }

    fn mul(self, rhs: Self) -> Result<Self, String> {
        match (self, rhs) {
            (Number::Int(a), Number::Int(b)) => Ok(a
                .checked_mul(b)
                .map(Number::Int)
                .unwrap_or(Number::Float(a as f64 * b as f64))),
            _ => Ok(Number::Float(self.as_f64() * rhs.as_f64())),
        }
    }

    /// True division: always a float, like `7 / 2 == 3.5`.
    fn div(self, rhs: Self) -> Result<Self, String> {
        if rhs.as_f64() == 0.0 {
            return Err("division by zero".to_string());
        }
        Ok(Number::Float(self.as_f64() / rhs.as_f64()))
    }

    /// Floor division: rounds toward negative infinity, integral when
    /// both operands are.
    fn floordiv(self, rhs: Self) -> Result<Self, String> {
        match (self, rhs) {
            (_, Number::Int(0)) => Err("division by zero".to_string()),
            (Number::Int(a), Number::Int(b)) => {
                let q = a / b;
                let floored = if a % b != 0 && (a < 0) != (b < 0) { q - 1 } else { q };
                Ok(Number::Int(floored))
            }
            _ => {
                if rhs.as_f64() == 0.0 {
                    Err("division by zero".to_string())
                } else {
                    Ok(Number::Float((self.as_f64() / rhs.as_f64()).floor()))
                }
            }
        }
    }

    fn pow(self, rhs: Self) -> Result<Self, String> {
        match (self, rhs) {
            (Number::Int(a), Number::Int(b)) if (0..=u32::MAX as i64).contains(&b) => Ok(a
                .checked_pow(b as u32)
                .map(Number::Int)
                .unwrap_or(Number::Float((a as f64).powf(b as f64)))),
            _ => Ok(Number::Float(self.as_f64().powf(rhs.as_f64()))),
        }
    }

    fn neg(self) -> Self {
        match self {
            Number::Int(i) => i.checked_neg().map(Number::Int).unwrap_or(Number::Float(-(i as f64))),
            Number::Float(f) => Number::Float(-f),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(Number),
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    LParen,
    RParen,
}

fn tokenize(expr: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = expr.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                if chars.get(i + 1) == Some(&'*') {
                    tokens.push(Token::DoubleStar);
                    i += 2;
                } else {
                    tokens.push(Token::Star);
                    i += 1;
                }
            }
            '/' => {
                if chars.get(i + 1) == Some(&'/') {
                    tokens.push(Token::DoubleSlash);
                    i += 2;
                } else {
                    tokens.push(Token::Slash);
                    i += 1;
                }
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                let mut seen_dot = false;
                while i < chars.len()
                    && (chars[i].is_ascii_digit() || (chars[i] == '.' && !seen_dot))
                {
                    if chars[i] == '.' {
                        seen_dot = true;
                    }
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number = if seen_dot {
                    text.parse::<f64>().map(Number::Float).map_err(|_| {
                        format!("invalid number: {text}")
                    })?
                } else {
                    text.parse::<i64>()
                        .map(Number::Int)
                        .or_else(|_| text.parse::<f64>().map(Number::Float))
                        .map_err(|_| format!("invalid number: {text}"))?
                };
                tokens.push(Token::Number(number));
            }
            other => return Err(format!("character not allowed: '{other}'")),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    // expr := term (('+'|'-') term)*
    fn expr(&mut self) -> Result<Number, String> {
        let mut left = self.term()?;
        while let Some(op) = self.peek().cloned() {
            match op {
                Token::Plus => {
                    self.next();
                    left = left.add(self.term()?)?;
                }
                Token::Minus => {
                    self.next();
                    left = left.sub(self.term()?)?;
                }
                _ => break,
            }
        }
        Ok(left)
    }

    // term := unary (('*'|'/'|'//') unary)*
    fn term(&mut self) -> Result<Number, String> {
        let mut left = self.unary()?;
        while let Some(op) = self.peek().cloned() {
            match op {
                Token::Star => {
                    self.next();
                    left = left.mul(self.unary()?)?;
                }
                Token::Slash => {
                    self.next();
                    left = left.div(self.unary()?)?;
                }
                Token::DoubleSlash => {
                    self.next();
                    left = left.floordiv(self.unary()?)?;
                }
                _ => break,
            }
        }
        Ok(left)
    }

    // unary := '-' unary | power
    // Unary minus binds looser than '**', so -2 ** 2 == -(2 ** 2).
    fn unary(&mut self) -> Result<Number, String> {
        if self.peek() == Some(&Token::Minus) {
            self.next();
            return Ok(self.unary()?.neg());
        }
        self.power()
    }

    // power := primary ('**' unary)?   (right-associative)
    fn power(&mut self) -> Result<Number, String> {
        let base = self.primary()?;
        if self.peek() == Some(&Token::DoubleStar) {
            self.next();
            let exponent = self.unary()?;
            return base.pow(exponent);
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Number, String> {
        match self.next() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err("missing closing parenthesis".to_string()),
                }
            }
            _ => Err("invalid expression".to_string()),
        }
    }
}

/// Evaluate a numeric expression.  Only numbers, `+ - * / // **`, unary
/// minus and parentheses are allowed.
pub fn eval(expr: &str) -> Result<Number, String> {
    let tokens = tokenize(expr)?;
    if tokens.is_empty() {
        return Err("empty expression".to_string());
    }
    let mut parser = Parser { tokens, pos: 0 };
    let result = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err("invalid expression".to_string());
    }
    Ok(result)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
