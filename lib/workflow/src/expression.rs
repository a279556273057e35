//! Guard expressions.
//!
//! A small language used by connection guards, `condition` and `loop`
//! nodes, `switch` discriminants, and `transform` nodes:
//!
//! ```text
//! or      := and (("||" | "or") and)*
//! and     := not (("&&" | "and") not)*
//! not     := ("!" | "not") not | compare
//! compare := sum (("==" | "!=" | "<" | "<=" | ">" | ">=" | "contains" | "in") sum)?
//! sum     := product (("+" | "-") product)*
//! product := unary (("*" | "/") unary)*
//! unary   := "-" unary | primary
//! primary := number | string | true | false | null | undefined | path | "(" or ")"
//! ```
//!
//! Evaluation never fails. Missing variables and type mismatches produce
//! [`Value::Undefined`], which is falsy and renders as an empty string.

use crate::error::ExpressionError;
use serde_json::{Map, Number, Value as JsonValue};
use std::fmt;

/// Read access to variables by dotted path.
pub trait Variables {
    /// Resolves a dotted path such as `nlu.confidence`.
    fn get_path(&self, path: &str) -> Option<&JsonValue>;
}

impl Variables for JsonValue {
    fn get_path(&self, path: &str) -> Option<&JsonValue> {
        walk(self, path)
    }
}

/// Walks a dotted path into a JSON value. Numeric segments index arrays.
pub fn walk<'a>(root: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    path.split('.').try_fold(root, |current, segment| match current {
        JsonValue::Object(map) => map.get(segment),
        JsonValue::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Runtime value of an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A missing variable or the result of a type error.
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<JsonValue>),
    Map(Map<String, JsonValue>),
}

impl Value {
    /// Truthiness used by guards and conditions.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::String(s) => !s.is_empty(),
            Self::List(items) => !items.is_empty(),
            Self::Map(_) => true,
        }
    }

    /// Returns true for [`Value::Undefined`].
    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Text used when the value is interpolated into a template.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Undefined | Self::Null => String::new(),
            Self::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Converts the value to JSON. `Undefined` becomes `null`.
    #[must_use]
    pub fn into_json(self) -> JsonValue {
        match self {
            Self::Undefined | Self::Null => JsonValue::Null,
            Self::Bool(b) => JsonValue::Bool(b),
            Self::Number(n) => number_to_json(n),
            Self::String(s) => JsonValue::String(s),
            Self::List(items) => JsonValue::Array(items),
            Self::Map(map) => JsonValue::Object(map),
        }
    }

    /// Equality as the `==` operator sees it: `undefined == null`, and
    /// numbers equal their numeric strings.
    #[must_use]
    pub fn loosely_equals(&self, other: &Value) -> bool {
        loose_eq(self, other)
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::String(s) => s.trim().parse().ok(),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }
}

impl From<JsonValue> for Value {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(b),
            JsonValue::Number(n) => n.as_f64().map_or(Self::Undefined, Self::Number),
            JsonValue::String(s) => Self::String(s),
            JsonValue::Array(items) => Self::List(items),
            JsonValue::Object(map) => Self::Map(map),
        }
    }
}

impl From<&JsonValue> for Value {
    fn from(value: &JsonValue) -> Self {
        Self::from(value.clone())
    }
}

fn number_to_json(n: f64) -> JsonValue {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        JsonValue::from(n as i64)
    } else {
        Number::from_f64(n).map_or(JsonValue::Null, JsonValue::Number)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{n}")
                }
            }
            Self::String(s) => write!(f, "{s:?}"),
            Self::List(items) => write!(f, "{}", JsonValue::Array(items.clone())),
            Self::Map(map) => write!(f, "{}", JsonValue::Object(map.clone())),
        }
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    And,
    Or,
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    Contains,
    In,
    Add,
    Subtract,
    Multiply,
    Divide,
}

/// A parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Value),
    Path(String),
    Not(Box<Expression>),
    Negate(Box<Expression>),
    Binary(BinaryOp, Box<Expression>, Box<Expression>),
}

impl Expression {
    /// Parses an expression.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first syntax problem found.
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(ExpressionError::Empty);
        }
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.or()?;
        match parser.tokens.get(parser.pos) {
            None => Ok(expr),
            Some(token) => Err(token.unexpected()),
        }
    }

    /// Evaluates the expression against a set of variables.
    #[must_use]
    pub fn evaluate(&self, vars: &dyn Variables) -> Value {
        match self {
            Self::Literal(value) => value.clone(),
            Self::Path(path) => vars.get_path(path).map_or(Value::Undefined, Value::from),
            Self::Not(inner) => Value::Bool(!inner.evaluate(vars).is_truthy()),
            Self::Negate(inner) => match inner.evaluate(vars).as_number() {
                Some(n) => Value::Number(-n),
                None => Value::Undefined,
            },
            Self::Binary(BinaryOp::And, lhs, rhs) => {
                Value::Bool(lhs.evaluate(vars).is_truthy() && rhs.evaluate(vars).is_truthy())
            }
            Self::Binary(BinaryOp::Or, lhs, rhs) => {
                Value::Bool(lhs.evaluate(vars).is_truthy() || rhs.evaluate(vars).is_truthy())
            }
            Self::Binary(op, lhs, rhs) => binary(*op, lhs.evaluate(vars), rhs.evaluate(vars)),
        }
    }

    /// Variable paths referenced by the expression.
    #[must_use]
    pub fn paths(&self) -> Vec<&str> {
        let mut paths = Vec::new();
        self.collect_paths(&mut paths);
        paths
    }

    fn collect_paths<'a>(&'a self, paths: &mut Vec<&'a str>) {
        match self {
            Self::Literal(_) => {}
            Self::Path(path) => paths.push(path),
            Self::Not(inner) | Self::Negate(inner) => inner.collect_paths(paths),
            Self::Binary(_, lhs, rhs) => {
                lhs.collect_paths(paths);
                rhs.collect_paths(paths);
            }
        }
    }
}

/// Parses and evaluates in one step.
///
/// # Errors
///
/// Returns an error if the expression does not parse.
pub fn evaluate(source: &str, vars: &dyn Variables) -> Result<Value, ExpressionError> {
    Ok(Expression::parse(source)?.evaluate(vars))
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Value {
    match op {
        BinaryOp::Equal => Value::Bool(loose_eq(&lhs, &rhs)),
        BinaryOp::NotEqual => Value::Bool(loose_ne(&lhs, &rhs)),
        BinaryOp::Less => compare(&lhs, &rhs, |o| o.is_lt()),
        BinaryOp::LessOrEqual => compare(&lhs, &rhs, |o| o.is_le()),
        BinaryOp::Greater => compare(&lhs, &rhs, |o| o.is_gt()),
        BinaryOp::GreaterOrEqual => compare(&lhs, &rhs, |o| o.is_ge()),
        BinaryOp::Contains => Value::Bool(contains(&lhs, &rhs)),
        BinaryOp::In => Value::Bool(contains(&rhs, &lhs)),
        BinaryOp::Add => match (&lhs, &rhs) {
            (Value::Undefined, _) | (_, Value::Undefined) => Value::Undefined,
            (Value::Number(a), Value::Number(b)) => Value::Number(a + b),
            (Value::String(_), _) | (_, Value::String(_)) => {
                Value::String(format!("{}{}", lhs.render(), rhs.render()))
            }
            _ => arithmetic(&lhs, &rhs, |a, b| Some(a + b)),
        },
        BinaryOp::Subtract => arithmetic(&lhs, &rhs, |a, b| Some(a - b)),
        BinaryOp::Multiply => arithmetic(&lhs, &rhs, |a, b| Some(a * b)),
        BinaryOp::Divide => arithmetic(&lhs, &rhs, |a, b| (b != 0.0).then(|| a / b)),
        BinaryOp::And | BinaryOp::Or => Value::Undefined,
    }
}

fn loose_eq(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
        (Value::Undefined, _) | (_, Value::Undefined) => false,
        (Value::Number(a), Value::String(_)) => rhs.as_number() == Some(*a),
        (Value::String(_), Value::Number(b)) => lhs.as_number() == Some(*b),
        (a, b) => a == b,
    }
}

/// `!=` with an `Undefined` side is false, like any comparison with a missing
/// variable.
fn loose_ne(lhs: &Value, rhs: &Value) -> bool {
    !lhs.is_undefined() && !rhs.is_undefined() && !loose_eq(lhs, rhs)
}

fn compare(lhs: &Value, rhs: &Value, accept: fn(std::cmp::Ordering) -> bool) -> Value {
    let ordering = match (lhs, rhs) {
        (Value::String(a), Value::String(b)) => match (lhs.as_number(), rhs.as_number()) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => Some(a.cmp(b)),
        },
        (Value::Number(_) | Value::String(_), Value::Number(_) | Value::String(_)) => {
            match (lhs.as_number(), rhs.as_number()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            }
        }
        _ => None,
    };
    Value::Bool(ordering.is_some_and(accept))
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match (haystack, needle) {
        (Value::String(h), Value::String(n)) => h.contains(n.as_str()),
        (Value::String(h), Value::Number(_)) => h.contains(&needle.to_string()),
        (Value::List(items), needle) if !needle.is_undefined() => items
            .iter()
            .any(|item| loose_eq(&Value::from(item), needle)),
        (Value::Map(map), Value::String(key)) => map.contains_key(key),
        _ => false,
    }
}

fn arithmetic(lhs: &Value, rhs: &Value, apply: fn(f64, f64) -> Option<f64>) -> Value {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => {
            apply(*a, *b).map_or(Value::Undefined, Value::Number)
        }
        (Value::Number(_) | Value::String(_), Value::Number(_) | Value::String(_)) => {
            match (lhs.as_number(), rhs.as_number()) {
                (Some(a), Some(b)) => apply(a, b).map_or(Value::Undefined, Value::Number),
                _ => Value::Undefined,
            }
        }
        _ => Value::Undefined,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Number(f64),
    Str(String),
    Ident(String),
    Symbol(&'static str),
    LParen,
    RParen,
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

impl Token {
    fn unexpected(&self) -> ExpressionError {
        let token = match &self.kind {
            TokenKind::Number(n) => n.to_string(),
            TokenKind::Str(s) => format!("{s:?}"),
            TokenKind::Ident(id) => id.clone(),
            TokenKind::Symbol(sym) => (*sym).to_string(),
            TokenKind::LParen => "(".to_string(),
            TokenKind::RParen => ")".to_string(),
        };
        ExpressionError::UnexpectedToken {
            token,
            offset: self.offset,
        }
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(&self.kind, TokenKind::Ident(id) if id == keyword)
    }

    fn is_symbol(&self, symbol: &str) -> bool {
        matches!(&self.kind, TokenKind::Symbol(sym) if *sym == symbol)
    }
}

const SYMBOLS: &[&str] = &[
    "==", "!=", "<=", ">=", "&&", "||", "<", ">", "!", "+", "-", "*", "/", "=",
];

fn tokenize(source: &str) -> Result<Vec<Token>, ExpressionError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while let Some(&(offset, ch)) = chars.get(i) {
        if ch.is_whitespace() {
            i += 1;
            continue;
        }

        let kind = if ch == '(' {
            i += 1;
            TokenKind::LParen
        } else if ch == ')' {
            i += 1;
            TokenKind::RParen
        } else if ch == '\'' || ch == '"' {
            let mut text = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None => return Err(ExpressionError::UnterminatedString { offset }),
                    Some(&(_, '\\')) => {
                        if let Some(&(_, escaped)) = chars.get(i + 1) {
                            text.push(escaped);
                        }
                        i += 2;
                    }
                    Some(&(_, c)) if c == ch => {
                        i += 1;
                        break;
                    }
                    Some(&(_, c)) => {
                        text.push(c);
                        i += 1;
                    }
                }
            }
            TokenKind::Str(text)
        } else if ch.is_ascii_digit() {
            let start = i;
            while chars
                .get(i)
                .is_some_and(|&(_, c)| c.is_ascii_digit() || c == '.')
            {
                i += 1;
            }
            let text: String = chars[start..i].iter().map(|&(_, c)| c).collect();
            let value: f64 = text
                .parse()
                .map_err(|_| ExpressionError::UnexpectedToken {
                    token: text.clone(),
                    offset,
                })?;
            TokenKind::Number(value)
        } else if ch.is_alphabetic() || ch == '_' || ch == '$' {
            let start = i;
            while chars
                .get(i)
                .is_some_and(|&(_, c)| c.is_alphanumeric() || c == '_' || c == '.' || c == '$')
            {
                i += 1;
            }
            let text: String = chars[start..i].iter().map(|&(_, c)| c).collect();
            if text.ends_with('.') || text.contains("..") {
                return Err(ExpressionError::UnexpectedToken {
                    token: text,
                    offset,
                });
            }
            TokenKind::Ident(text)
        } else {
            let rest = &source[offset..];
            let symbol = SYMBOLS
                .iter()
                .find(|sym| rest.starts_with(**sym))
                .ok_or(ExpressionError::UnexpectedChar { ch, offset })?;
            i += symbol.chars().count();
            TokenKind::Symbol(*symbol)
        };

        tokens.push(Token { kind, offset });
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

    fn eat(&mut self, matches: impl Fn(&Token) -> bool) -> bool {
        if self.peek().is_some_and(matches) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn or(&mut self) -> Result<Expression, ExpressionError> {
        let mut lhs = self.and()?;
        while self.eat(|t| t.is_symbol("||") || t.is_keyword("or")) {
            let rhs = self.and()?;
            lhs = Expression::Binary(BinaryOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expression, ExpressionError> {
        let mut lhs = self.not()?;
        while self.eat(|t| t.is_symbol("&&") || t.is_keyword("and")) {
            let rhs = self.not()?;
            lhs = Expression::Binary(BinaryOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn not(&mut self) -> Result<Expression, ExpressionError> {
        if self.eat(|t| t.is_symbol("!") || t.is_keyword("not")) {
            return Ok(Expression::Not(Box::new(self.not()?)));
        }
        self.compare()
    }

    fn compare(&mut self) -> Result<Expression, ExpressionError> {
        let lhs = self.sum()?;
        let op = match self.peek() {
            Some(t) if t.is_symbol("==") || t.is_symbol("=") => BinaryOp::Equal,
            Some(t) if t.is_symbol("!=") => BinaryOp::NotEqual,
            Some(t) if t.is_symbol("<") => BinaryOp::Less,
            Some(t) if t.is_symbol("<=") => BinaryOp::LessOrEqual,
            Some(t) if t.is_symbol(">") => BinaryOp::Greater,
            Some(t) if t.is_symbol(">=") => BinaryOp::GreaterOrEqual,
            Some(t) if t.is_keyword("contains") => BinaryOp::Contains,
            Some(t) if t.is_keyword("in") => BinaryOp::In,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.sum()?;
        Ok(Expression::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    fn sum(&mut self) -> Result<Expression, ExpressionError> {
        let mut lhs = self.product()?;
        loop {
            let op = match self.peek() {
                Some(t) if t.is_symbol("+") => BinaryOp::Add,
                Some(t) if t.is_symbol("-") => BinaryOp::Subtract,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.product()?;
            lhs = Expression::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn product(&mut self) -> Result<Expression, ExpressionError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(t) if t.is_symbol("*") => BinaryOp::Multiply,
                Some(t) if t.is_symbol("/") => BinaryOp::Divide,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expression::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn unary(&mut self) -> Result<Expression, ExpressionError> {
        if self.eat(|t| t.is_symbol("-")) {
            return Ok(Expression::Negate(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expression, ExpressionError> {
        let token = self.peek().cloned().ok_or(ExpressionError::UnexpectedEnd)?;
        self.pos += 1;
        match &token.kind {
            TokenKind::Number(n) => Ok(Expression::Literal(Value::Number(*n))),
            TokenKind::Str(s) => Ok(Expression::Literal(Value::String(s.clone()))),
            TokenKind::Ident(id) => match id.as_str() {
                "true" => Ok(Expression::Literal(Value::Bool(true))),
                "false" => Ok(Expression::Literal(Value::Bool(false))),
                "null" => Ok(Expression::Literal(Value::Null)),
                "undefined" => Ok(Expression::Literal(Value::Undefined)),
                "and" | "or" | "not" | "contains" | "in" => Err(token.unexpected()),
                _ => Ok(Expression::Path(id.clone())),
            },
            TokenKind::LParen => {
                let inner = self.or()?;
                if !self.eat(|t| t.kind == TokenKind::RParen) {
                    return Err(self
                        .peek()
                        .map_or(ExpressionError::UnexpectedEnd, Token::unexpected));
                }
                Ok(inner)
            }
            TokenKind::RParen | TokenKind::Symbol(_) => Err(token.unexpected()),
        }
    }
}
