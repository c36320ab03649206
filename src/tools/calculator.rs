//! Deterministic arithmetic evaluator.
//!
//! A small recursive-descent parser over `+ - * / %`, `^`/`**`, parentheses,
//! unary signs, the constants `pi`, `e` and `tau`, and a fixed set of math
//! functions. Anything outside that grammar is rejected; nothing is ever
//! evaluated dynamically.
//!
//! Grammar (lowest to highest precedence):
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/' | '%') unary)*
//! unary   := ('+' | '-') unary | power
//! power   := primary (('^' | '**') unary)?
//! primary := number | constant | function '(' expr (',' expr)* ')' | '(' expr ')'
//! ```

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;

use super::{Tool, ToolOutput, parse_args};
use crate::agent::tool::ToolDefinition;
use crate::error::ToolError;

/// Registry name of the calculator.
pub const TOOL_NAME: &str = "calculator";

/// Maximum accepted expression length in bytes.
const MAX_EXPRESSION_LEN: usize = 1_000;
/// Maximum nesting depth of parentheses and unary operators.
const MAX_DEPTH: usize = 64;

const FUNCTIONS: &[&str] = &[
    "sqrt", "abs", "sin", "cos", "tan", "asin", "acos", "atan", "ln", "log", "log2", "log10",
    "exp", "floor", "ceil", "round", "min", "max", "pow",
];
const CONSTANTS: &[&str] = &["pi", "e", "tau"];

/// Expression evaluation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CalcError {
    /// Nothing to evaluate.
    #[error("empty expression")]
    Empty,
    /// Expression exceeds the length limit.
    #[error("expression too long (max {MAX_EXPRESSION_LEN} bytes)")]
    TooLong,
    /// Nesting exceeds the depth limit.
    #[error("expression nested too deeply")]
    TooDeep,
    /// Character outside the grammar.
    #[error("unexpected character '{0}'")]
    UnexpectedChar(char),
    /// Token in the wrong place.
    #[error("unexpected token '{0}'")]
    UnexpectedToken(String),
    /// Input ended early.
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    /// Malformed numeric literal.
    #[error("invalid number '{0}'")]
    InvalidNumber(String),
    /// Unknown identifier.
    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),
    /// Function called with the wrong number of arguments.
    #[error("{name} expects {expected} argument(s), got {got}")]
    Arity {
        /// Function name.
        name: String,
        /// Accepted argument count.
        expected: &'static str,
        /// Supplied argument count.
        got: usize,
    },
    /// Division or modulo by zero.
    #[error("division by zero")]
    DivisionByZero,
    /// Result is NaN or infinite.
    #[error("result is not a finite number")]
    NotFinite,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    LParen,
    RParen,
    Comma,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Ident(s) => write!(f, "{s}"),
            Self::Plus => f.write_str("+"),
            Self::Minus => f.write_str("-"),
            Self::Star => f.write_str("*"),
            Self::Slash => f.write_str("/"),
            Self::Percent => f.write_str("%"),
            Self::Caret => f.write_str("^"),
            Self::LParen => f.write_str("("),
            Self::RParen => f.write_str(")"),
            Self::Comma => f.write_str(","),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, CalcError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // Scientific notation: 1e3, 2.5E-4
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        while j < chars.len() && chars[j].is_ascii_digit() {
                            j += 1;
                        }
                        i = j;
                    }
                }
                let literal: String = chars[start..i].iter().collect();
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| CalcError::InvalidNumber(literal.clone()))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_ascii_alphabetic() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().collect();
                tokens.push(Token::Ident(ident.to_ascii_lowercase()));
            }
            '*' if chars.get(i + 1) == Some(&'*') => {
                tokens.push(Token::Caret);
                i += 2;
            }
            _ => {
                let token = match c {
                    '+' => Token::Plus,
                    '-' | '\u{2212}' => Token::Minus,
                    '*' | '\u{00d7}' => Token::Star,
                    '/' | '\u{00f7}' => Token::Slash,
                    '%' => Token::Percent,
                    '^' => Token::Caret,
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    ',' => Token::Comma,
                    other => return Err(CalcError::UnexpectedChar(other)),
                };
                tokens.push(token);
                i += 1;
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn descend(&mut self) -> Result<(), CalcError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(CalcError::TooDeep);
        }
        Ok(())
    }

    fn expr(&mut self) -> Result<f64, CalcError> {
        let mut value = self.term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.pos += 1;
                    value += self.term()?;
                }
                Some(Token::Minus) => {
                    self.pos += 1;
                    value -= self.term()?;
                }
                _ => return Ok(value),
            }
        }
    }

    fn term(&mut self) -> Result<f64, CalcError> {
        let mut value = self.unary()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.pos += 1;
                    value *= self.unary()?;
                }
                Some(Token::Slash) => {
                    self.pos += 1;
                    let rhs = self.unary()?;
                    if rhs == 0.0 {
                        return Err(CalcError::DivisionByZero);
                    }
                    value /= rhs;
                }
                Some(Token::Percent) => {
                    self.pos += 1;
                    let rhs = self.unary()?;
                    if rhs == 0.0 {
                        return Err(CalcError::DivisionByZero);
                    }
                    value %= rhs;
                }
                _ => return Ok(value),
            }
        }
    }

    fn unary(&mut self) -> Result<f64, CalcError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                self.descend()?;
                let value = self.unary()?;
                self.depth -= 1;
                Ok(-value)
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.descend()?;
                let value = self.unary()?;
                self.depth -= 1;
                Ok(value)
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<f64, CalcError> {
        let base = self.primary()?;
        if self.peek() == Some(&Token::Caret) {
            self.pos += 1;
            self.descend()?;
            let exponent = self.unary()?;
            self.depth -= 1;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<f64, CalcError> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::LParen) => {
                self.descend()?;
                let value = self.expr()?;
                self.depth -= 1;
                self.expect_rparen()?;
                Ok(value)
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    self.descend()?;
                    let args = self.arguments()?;
                    self.depth -= 1;
                    apply_function(&name, &args)
                } else {
                    constant(&name)
                }
            }
            Some(other) => Err(CalcError::UnexpectedToken(other.to_string())),
            None => Err(CalcError::UnexpectedEnd),
        }
    }

    /// Parses a comma-separated argument list after the opening parenthesis.
    fn arguments(&mut self) -> Result<Vec<f64>, CalcError> {
        let mut args = vec![self.expr()?];
        while self.peek() == Some(&Token::Comma) {
            self.pos += 1;
            args.push(self.expr()?);
        }
        self.expect_rparen()?;
        Ok(args)
    }

    fn expect_rparen(&mut self) -> Result<(), CalcError> {
        match self.advance() {
            Some(Token::RParen) => Ok(()),
            Some(other) => Err(CalcError::UnexpectedToken(other.to_string())),
            None => Err(CalcError::UnexpectedEnd),
        }
    }
}

fn constant(name: &str) -> Result<f64, CalcError> {
    match name {
        "pi" => Ok(std::f64::consts::PI),
        "e" => Ok(std::f64::consts::E),
        "tau" => Ok(std::f64::consts::TAU),
        other => Err(CalcError::UnknownIdentifier(other.to_string())),
    }
}

fn apply_function(name: &str, args: &[f64]) -> Result<f64, CalcError> {
    let arity = |expected: &'static str| CalcError::Arity {
        name: name.to_string(),
        expected,
        got: args.len(),
    };

    match (name, args) {
        ("sqrt", [x]) => Ok(x.sqrt()),
        ("abs", [x]) => Ok(x.abs()),
        ("sin", [x]) => Ok(x.sin()),
        ("cos", [x]) => Ok(x.cos()),
        ("tan", [x]) => Ok(x.tan()),
        ("asin", [x]) => Ok(x.asin()),
        ("acos", [x]) => Ok(x.acos()),
        ("atan", [x]) => Ok(x.atan()),
        ("ln" | "log", [x]) => Ok(x.ln()),
        ("log", [x, base]) => Ok(x.log(*base)),
        ("log2", [x]) => Ok(x.log2()),
        ("log10", [x]) => Ok(x.log10()),
        ("exp", [x]) => Ok(x.exp()),
        ("floor", [x]) => Ok(x.floor()),
        ("ceil", [x]) => Ok(x.ceil()),
        ("round", [x]) => Ok(x.round()),
        ("pow", [x, y]) => Ok(x.powf(*y)),
        ("min" | "max", []) => Err(arity("at least 1")),
        ("min", values) => Ok(values.iter().copied().fold(f64::INFINITY, f64::min)),
        ("max", values) => Ok(values.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
        ("log", _) => Err(arity("1 or 2")),
        ("pow", _) => Err(arity("2")),
        (known, _) if FUNCTIONS.contains(&known) => Err(arity("1")),
        (other, _) => Err(CalcError::UnknownIdentifier(other.to_string())),
    }
}

/// Evaluates an arithmetic expression.
///
/// # Errors
///
/// Returns [`CalcError`] for anything that is not a well-formed expression
/// or whose result is not finite.
pub fn evaluate(expression: &str) -> Result<f64, CalcError> {
    let trimmed = expression.trim();
    if trimmed.is_empty() {
        return Err(CalcError::Empty);
    }
    if trimmed.len() > MAX_EXPRESSION_LEN {
        return Err(CalcError::TooLong);
    }

    let tokens = tokenize(trimmed)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if let Some(extra) = parser.peek() {
        return Err(CalcError::UnexpectedToken(extra.to_string()));
    }
    if !value.is_finite() {
        return Err(CalcError::NotFinite);
    }
    Ok(value)
}

/// Formats a result the way it is shown to users: integers without a
/// fractional part, everything else with up to ten decimals.
#[must_use]
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        #[allow(clippy::cast_possible_truncation)]
        let integer = value as i64;
        return integer.to_string();
    }
    if value.abs() >= 1e15 {
        return format!("{value}");
    }
    let fixed = format!("{value:.10}");
    fixed.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Finds the first evaluable arithmetic expression embedded in free text.
///
/// Scans for runs of numbers, operators, parentheses and known function or
/// constant names; any other word ends a run. A run qualifies when it
/// contains a digit, is not a bare number or a year range, and evaluates.
#[must_use]
pub fn extract_expression(text: &str) -> Option<String> {
    candidate_runs(text)
        .into_iter()
        .map(|run| clean_run(&run))
        .find(|candidate| is_expression(candidate))
}

fn candidate_runs(text: &str) -> Vec<String> {
    let mut runs = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    let flush = |current: &mut String, runs: &mut Vec<String>| {
        if !current.trim().is_empty() {
            runs.push(std::mem::take(current));
        }
        current.clear();
    };

    while let Some(c) = chars.next() {
        if c.is_ascii_alphabetic() {
            let mut word = String::from(c);
            while let Some(&next) = chars.peek() {
                if next.is_ascii_alphanumeric() {
                    word.push(next);
                    chars.next();
                } else {
                    break;
                }
            }
            let lower = word.to_ascii_lowercase();
            if FUNCTIONS.contains(&lower.as_str()) || CONSTANTS.contains(&lower.as_str()) {
                current.push_str(&lower);
            } else {
                flush(&mut current, &mut runs);
            }
        } else if c.is_ascii_digit()
            || c.is_whitespace()
            || "+-*/^%().,\u{00d7}\u{00f7}\u{2212}".contains(c)
        {
            current.push(c);
        } else {
            flush(&mut current, &mut runs);
        }
    }
    flush(&mut current, &mut runs);
    runs
}

fn clean_run(run: &str) -> String {
    run.trim()
        .trim_end_matches(|c: char| "+-*/^%(,.\u{00d7}\u{00f7}\u{2212}".contains(c) || c.is_whitespace())
        .trim_start_matches(|c: char| "*/^%),.+\u{00d7}\u{00f7}".contains(c) || c.is_whitespace())
        .to_string()
}

fn is_expression(candidate: &str) -> bool {
    if !candidate.chars().any(|c| c.is_ascii_digit()) {
        return false;
    }
    if candidate.parse::<f64>().is_ok() || is_year_range(candidate) {
        return false;
    }
    let has_operator = candidate
        .chars()
        .any(|c| "+-*/^%(\u{00d7}\u{00f7}\u{2212}".contains(c));
    has_operator && evaluate(candidate).is_ok()
}

fn is_year_range(candidate: &str) -> bool {
    let parts: Vec<&str> = candidate.split('-').map(str::trim).collect();
    parts.len() == 2
        && parts
            .iter()
            .all(|p| p.len() == 4 && p.chars().all(|c| c.is_ascii_digit()))
}

/// Arithmetic tool.
#[derive(Debug, Clone, Copy, Default)]
pub struct CalculatorTool;

#[derive(Deserialize)]
struct Args {
    expression: String,
}

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &'static str {
        TOOL_NAME
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: TOOL_NAME.to_string(),
            description: "Evaluate an arithmetic expression. Supports + - * / %, ^ or ** for \
                          powers, parentheses, the constants pi and e, and the functions sqrt, \
                          abs, sin, cos, tan, asin, acos, atan, ln, log, log2, log10, exp, \
                          floor, ceil, round, min, max and pow."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "expression": {
                        "type": "string",
                        "description": "Expression to evaluate, e.g. \"(2 + 3) * 4\"."
                    }
                },
                "required": ["expression"],
                "additionalProperties": false
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> Result<ToolOutput, ToolError> {
        let args: Args = parse_args(TOOL_NAME, arguments)?;
        let value =
            evaluate(&args.expression).map_err(|e| ToolError::argument(TOOL_NAME, e))?;
        Ok(ToolOutput::ok(json!({
            "expression": args.expression,
            "result": value,
            "formatted": format_number(value),
        })))
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    #[test_case("2+2", 4.0 ; "addition")]
    #[test_case("2 + 3 * 4", 14.0 ; "precedence")]
    #[test_case("(2 + 3) * 4", 20.0 ; "parentheses")]
    #[test_case("-3 + 5", 2.0 ; "unary minus")]
    #[test_case("-2^2", -4.0 ; "unary minus binds looser than power")]
    #[test_case("2^3^2", 512.0 ; "power is right associative")]
    #[test_case("2**10", 1024.0 ; "double star power")]
    #[test_case("17 % 5", 2.0 ; "modulo")]
    #[test_case("sqrt(16)", 4.0 ; "sqrt")]
    #[test_case("max(1, 7, 3)", 7.0 ; "variadic max")]
    #[test_case("pow(2, 5)", 32.0 ; "pow")]
    #[test_case("log(8, 2)", 3.0 ; "log with base")]
    #[test_case("floor(2.7) + ceil(0.2)", 3.0 ; "floor and ceil")]
    #[test_case("1.5e3 / 3", 500.0 ; "scientific literal")]
    #[test_case("6 \u{00d7} 7", 42.0 ; "unicode times")]
    fn test_evaluate(expression: &str, expected: f64) {
        let value = evaluate(expression).unwrap_or_else(|e| panic!("{expression}: {e}"));
        assert!((value - expected).abs() < 1e-9, "{expression} = {value}");
    }

    #[test_case("", &CalcError::Empty ; "empty")]
    #[test_case("1/0", &CalcError::DivisionByZero ; "division by zero")]
    #[test_case("5 % 0", &CalcError::DivisionByZero ; "modulo by zero")]
    #[test_case("2 +", &CalcError::UnexpectedEnd ; "dangling operator")]
    #[test_case("foo(1)", &CalcError::UnknownIdentifier("foo".to_string()) ; "unknown function")]
    #[test_case("sqrt(-1)", &CalcError::NotFinite ; "nan result")]
    #[test_case("2 $ 3", &CalcError::UnexpectedChar('$') ; "unknown char")]
    fn test_evaluate_rejects(expression: &str, expected: &CalcError) {
        assert_eq!(evaluate(expression).as_ref(), Err(expected));
    }

    #[test]
    fn test_evaluate_rejects_trailing_tokens() {
        assert!(matches!(
            evaluate("(1 + 2))"),
            Err(CalcError::UnexpectedToken(_))
        ));
        assert!(matches!(evaluate("2 3"), Err(CalcError::UnexpectedToken(_))));
    }

    #[test]
    fn test_evaluate_depth_limit() {
        let deep = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        assert_eq!(evaluate(&deep), Err(CalcError::TooDeep));
    }

    #[test_case(4.0, "4" ; "integer")]
    #[test_case(-12.0, "-12" ; "negative integer")]
    #[test_case(0.5, "0.5" ; "fraction")]
    #[test_case(1.0 / 3.0, "0.3333333333" ; "repeating fraction")]
    fn test_format_number(value: f64, expected: &str) {
        assert_eq!(format_number(value), expected);
    }

    #[test_case("What is 2+2?", Some("2+2") ; "inline arithmetic")]
    #[test_case("Please calculate (3 + 4) * 2 for me", Some("(3 + 4) * 2") ; "parenthesized")]
    #[test_case("what is sqrt(144)?", Some("sqrt(144)") ; "function")]
    #[test_case("What happened in 2024-2025?", None ; "year range")]
    #[test_case("Explain photosynthesis", None ; "no numbers")]
    #[test_case("Chapter 3 covers it", None ; "bare number")]
    fn test_extract_expression(text: &str, expected: Option<&str>) {
        assert_eq!(extract_expression(text).as_deref(), expected);
    }

    #[tokio::test]
    async fn test_tool_payload() {
        let output = CalculatorTool
            .execute(json!({"expression": "2+2"}))
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert!(output.success);
        assert_eq!(output.payload["formatted"], "4");
        assert_eq!(output.payload["result"], 4.0);
    }

    #[tokio::test]
    async fn test_tool_rejects_bad_input() {
        let err = CalculatorTool
            .execute(json!({"expression": "import os"}))
            .await;
        assert!(matches!(err, Err(ToolError::Argument { .. })));

        let err = CalculatorTool.execute(json!({"expr": "1"})).await;
        assert!(matches!(err, Err(ToolError::Argument { .. })));
    }

    proptest! {
        #[test]
        fn prop_integer_addition_matches(a in -10_000i64..10_000, b in -10_000i64..10_000) {
            let expression = format!("{a} + ({b})");
            #[allow(clippy::cast_precision_loss)]
            let expected = (a + b) as f64;
            prop_assert_eq!(evaluate(&expression), Ok(expected));
        }

        #[test]
        fn prop_never_panics(input in "[0-9+*/()^%. -]{0,40}") {
            let _ = evaluate(&input);
        }
    }
}
