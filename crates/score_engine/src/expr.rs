//! A small, deliberately unsafe-in-the-Python-sense-but-safe-in-Rust
//! expression language for `score_rule.condition`/`score_rule.formula`
//! (§4.7), grounded on `core/detector/evaluator.py`'s `SafeExpressionEvaluator`
//! — itself a whitelisted subset of Python's `ast` grammar. Here the
//! whitelisting is structural: the grammar this parser accepts has no
//! construct outside the rule language in the first place.

use std::collections::HashMap;
use std::fmt;

use domain::FeatureValue;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ExprError {
    #[error("unexpected character {0:?} at position {1}")]
    UnexpectedChar(char, usize),
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unexpected token {0:?}")]
    UnexpectedToken(String),
    #[error("trailing input after expression: {0:?}")]
    TrailingInput(String),
    #[error("cannot compare {0} and {1}")]
    Incomparable(String, String),
    #[error("cannot apply arithmetic to a string operand")]
    ArithmeticOnString,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
    And,
    Or,
    LParen,
    RParen,
}

fn tokenize(src: &str) -> Result<Vec<Token>, ExprError> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Eq);
                i += 2;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Ne);
                i += 2;
            }
            '\'' | '"' => {
                let quote = c;
                let start = i + 1;
                let mut j = start;
                while j < chars.len() && chars[j] != quote {
                    j += 1;
                }
                if j >= chars.len() {
                    return Err(ExprError::UnterminatedString);
                }
                tokens.push(Token::Str(chars[start..j].iter().collect()));
                i = j + 1;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                let mut j = i;
                while j < chars.len() && (chars[j].is_ascii_digit() || chars[j] == '.') {
                    j += 1;
                }
                let text: String = chars[start..j].iter().collect();
                let number = text.parse::<f64>().map_err(|_| ExprError::UnexpectedChar(c, start))?;
                tokens.push(Token::Number(number));
                i = j;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                let mut j = i;
                while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_' || chars[j] == '.') {
                    j += 1;
                }
                let text: String = chars[start..j].iter().collect();
                tokens.push(match text.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "true" | "True" => Token::Number(1.0),
                    "false" | "False" => Token::Number(0.0),
                    _ => Token::Ident(text),
                });
                i = j;
            }
            other => return Err(ExprError::UnexpectedChar(other, i)),
        }
    }
    Ok(tokens)
}

/// Parsed form of a `condition`/`formula` string, reusable across many
/// `eval` calls against different feature maps.
#[derive(Debug, Clone)]
pub struct Expr(ExprNode);

#[derive(Debug, Clone)]
enum ExprNode {
    Number(f64),
    Str(String),
    Name(String),
    Neg(Box<ExprNode>),
    Pos(Box<ExprNode>),
    Bin(Box<ExprNode>, BinOp, Box<ExprNode>),
    Compare(Box<ExprNode>, Vec<(CmpOp, ExprNode)>),
    Bool(Box<ExprNode>, BoolOp, Vec<ExprNode>),
}

#[derive(Debug, Clone, Copy)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy)]
enum CmpOp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

#[derive(Debug, Clone, Copy)]
enum BoolOp {
    And,
    Or,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn parse_or(&mut self) -> Result<ExprNode, ExprError> {
        let first = self.parse_and()?;
        let mut rest = Vec::new();
        while matches!(self.peek(), Some(Token::Or)) {
            self.advance();
            rest.push(self.parse_and()?);
        }
        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(ExprNode::Bool(Box::new(first), BoolOp::Or, rest))
        }
    }

    fn parse_and(&mut self) -> Result<ExprNode, ExprError> {
        let first = self.parse_comparison()?;
        let mut rest = Vec::new();
        while matches!(self.peek(), Some(Token::And)) {
            self.advance();
            rest.push(self.parse_comparison()?);
        }
        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(ExprNode::Bool(Box::new(first), BoolOp::And, rest))
        }
    }

    fn parse_comparison(&mut self) -> Result<ExprNode, ExprError> {
        let first = self.parse_additive()?;
        let mut chain = Vec::new();
        loop {
            let op = match self.peek() {
                Some(Token::Gt) => CmpOp::Gt,
                Some(Token::Ge) => CmpOp::Ge,
                Some(Token::Lt) => CmpOp::Lt,
                Some(Token::Le) => CmpOp::Le,
                Some(Token::Eq) => CmpOp::Eq,
                Some(Token::Ne) => CmpOp::Ne,
                _ => break,
            };
            self.advance();
            chain.push((op, self.parse_additive()?));
        }
        if chain.is_empty() {
            Ok(first)
        } else {
            Ok(ExprNode::Compare(Box::new(first), chain))
        }
    }

    fn parse_additive(&mut self) -> Result<ExprNode, ExprError> {
        let mut node = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.advance();
            node = ExprNode::Bin(Box::new(node), op, Box::new(self.parse_term()?));
        }
        Ok(node)
    }

    fn parse_term(&mut self) -> Result<ExprNode, ExprError> {
        let mut node = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Mod,
                _ => break,
            };
            self.advance();
            node = ExprNode::Bin(Box::new(node), op, Box::new(self.parse_unary()?));
        }
        Ok(node)
    }

    fn parse_unary(&mut self) -> Result<ExprNode, ExprError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.advance();
                Ok(ExprNode::Neg(Box::new(self.parse_unary()?)))
            }
            Some(Token::Plus) => {
                self.advance();
                Ok(ExprNode::Pos(Box::new(self.parse_unary()?)))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<ExprNode, ExprError> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(ExprNode::Number(n)),
            Some(Token::Str(s)) => Ok(ExprNode::Str(s)),
            Some(Token::Ident(name)) => Ok(ExprNode::Name(name)),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    other => Err(ExprError::UnexpectedToken(format!("{other:?}"))),
                }
            }
            Some(other) => Err(ExprError::UnexpectedToken(format!("{other:?}"))),
            None => Err(ExprError::UnexpectedEnd),
        }
    }
}

impl Expr {
    /// Parse a condition or formula string once; re-evaluate cheaply per IP.
    ///
    /// # Errors
    ///
    /// Returns [`ExprError`] on a malformed expression.
    pub fn parse(src: &str) -> Result<Self, ExprError> {
        let tokens = tokenize(src)?;
        let mut parser = Parser { tokens, pos: 0 };
        let node = parser.parse_or()?;
        if parser.pos != parser.tokens.len() {
            let remaining: Vec<String> = parser.tokens[parser.pos..].iter().map(|t| format!("{t:?}")).collect();
            return Err(ExprError::TrailingInput(remaining.join(" ")));
        }
        Ok(Self(node))
    }

    /// Evaluate against a feature map. An unresolved `Name` evaluates to
    /// `0.0` (§4.7, mirroring the source's `visit_Name` default).
    ///
    /// # Errors
    ///
    /// Returns [`ExprError`] if the expression applies arithmetic to a
    /// string operand or compares two incomparable types.
    pub fn eval(&self, features: &HashMap<String, FeatureValue>) -> Result<Value, ExprError> {
        eval_node(&self.0, features)
    }
}

/// Evaluation result: a condition's truthiness comes from [`Value::truthy`];
/// a formula's score comes from [`Value::as_number`] (treated as `0.0` for
/// non-numeric results, mirroring the caller's fallback in §4.7).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Str(String),
    Bool(bool),
}

impl Value {
    #[must_use]
    pub fn truthy(&self) -> bool {
        match self {
            Self::Number(n) => *n != 0.0,
            Self::Bool(b) => *b,
            Self::Str(s) => !s.is_empty(),
        }
    }

    #[must_use]
    pub fn as_number(&self) -> f64 {
        match self {
            Self::Number(n) => *n,
            Self::Bool(b) => f64::from(*b),
            Self::Str(_) => 0.0,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s}"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

fn feature_value_to_value(fv: &FeatureValue) -> Value {
    match fv {
        FeatureValue::Number(n) => Value::Number(*n),
        FeatureValue::Str(s) => Value::Str(s.clone()),
        FeatureValue::Bool(b) => Value::Bool(*b),
    }
}

fn eval_node(node: &ExprNode, features: &HashMap<String, FeatureValue>) -> Result<Value, ExprError> {
    match node {
        ExprNode::Number(n) => Ok(Value::Number(*n)),
        ExprNode::Str(s) => Ok(Value::Str(s.clone())),
        ExprNode::Name(name) => Ok(features.get(name).map_or(Value::Number(0.0), feature_value_to_value)),
        ExprNode::Neg(inner) => Ok(Value::Number(-eval_node(inner, features)?.as_number())),
        ExprNode::Pos(inner) => Ok(Value::Number(eval_node(inner, features)?.as_number())),
        ExprNode::Bin(lhs, op, rhs) => {
            let l = eval_node(lhs, features)?;
            let r = eval_node(rhs, features)?;
            if matches!(l, Value::Str(_)) || matches!(r, Value::Str(_)) {
                return Err(ExprError::ArithmeticOnString);
            }
            let (l, r) = (l.as_number(), r.as_number());
            Ok(Value::Number(match op {
                BinOp::Add => l + r,
                BinOp::Sub => l - r,
                BinOp::Mul => l * r,
                BinOp::Div => l / r,
                BinOp::Mod => l % r,
            }))
        }
        ExprNode::Compare(first, chain) => {
            let mut left = eval_node(first, features)?;
            for (op, rhs) in chain {
                let right = eval_node(rhs, features)?;
                if !compare(&left, *op, &right)? {
                    return Ok(Value::Bool(false));
                }
                left = right;
            }
            Ok(Value::Bool(true))
        }
        ExprNode::Bool(first, op, rest) => {
            let mut result = eval_node(first, features)?.truthy();
            for node in rest {
                let value = eval_node(node, features)?.truthy();
                result = match op {
                    BoolOp::And => result && value,
                    BoolOp::Or => result || value,
                };
            }
            Ok(Value::Bool(result))
        }
    }
}

fn compare(left: &Value, op: CmpOp, right: &Value) -> Result<bool, ExprError> {
    let result = match (left, right) {
        (Value::Str(a), Value::Str(b)) => match op {
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
        },
        (Value::Str(_), _) | (_, Value::Str(_)) => {
            return Err(ExprError::Incomparable(format!("{left}"), format!("{right}")));
        }
        _ => {
            let (a, b) = (left.as_number(), right.as_number());
            match op {
                CmpOp::Gt => a > b,
                CmpOp::Ge => a >= b,
                CmpOp::Lt => a < b,
                CmpOp::Le => a <= b,
                CmpOp::Eq => (a - b).abs() < f64::EPSILON,
                CmpOp::Ne => (a - b).abs() >= f64::EPSILON,
            }
        }
    };
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(pairs: &[(&str, FeatureValue)]) -> HashMap<String, FeatureValue> {
        pairs.iter().map(|(k, v)| ((*k).to_owned(), v.clone())).collect()
    }

    #[test]
    fn arithmetic_precedence() {
        let expr = Expr::parse("1 + 2 * 3").unwrap();
        assert_eq!(expr.eval(&HashMap::new()).unwrap().as_number(), 7.0);
    }

    #[test]
    fn unknown_name_resolves_to_zero() {
        let expr = Expr::parse("missing + 1").unwrap();
        assert_eq!(expr.eval(&HashMap::new()).unwrap().as_number(), 1.0);
    }

    #[test]
    fn comparison_chain_is_conjunctive() {
        let expr = Expr::parse("1 < count < 10").unwrap();
        let fs = features(&[("count", FeatureValue::Number(5.0))]);
        assert!(expr.eval(&fs).unwrap().truthy());
        let fs = features(&[("count", FeatureValue::Number(50.0))]);
        assert!(!expr.eval(&fs).unwrap().truthy());
    }

    #[test]
    fn boolean_and_or() {
        let expr = Expr::parse("count > 5 and status == \"blocked\"").unwrap();
        let fs = features(&[
            ("count", FeatureValue::Number(10.0)),
            ("status", FeatureValue::Str("blocked".into())),
        ]);
        assert!(expr.eval(&fs).unwrap().truthy());
    }

    #[test]
    fn unary_minus() {
        let expr = Expr::parse("-count").unwrap();
        let fs = features(&[("count", FeatureValue::Number(3.0))]);
        assert_eq!(expr.eval(&fs).unwrap().as_number(), -3.0);
    }

    #[test]
    fn string_arithmetic_is_rejected() {
        let expr = Expr::parse("\"a\" + 1").unwrap();
        assert!(matches!(expr.eval(&HashMap::new()), Err(ExprError::ArithmeticOnString)));
    }

    #[test]
    fn bool_literal_coerces_to_number() {
        let expr = Expr::parse("suspicious_flag * 5").unwrap();
        let fs = features(&[("suspicious_flag", FeatureValue::Bool(true))]);
        assert_eq!(expr.eval(&fs).unwrap().as_number(), 5.0);
    }
}
