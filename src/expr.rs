//! Row expressions for `where`, `calc`, `throwif` and `until`.
//!
//! Expressions are tokenized, parsed by recursive descent into an AST and
//! compiled against a header so column references become indices. Unknown
//! columns are reported separately from syntax errors so the `try*` steps
//! can turn them into no-ops.

use crate::gor::{GorError, Result};
use crate::row::{glob_match, ColumnType, Header, Row};
use crate::streaming::format_number;
use std::cmp::Ordering;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Errors raised while compiling an expression.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    #[error("{0}")]
    Syntax(String),
    #[error("Column {0} not found")]
    UnknownColumn(String),
}

impl ExprError {
    /// Report as a parse error of `command`.
    pub fn into_gor(self, command: &str) -> GorError {
        GorError::parse(command, self.to_string())
    }
}

/// An evaluated value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

impl Value {
    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Str(s) => s.trim().parse().ok(),
            Value::Bool(_) => None,
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Value::Float(_) => None,
            Value::Str(s) => s.trim().parse().ok(),
            Value::Bool(_) => None,
        }
    }

    fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    /// Truth value; strings `true`/`false` are accepted.
    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Str(s) if s.eq_ignore_ascii_case("true") => Ok(true),
            Value::Str(s) if s.eq_ignore_ascii_case("false") => Ok(false),
            other => Err(GorError::data(format!(
                "Expression value '{}' is not a boolean",
                other
            ))),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", format_number(*x)),
            Value::Str(s) => write!(f, "{}", s),
            Value::Bool(b) => write!(f, "{}", b),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(String),
    Str(String),
    Ident(String),
    ColumnNumber(usize),
    LParen,
    RParen,
    Comma,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Tilde,
    And,
    Or,
    Not,
    In,
    Like,
    True,
    False,
    Eof,
}

fn tokenize(text: &str) -> std::result::Result<Vec<Token>, ExprError> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
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
            '~' => {
                tokens.push(Token::Tilde);
                i += 1;
            }
            '=' => {
                i += if chars.get(i + 1) == Some(&'=') { 2 } else { 1 };
                tokens.push(Token::Eq);
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Ne);
                i += 2;
            }
            '<' => match chars.get(i + 1) {
                Some('=') => {
                    tokens.push(Token::Le);
                    i += 2;
                }
                Some('>') => {
                    tokens.push(Token::Ne);
                    i += 2;
                }
                _ => {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            },
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '\'' | '"' => {
                let quote = c;
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end] != quote {
                    end += 1;
                }
                if end >= chars.len() {
                    return Err(ExprError::Syntax(format!(
                        "Unterminated string in expression: {}",
                        text
                    )));
                }
                tokens.push(Token::Str(chars[start..end].iter().collect()));
                i = end + 1;
            }
            '#' => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end].is_ascii_digit() {
                    end += 1;
                }
                let digits: String = chars[start..end].iter().collect();
                let n = digits.parse::<usize>().map_err(|_| {
                    ExprError::Syntax(format!("Invalid column number in expression: {}", text))
                })?;
                tokens.push(Token::ColumnNumber(n));
                i = end;
            }
            c if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '-' || chars[j] == '+') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Number(chars[start..i].iter().collect()));
            }
            c if c.is_alphanumeric() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.to_ascii_lowercase().as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "in" => Token::In,
                    "like" => Token::Like,
                    "true" => Token::True,
                    "false" => Token::False,
                    _ => Token::Ident(word),
                });
            }
            other => {
                return Err(ExprError::Syntax(format!(
                    "Unexpected character '{}' in expression: {}",
                    other, text
                )))
            }
        }
    }
    tokens.push(Token::Eof);
    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Like,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Func {
    Len,
    Str,
    Int,
    Long,
    Float,
    Abs,
    Min,
    Max,
    If,
    Upper,
    Lower,
    Substr,
    Contains,
    IsInt,
    IsFloat,
    Time,
}

impl Func {
    fn lookup(name: &str) -> Option<(Func, usize)> {
        let f = match name.to_ascii_lowercase().as_str() {
            "len" => (Func::Len, 1),
            "str" => (Func::Str, 1),
            "int" => (Func::Int, 1),
            "long" => (Func::Long, 1),
            "float" => (Func::Float, 1),
            "abs" => (Func::Abs, 1),
            "min" => (Func::Min, 2),
            "max" => (Func::Max, 2),
            "if" => (Func::If, 3),
            "upper" => (Func::Upper, 1),
            "lower" => (Func::Lower, 1),
            "substr" => (Func::Substr, 3),
            "contains" => (Func::Contains, 2),
            "isint" => (Func::IsInt, 1),
            "isfloat" => (Func::IsFloat, 1),
            "time" => (Func::Time, 0),
            _ => return None,
        };
        Some(f)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Literal(Value),
    Column(usize, ColumnType),
    Neg(Box<Node>),
    Not(Box<Node>),
    Binary(BinaryOp, Box<Node>, Box<Node>),
    In(Box<Node>, Vec<Node>, bool),
    Call(Func, Vec<Node>),
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    header: &'a Header,
    text: &'a str,
}

impl<'a> Parser<'a> {
    fn current(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let t = self.current().clone();
        self.pos += 1;
        t
    }

    fn expect(&mut self, token: Token) -> std::result::Result<(), ExprError> {
        if *self.current() == token {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn unexpected(&self) -> ExprError {
        ExprError::Syntax(format!(
            "Unexpected {:?} in expression: {}",
            self.current(),
            self.text
        ))
    }

    fn parse_or_expr(&mut self) -> std::result::Result<Node, ExprError> {
        let mut left = self.parse_and_expr()?;
        while matches!(self.current(), Token::Or) {
            self.advance();
            let right = self.parse_and_expr()?;
            left = Node::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and_expr(&mut self) -> std::result::Result<Node, ExprError> {
        let mut left = self.parse_not_expr()?;
        while matches!(self.current(), Token::And) {
            self.advance();
            let right = self.parse_not_expr()?;
            left = Node::Binary(BinaryOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not_expr(&mut self) -> std::result::Result<Node, ExprError> {
        if matches!(self.current(), Token::Not) {
            self.advance();
            let inner = self.parse_not_expr()?;
            return Ok(Node::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> std::result::Result<Node, ExprError> {
        let left = self.parse_additive()?;
        let op = match self.current() {
            Token::Eq => BinaryOp::Eq,
            Token::Ne => BinaryOp::Ne,
            Token::Lt => BinaryOp::Lt,
            Token::Le => BinaryOp::Le,
            Token::Gt => BinaryOp::Gt,
            Token::Ge => BinaryOp::Ge,
            Token::Tilde | Token::Like => BinaryOp::Like,
            Token::In => {
                self.advance();
                let list = self.parse_list()?;
                return Ok(Node::In(Box::new(left), list, false));
            }
            Token::Not if matches!(self.tokens.get(self.pos + 1), Some(Token::In)) => {
                self.advance();
                self.advance();
                let list = self.parse_list()?;
                return Ok(Node::In(Box::new(left), list, true));
            }
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_additive()?;
        Ok(Node::Binary(op, Box::new(left), Box::new(right)))
    }

    fn parse_list(&mut self) -> std::result::Result<Vec<Node>, ExprError> {
        self.expect(Token::LParen)?;
        let mut items = vec![self.parse_or_expr()?];
        while matches!(self.current(), Token::Comma) {
            self.advance();
            items.push(self.parse_or_expr()?);
        }
        self.expect(Token::RParen)?;
        Ok(items)
    }

    fn parse_additive(&mut self) -> std::result::Result<Node, ExprError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.current() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Node::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_multiplicative(&mut self) -> std::result::Result<Node, ExprError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.current() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                Token::Percent => BinaryOp::Mod,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Node::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_unary(&mut self) -> std::result::Result<Node, ExprError> {
        if matches!(self.current(), Token::Minus) {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(match inner {
                Node::Literal(Value::Int(i)) => Node::Literal(Value::Int(-i)),
                Node::Literal(Value::Float(f)) => Node::Literal(Value::Float(-f)),
                other => Node::Neg(Box::new(other)),
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> std::result::Result<Node, ExprError> {
        match self.advance() {
            Token::Number(text) => {
                if let Ok(i) = text.parse::<i64>() {
                    Ok(Node::Literal(Value::Int(i)))
                } else {
                    text.parse::<f64>()
                        .map(|f| Node::Literal(Value::Float(f)))
                        .map_err(|_| ExprError::Syntax(format!("Invalid number {}", text)))
                }
            }
            Token::Str(s) => Ok(Node::Literal(Value::Str(s))),
            Token::True => Ok(Node::Literal(Value::Bool(true))),
            Token::False => Ok(Node::Literal(Value::Bool(false))),
            Token::LParen => {
                let inner = self.parse_or_expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::ColumnNumber(n) => {
                let reference = format!("#{}", n);
                let idx = self
                    .header
                    .column_index(&reference)
                    .ok_or(ExprError::UnknownColumn(reference))?;
                Ok(Node::Column(idx, self.header.type_of(idx)))
            }
            Token::Ident(name) => {
                if matches!(self.current(), Token::LParen) {
                    return self.parse_call(&name);
                }
                let idx = self
                    .header
                    .index_of(&name)
                    .ok_or(ExprError::UnknownColumn(name))?;
                Ok(Node::Column(idx, self.header.type_of(idx)))
            }
            _ => {
                self.pos -= 1;
                Err(self.unexpected())
            }
        }
    }

    fn parse_call(&mut self, name: &str) -> std::result::Result<Node, ExprError> {
        let (func, arity) = Func::lookup(name)
            .ok_or_else(|| ExprError::Syntax(format!("Unknown function {}", name)))?;
        self.expect(Token::LParen)?;
        let mut args = Vec::new();
        if !matches!(self.current(), Token::RParen) {
            args.push(self.parse_or_expr()?);
            while matches!(self.current(), Token::Comma) {
                self.advance();
                args.push(self.parse_or_expr()?);
            }
        }
        self.expect(Token::RParen)?;
        if args.len() != arity {
            return Err(ExprError::Syntax(format!(
                "Function {} takes {} argument(s), got {}",
                name,
                arity,
                args.len()
            )));
        }
        Ok(Node::Call(func, args))
    }
}

/// A compiled expression bound to one header.
#[derive(Debug, Clone)]
pub struct Expr {
    root: Node,
    text: String,
}

impl Expr {
    pub fn compile(text: &str, header: &Header) -> std::result::Result<Expr, ExprError> {
        let tokens = tokenize(text)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            header,
            text,
        };
        if matches!(parser.current(), Token::Eof) {
            return Err(ExprError::Syntax("Empty expression".to_string()));
        }
        let root = parser.parse_or_expr()?;
        if !matches!(parser.current(), Token::Eof) {
            return Err(parser.unexpected());
        }
        Ok(Expr {
            root,
            text: text.to_string(),
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn eval(&self, row: &Row) -> Result<Value> {
        eval(&self.root, row)
    }

    /// Evaluate as a predicate.
    pub fn test(&self, row: &Row) -> Result<bool> {
        self.eval(row)?.as_bool()
    }

    /// Static result type, used to type `calc` columns.
    pub fn result_type(&self) -> ColumnType {
        node_type(&self.root)
    }
}

fn node_type(node: &Node) -> ColumnType {
    match node {
        Node::Literal(Value::Int(_)) => ColumnType::Int,
        Node::Literal(Value::Float(_)) => ColumnType::Double,
        Node::Literal(_) => ColumnType::String,
        Node::Column(_, t) => *t,
        Node::Neg(inner) => node_type(inner),
        Node::Not(_) | Node::In(..) => ColumnType::String,
        Node::Binary(op, l, r) => match op {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Mod => {
                let (lt, rt) = (node_type(l), node_type(r));
                if !lt.is_numeric() || !rt.is_numeric() {
                    ColumnType::Unknown
                } else if lt == ColumnType::Double || rt == ColumnType::Double {
                    ColumnType::Double
                } else {
                    ColumnType::Long
                }
            }
            BinaryOp::Div => ColumnType::Double,
            _ => ColumnType::String,
        },
        Node::Call(func, args) => match func {
            Func::Len | Func::Int => ColumnType::Int,
            Func::Long | Func::Time => ColumnType::Long,
            Func::Float => ColumnType::Double,
            Func::Abs => args.first().map(node_type).unwrap_or_default(),
            Func::Min | Func::Max | Func::If => ColumnType::Unknown,
            _ => ColumnType::String,
        },
    }
}

fn column_value(row: &Row, idx: usize, t: ColumnType) -> Result<Value> {
    let cell = row.col(idx);
    match t {
        ColumnType::Int | ColumnType::Long => row.int(idx).map(Value::Int),
        ColumnType::Double => row.float(idx).map(Value::Float),
        ColumnType::String => Ok(Value::Str(cell.to_string())),
        ColumnType::Unknown => Ok(if let Ok(i) = cell.parse::<i64>() {
            Value::Int(i)
        } else if let Ok(f) = cell.parse::<f64>() {
            Value::Float(f)
        } else {
            Value::Str(cell.to_string())
        }),
    }
}

fn number(value: &Value, context: &str) -> Result<f64> {
    value.as_f64().ok_or_else(|| {
        GorError::data(format!("Cannot use '{}' as a number in {}", value, context))
    })
}

fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) if a.is_number() || b.is_number() => {
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
            _ => a.to_string().cmp(&b.to_string()),
        },
    }
}

fn arithmetic(op: BinaryOp, a: Value, b: Value) -> Result<Value> {
    if op == BinaryOp::Add && !(a.is_number() && b.is_number()) {
        if let (Value::Str(_), _) | (_, Value::Str(_)) = (&a, &b) {
            return Ok(Value::Str(format!("{}{}", a, b)));
        }
    }
    if let (Value::Int(x), Value::Int(y)) = (&a, &b) {
        let (x, y) = (*x, *y);
        return match op {
            BinaryOp::Add => Ok(Value::Int(x.wrapping_add(y))),
            BinaryOp::Sub => Ok(Value::Int(x.wrapping_sub(y))),
            BinaryOp::Mul => Ok(Value::Int(x.wrapping_mul(y))),
            BinaryOp::Mod if y == 0 => Err(GorError::data("Modulo by zero")),
            BinaryOp::Mod => Ok(Value::Int(x % y)),
            _ => Ok(Value::Float(x as f64 / y as f64)),
        };
    }
    let x = number(&a, "arithmetic")?;
    let y = number(&b, "arithmetic")?;
    Ok(Value::Float(match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Mod => x % y,
        _ => x / y,
    }))
}

fn eval(node: &Node, row: &Row) -> Result<Value> {
    match node {
        Node::Literal(v) => Ok(v.clone()),
        Node::Column(idx, t) => column_value(row, *idx, *t),
        Node::Neg(inner) => match eval(inner, row)? {
            Value::Int(i) => Ok(Value::Int(-i)),
            other => Ok(Value::Float(-number(&other, "negation")?)),
        },
        Node::Not(inner) => Ok(Value::Bool(!eval(inner, row)?.as_bool()?)),
        Node::In(target, list, negated) => {
            let v = eval(target, row)?;
            let mut found = false;
            for item in list {
                if compare(&v, &eval(item, row)?) == Ordering::Equal {
                    found = true;
                    break;
                }
            }
            Ok(Value::Bool(found != *negated))
        }
        Node::Binary(op, l, r) => match op {
            BinaryOp::And => {
                Ok(Value::Bool(eval(l, row)?.as_bool()? && eval(r, row)?.as_bool()?))
            }
            BinaryOp::Or => {
                Ok(Value::Bool(eval(l, row)?.as_bool()? || eval(r, row)?.as_bool()?))
            }
            BinaryOp::Like => {
                let value = eval(l, row)?.to_string();
                let pattern = eval(r, row)?.to_string();
                Ok(Value::Bool(glob_match(&pattern, &value)))
            }
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt
            | BinaryOp::Ge => {
                let ord = compare(&eval(l, row)?, &eval(r, row)?);
                Ok(Value::Bool(match op {
                    BinaryOp::Eq => ord == Ordering::Equal,
                    BinaryOp::Ne => ord != Ordering::Equal,
                    BinaryOp::Lt => ord == Ordering::Less,
                    BinaryOp::Le => ord != Ordering::Greater,
                    BinaryOp::Gt => ord == Ordering::Greater,
                    _ => ord != Ordering::Less,
                }))
            }
            _ => arithmetic(*op, eval(l, row)?, eval(r, row)?),
        },
        Node::Call(func, args) => call(*func, args, row),
    }
}

fn call(func: Func, args: &[Node], row: &Row) -> Result<Value> {
    let arg = |i: usize| eval(&args[i], row);
    match func {
        Func::Len => Ok(Value::Int(arg(0)?.to_string().chars().count() as i64)),
        Func::Str => Ok(Value::Str(arg(0)?.to_string())),
        Func::Int | Func::Long => {
            let v = arg(0)?;
            v.as_i64()
                .or_else(|| v.as_f64().map(|f| f.trunc() as i64))
                .map(Value::Int)
                .ok_or_else(|| GorError::data(format!("Cannot convert '{}' to an integer", v)))
        }
        Func::Float => Ok(Value::Float(number(&arg(0)?, "float()")?)),
        Func::Abs => match arg(0)? {
            Value::Int(i) => Ok(Value::Int(i.abs())),
            other => Ok(Value::Float(number(&other, "abs()")?.abs())),
        },
        Func::Min | Func::Max => {
            let (a, b) = (arg(0)?, arg(1)?);
            let ord = compare(&a, &b);
            let pick_a = if func == Func::Min {
                ord != Ordering::Greater
            } else {
                ord != Ordering::Less
            };
            Ok(if pick_a { a } else { b })
        }
        Func::If => {
            if arg(0)?.as_bool()? {
                arg(1)
            } else {
                arg(2)
            }
        }
        Func::Upper => Ok(Value::Str(arg(0)?.to_string().to_uppercase())),
        Func::Lower => Ok(Value::Str(arg(0)?.to_string().to_lowercase())),
        Func::Substr => {
            let s: Vec<char> = arg(0)?.to_string().chars().collect();
            let from = arg(1)?;
            let to = arg(2)?;
            let from = from
                .as_i64()
                .ok_or_else(|| GorError::data(format!("Invalid substr start '{}'", from)))?;
            let to = to
                .as_i64()
                .ok_or_else(|| GorError::data(format!("Invalid substr stop '{}'", to)))?;
            let from = (from.max(0) as usize).min(s.len());
            let to = (to.max(0) as usize).clamp(from, s.len());
            Ok(Value::Str(s[from..to].iter().collect()))
        }
        Func::Contains => {
            let (a, b) = (arg(0)?.to_string(), arg(1)?.to_string());
            Ok(Value::Bool(a.contains(&b)))
        }
        Func::IsInt => Ok(Value::Bool(arg(0)?.to_string().trim().parse::<i64>().is_ok())),
        Func::IsFloat => Ok(Value::Bool(arg(0)?.to_string().trim().parse::<f64>().is_ok())),
        Func::Time => {
            let ms = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0);
            Ok(Value::Int(ms))
        }
    }
}
