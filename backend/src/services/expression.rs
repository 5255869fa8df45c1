//! Safe expression language.
//!
//! Used for workflow edge guards, condition nodes and rule-based accrual
//! policies. The grammar covers literals, dotted-path identifiers,
//! arithmetic, comparisons, boolean combinators and a whitelisted set of
//! pure functions. There is no assignment, no loops and no access to
//! anything outside the provided context, so definitions authored by
//! tenant admins cannot run arbitrary code.
//!
//! ```text
//! expr   := or
//! or     := and (("or" | "||") and)*
//! and    := not (("and" | "&&") not)*
//! not    := ("not" | "!") not | cmp
//! cmp    := add (("==" | "!=" | "<" | "<=" | ">" | ">=") add)?
//! add    := mul (("+" | "-") mul)*
//! mul    := unary (("*" | "/" | "%") unary)*
//! unary  := "-" unary | primary
//! primary:= number | string | true | false | null
//!         | ident ("." ident)* | ident "(" args ")" | "(" expr ")"
//! ```
//!
//! Missing context paths resolve to `null`; `null` compares equal only to
//! `null` and is falsy. Arithmetic on non-numbers is an evaluation error.

use chrono::NaiveDate;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ExprError {
    #[error("lex error at offset {0}: {1}")]
    Lex(usize, String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("evaluation error: {0}")]
    Eval(String),
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    True,
    False,
    Null,
    And,
    Or,
    Not,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Dot,
    Comma,
    LParen,
    RParen,
}

fn lex(src: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let bytes = src.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
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
            '.' => {
                tokens.push(Token::Dot);
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
            '=' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token::Eq);
                    i += 2;
                } else {
                    return Err(ExprError::Lex(i, "single '=' is not an operator".into()));
                }
            }
            '!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token::Ne);
                    i += 2;
                } else {
                    tokens.push(Token::Not);
                    i += 1;
                }
            }
            '<' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '&' => {
                if bytes.get(i + 1) == Some(&b'&') {
                    tokens.push(Token::And);
                    i += 2;
                } else {
                    return Err(ExprError::Lex(i, "single '&' is not an operator".into()));
                }
            }
            '|' => {
                if bytes.get(i + 1) == Some(&b'|') {
                    tokens.push(Token::Or);
                    i += 2;
                } else {
                    return Err(ExprError::Lex(i, "single '|' is not an operator".into()));
                }
            }
            '\'' | '"' => {
                let quote = c;
                let start = i + 1;
                let mut j = start;
                while j < bytes.len() && bytes[j] as char != quote {
                    j += 1;
                }
                if j >= bytes.len() {
                    return Err(ExprError::Lex(i, "unterminated string literal".into()));
                }
                tokens.push(Token::Str(src[start..j].to_string()));
                i = j + 1;
            }
            '0'..='9' => {
                let start = i;
                let mut j = i;
                let mut seen_dot = false;
                while j < bytes.len() {
                    let d = bytes[j] as char;
                    if d.is_ascii_digit() {
                        j += 1;
                    } else if d == '.'
                        && !seen_dot
                        && bytes.get(j + 1).is_some_and(|b| (*b as char).is_ascii_digit())
                    {
                        seen_dot = true;
                        j += 1;
                    } else {
                        break;
                    }
                }
                let text = &src[start..j];
                let n = text
                    .parse::<f64>()
                    .map_err(|e| ExprError::Lex(start, format!("bad number '{}': {}", text, e)))?;
                tokens.push(Token::Number(n));
                i = j;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                let mut j = i;
                while j < bytes.len() {
                    let d = bytes[j] as char;
                    if d.is_ascii_alphanumeric() || d == '_' {
                        j += 1;
                    } else {
                        break;
                    }
                }
                let word = &src[start..j];
                tokens.push(match word {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Ident(word.to_string()),
                });
                i = j;
            }
            other => {
                return Err(ExprError::Lex(i, format!("unexpected character '{}'", other)));
            }
        }
    }
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// AST and parser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    /// Dotted path resolved against the context.
    Path(Vec<String>),
    Call(String, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
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

    fn bump(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eat(&mut self, t: &Token) -> bool {
        if self.peek() == Some(t) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, t: Token) -> Result<(), ExprError> {
        if self.eat(&t) {
            Ok(())
        } else {
            Err(ExprError::Parse(format!(
                "expected {:?}, found {:?}",
                t,
                self.peek()
            )))
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, ExprError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_and()?;
        while self.eat(&Token::Or) {
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinaryOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_not()?;
        while self.eat(&Token::And) {
            let rhs = self.parse_not()?;
            lhs = Expr::Binary(BinaryOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, ExprError> {
        if self.eat(&Token::Not) {
            let inner = self.parse_not()?;
            Ok(Expr::Unary(UnaryOp::Not, Box::new(inner)))
        } else {
            self.parse_cmp()
        }
    }

    fn parse_cmp(&mut self) -> Result<Expr, ExprError> {
        let lhs = self.parse_add()?;
        let op = match self.peek() {
            Some(Token::Eq) => Some(BinaryOp::Eq),
            Some(Token::Ne) => Some(BinaryOp::Ne),
            Some(Token::Lt) => Some(BinaryOp::Lt),
            Some(Token::Le) => Some(BinaryOp::Le),
            Some(Token::Gt) => Some(BinaryOp::Gt),
            Some(Token::Ge) => Some(BinaryOp::Ge),
            _ => None,
        };
        if let Some(op) = op {
            self.bump();
            let rhs = self.parse_add()?;
            Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)))
        } else {
            Ok(lhs)
        }
    }

    fn parse_add(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_mul()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_mul()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_mul(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        if self.eat(&Token::Minus) {
            let inner = self.parse_unary()?;
            Ok(Expr::Unary(UnaryOp::Neg, Box::new(inner)))
        } else {
            self.parse_primary()
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        match self.bump() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::True) => Ok(Expr::Bool(true)),
            Some(Token::False) => Ok(Expr::Bool(false)),
            Some(Token::Null) => Ok(Expr::Null),
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if self.eat(&Token::LParen) {
                    let mut args = Vec::new();
                    if !self.eat(&Token::RParen) {
                        loop {
                            args.push(self.parse_expr()?);
                            if self.eat(&Token::RParen) {
                                break;
                            }
                            self.expect(Token::Comma)?;
                        }
                    }
                    Ok(Expr::Call(name, args))
                } else {
                    let mut path = vec![name];
                    while self.eat(&Token::Dot) {
                        match self.bump() {
                            Some(Token::Ident(part)) => path.push(part),
                            other => {
                                return Err(ExprError::Parse(format!(
                                    "expected identifier after '.', found {:?}",
                                    other
                                )));
                            }
                        }
                    }
                    Ok(Expr::Path(path))
                }
            }
            other => Err(ExprError::Parse(format!("unexpected token {:?}", other))),
        }
    }
}

/// Parses `src` into an AST.
pub fn parse(src: &str) -> Result<Expr, ExprError> {
    let tokens = lex(src)?;
    if tokens.is_empty() {
        return Err(ExprError::Parse("empty expression".into()));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(ExprError::Parse(format!(
            "trailing input after expression: {:?}",
            parser.peek()
        )));
    }
    Ok(expr)
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

fn lookup_path<'a>(ctx: &'a Value, path: &[String]) -> &'a Value {
    let mut current = ctx;
    for part in path {
        match current.get(part) {
            Some(v) => current = v,
            None => return &Value::Null,
        }
    }
    current
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn as_number(v: &Value, what: &str) -> Result<f64, ExprError> {
    v.as_f64()
        .ok_or_else(|| ExprError::Eval(format!("{} is not a number: {}", what, v)))
}

fn as_date(v: &Value, what: &str) -> Result<NaiveDate, ExprError> {
    let s = v
        .as_str()
        .ok_or_else(|| ExprError::Eval(format!("{} is not a date string: {}", what, v)))?;
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| ExprError::Eval(format!("{} is not an ISO date: {}", what, e)))
}

fn compare(op: BinaryOp, l: &Value, r: &Value) -> Result<bool, ExprError> {
    use BinaryOp::*;
    match op {
        Eq => Ok(values_equal(l, r)),
        Ne => Ok(!values_equal(l, r)),
        Lt | Le | Gt | Ge => {
            let ordering = match (l, r) {
                (Value::Number(a), Value::Number(b)) => {
                    let (a, b) = (
                        a.as_f64().unwrap_or(f64::NAN),
                        b.as_f64().unwrap_or(f64::NAN),
                    );
                    a.partial_cmp(&b)
                }
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => None,
            };
            let Some(ordering) = ordering else {
                // Ordered comparison against null or mixed types is false,
                // not an error: guards routinely probe optional fields.
                return Ok(false);
            };
            Ok(match op {
                Lt => ordering.is_lt(),
                Le => ordering.is_le(),
                Gt => ordering.is_gt(),
                Ge => ordering.is_ge(),
                _ => unreachable!(),
            })
        }
        _ => Err(ExprError::Eval("not a comparison operator".into())),
    }
}

fn values_equal(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Number(a), Value::Number(b)) => {
            a.as_f64().unwrap_or(f64::NAN) == b.as_f64().unwrap_or(f64::NAN)
        }
        _ => l == r,
    }
}

fn call_function(name: &str, args: &[Value], ctx: &Value) -> Result<Value, ExprError> {
    let arity = |expected: usize| {
        if args.len() == expected {
            Ok(())
        } else {
            Err(ExprError::Eval(format!(
                "{}() expects {} argument(s), got {}",
                name,
                expected,
                args.len()
            )))
        }
    };
    match name {
        // Absolute difference in calendar days.
        "days_between" => {
            arity(2)?;
            let a = as_date(&args[0], "days_between arg 1")?;
            let b = as_date(&args[1], "days_between arg 2")?;
            Ok(Value::from((b - a).num_days().abs()))
        }
        // Inclusive span in calendar days.
        "total_days" => {
            arity(2)?;
            let a = as_date(&args[0], "total_days arg 1")?;
            let b = as_date(&args[1], "total_days arg 2")?;
            Ok(Value::from((b - a).num_days().abs() + 1))
        }
        // True when the context's `roles` array contains the given code.
        "has_role" => {
            arity(1)?;
            let role = args[0]
                .as_str()
                .ok_or_else(|| ExprError::Eval("has_role() expects a string".into()))?;
            let roles = lookup_path(ctx, &["roles".to_string()]);
            Ok(Value::Bool(
                roles
                    .as_array()
                    .is_some_and(|a| a.iter().any(|v| v.as_str() == Some(role))),
            ))
        }
        "min" => {
            arity(2)?;
            let a = as_number(&args[0], "min arg 1")?;
            let b = as_number(&args[1], "min arg 2")?;
            Ok(Value::from(a.min(b)))
        }
        "max" => {
            arity(2)?;
            let a = as_number(&args[0], "max arg 1")?;
            let b = as_number(&args[1], "max arg 2")?;
            Ok(Value::from(a.max(b)))
        }
        "abs" => {
            arity(1)?;
            Ok(Value::from(as_number(&args[0], "abs arg")?.abs()))
        }
        "floor" => {
            arity(1)?;
            Ok(Value::from(as_number(&args[0], "floor arg")?.floor()))
        }
        "ceil" => {
            arity(1)?;
            Ok(Value::from(as_number(&args[0], "ceil arg")?.ceil()))
        }
        "round" => {
            arity(1)?;
            Ok(Value::from(as_number(&args[0], "round arg")?.round()))
        }
        "len" => {
            arity(1)?;
            let n = match &args[0] {
                Value::String(s) => s.chars().count(),
                Value::Array(a) => a.len(),
                other => {
                    return Err(ExprError::Eval(format!("len() of non-collection: {}", other)));
                }
            };
            Ok(Value::from(n as i64))
        }
        "contains" => {
            arity(2)?;
            let found = match (&args[0], &args[1]) {
                (Value::String(hay), Value::String(needle)) => hay.contains(needle.as_str()),
                (Value::Array(hay), needle) => hay.iter().any(|v| values_equal(v, needle)),
                _ => false,
            };
            Ok(Value::Bool(found))
        }
        "lower" => {
            arity(1)?;
            let s = args[0]
                .as_str()
                .ok_or_else(|| ExprError::Eval("lower() expects a string".into()))?;
            Ok(Value::String(s.to_lowercase()))
        }
        _ => Err(ExprError::UnknownFunction(name.to_string())),
    }
}

/// Evaluates a parsed expression against a context object.
pub fn eval(expr: &Expr, ctx: &Value) -> Result<Value, ExprError> {
    match expr {
        Expr::Number(n) => Ok(Value::from(*n)),
        Expr::Str(s) => Ok(Value::String(s.clone())),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Null => Ok(Value::Null),
        Expr::Path(path) => Ok(lookup_path(ctx, path).clone()),
        Expr::Call(name, arg_exprs) => {
            let mut args = Vec::with_capacity(arg_exprs.len());
            for a in arg_exprs {
                args.push(eval(a, ctx)?);
            }
            call_function(name, &args, ctx)
        }
        Expr::Unary(UnaryOp::Not, inner) => Ok(Value::Bool(!truthy(&eval(inner, ctx)?))),
        Expr::Unary(UnaryOp::Neg, inner) => {
            let v = eval(inner, ctx)?;
            Ok(Value::from(-as_number(&v, "negation operand")?))
        }
        Expr::Binary(op, lhs, rhs) => match op {
            BinaryOp::And => {
                let l = eval(lhs, ctx)?;
                if !truthy(&l) {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(truthy(&eval(rhs, ctx)?)))
            }
            BinaryOp::Or => {
                let l = eval(lhs, ctx)?;
                if truthy(&l) {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(truthy(&eval(rhs, ctx)?)))
            }
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt
            | BinaryOp::Ge => {
                let l = eval(lhs, ctx)?;
                let r = eval(rhs, ctx)?;
                Ok(Value::Bool(compare(*op, &l, &r)?))
            }
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
                let l = eval(lhs, ctx)?;
                let r = eval(rhs, ctx)?;
                // String concatenation with '+' is the one non-numeric case.
                if *op == BinaryOp::Add {
                    if let (Value::String(a), Value::String(b)) = (&l, &r) {
                        return Ok(Value::String(format!("{}{}", a, b)));
                    }
                }
                let a = as_number(&l, "left operand")?;
                let b = as_number(&r, "right operand")?;
                let result = match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div => {
                        if b == 0.0 {
                            return Err(ExprError::Eval("division by zero".into()));
                        }
                        a / b
                    }
                    BinaryOp::Rem => {
                        if b == 0.0 {
                            return Err(ExprError::Eval("remainder by zero".into()));
                        }
                        a % b
                    }
                    _ => unreachable!(),
                };
                Ok(Value::from(result))
            }
        },
    }
}

/// Parses and evaluates in one step.
pub fn evaluate(src: &str, ctx: &Value) -> Result<Value, ExprError> {
    let expr = parse(src)?;
    eval(&expr, ctx)
}

/// Evaluates a guard: the truthiness of the result.
pub fn evaluate_bool(src: &str, ctx: &Value) -> Result<bool, ExprError> {
    Ok(truthy(&evaluate(src, ctx)?))
}

/// Evaluates a rule expression expected to produce a number of days.
pub fn evaluate_number(src: &str, ctx: &Value) -> Result<f64, ExprError> {
    let v = evaluate(src, ctx)?;
    as_number(&v, "rule result")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> Value {
        json!({
            "service_years": 3.5,
            "service_months": 42,
            "department_code": "ENG",
            "employee_status": "active",
            "working_days": 5.0,
            "roles": ["employee", "hr_manager"],
            "leave": { "from_date": "2025-02-03", "to_date": "2025-02-07" },
        })
    }

    #[test]
    fn arithmetic_and_precedence() {
        let c = json!({});
        assert_eq!(evaluate("1 + 2 * 3", &c).unwrap(), json!(7.0));
        assert_eq!(evaluate("(1 + 2) * 3", &c).unwrap(), json!(9.0));
        assert_eq!(evaluate("10 / 4", &c).unwrap(), json!(2.5));
        assert_eq!(evaluate("7 % 4", &c).unwrap(), json!(3.0));
        assert_eq!(evaluate("-2 + 5", &c).unwrap(), json!(3.0));
    }

    #[test]
    fn comparisons_and_boolean_combinators() {
        let c = ctx();
        assert_eq!(evaluate_bool("service_years >= 3", &c).unwrap(), true);
        assert_eq!(evaluate_bool("service_years < 3", &c).unwrap(), false);
        assert_eq!(
            evaluate_bool("department_code == 'ENG' and working_days > 3", &c).unwrap(),
            true
        );
        assert_eq!(
            evaluate_bool("department_code == 'OPS' or working_days > 3", &c).unwrap(),
            true
        );
        assert_eq!(evaluate_bool("not (working_days > 3)", &c).unwrap(), false);
        assert_eq!(evaluate_bool("working_days != 5", &c).unwrap(), false);
    }

    #[test]
    fn dotted_paths_and_missing_fields() {
        let c = ctx();
        assert_eq!(
            evaluate("leave.from_date", &c).unwrap(),
            json!("2025-02-03")
        );
        // Missing paths resolve to null, which is falsy and compares only
        // to null.
        assert_eq!(evaluate("leave.nope", &c).unwrap(), Value::Null);
        assert_eq!(evaluate_bool("leave.nope", &c).unwrap(), false);
        assert_eq!(evaluate_bool("leave.nope == null", &c).unwrap(), true);
        assert_eq!(evaluate_bool("leave.nope > 3", &c).unwrap(), false);
    }

    #[test]
    fn whitelisted_functions() {
        let c = ctx();
        assert_eq!(
            evaluate("days_between(leave.from_date, leave.to_date)", &c).unwrap(),
            json!(4)
        );
        assert_eq!(
            evaluate("total_days(leave.from_date, leave.to_date)", &c).unwrap(),
            json!(5)
        );
        assert_eq!(evaluate_bool("has_role('hr_manager')", &c).unwrap(), true);
        assert_eq!(evaluate_bool("has_role('cfo')", &c).unwrap(), false);
        assert_eq!(evaluate("min(3, 8)", &c).unwrap(), json!(3.0));
        assert_eq!(evaluate("max(service_years, 5)", &c).unwrap(), json!(5.0));
        assert_eq!(evaluate("len(roles)", &c).unwrap(), json!(2));
        assert_eq!(
            evaluate_bool("contains(roles, 'employee')", &c).unwrap(),
            true
        );
        assert_eq!(evaluate("lower(department_code)", &c).unwrap(), json!("eng"));
    }

    #[test]
    fn rule_expressions_for_accrual() {
        let c = ctx();
        // 1.5 days/month under 5 years of service, 2 beyond.
        let rule = "(service_years < 5) * 1.5 + (service_years >= 5) * 2";
        // Booleans are not numbers; spell it with min/max instead.
        assert!(evaluate_number(rule, &c).is_err());

        let rule = "min(1.5 + service_years / 10, 2.0)";
        let days = evaluate_number(rule, &c).unwrap();
        assert!((days - 1.85).abs() < 1e-9);
    }

    #[test]
    fn unknown_functions_are_rejected() {
        let c = ctx();
        assert_eq!(
            evaluate("system('rm -rf /')", &c),
            Err(ExprError::UnknownFunction("system".into()))
        );
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let c = json!({});
        assert!(matches!(evaluate("1 / 0", &c), Err(ExprError::Eval(_))));
        assert!(matches!(evaluate("1 % 0", &c), Err(ExprError::Eval(_))));
    }

    #[test]
    fn string_concatenation() {
        let c = ctx();
        assert_eq!(
            evaluate("department_code + '-' + employee_status", &c).unwrap(),
            json!("ENG-active")
        );
    }

    /// Corpus of malformed inputs; every one must fail cleanly, never panic.
    #[test]
    fn reject_corpus() {
        let c = ctx();
        let corpus = [
            "",
            "   ",
            "1 +",
            "* 2",
            "(1 + 2",
            "1 + 2)",
            "a .",
            "a..b",
            "f(1,",
            "f(,)",
            "= 1",
            "& true",
            "| false",
            "'unterminated",
            "\"unterminated",
            "1 2",
            "a b",
            "1 == ",
            "not",
            "--",
            "@",
            "a.b(",
            "🦀",
        ];
        for src in corpus {
            assert!(
                evaluate(src, &c).is_err(),
                "expected '{}' to be rejected",
                src
            );
        }
    }

    /// Corpus of well-formed inputs; every one must evaluate.
    #[test]
    fn accept_corpus() {
        let c = ctx();
        let corpus = [
            "1",
            "1.5",
            "'x'",
            "\"x\"",
            "true",
            "false",
            "null",
            "roles",
            "leave.from_date",
            "not false",
            "!false",
            "1 + 2 - 3 * 4 / 5",
            "1 < 2 and 2 < 3 or false",
            "1 <= 1 && 2 >= 2",
            "service_years",
            "min(max(1, 2), 3)",
            "days_between('2025-01-01', '2025-12-31')",
            "has_role('employee')",
            "(((1)))",
            "-working_days",
        ];
        for src in corpus {
            assert!(
                evaluate(src, &c).is_ok(),
                "expected '{}' to evaluate: {:?}",
                src,
                evaluate(src, &c)
            );
        }
    }
}
