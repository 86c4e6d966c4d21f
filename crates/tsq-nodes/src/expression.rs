//! `Expression`: parses and evaluates the infix grammar from §4.3
//! (identifiers, literals, `+ - * / %`, comparisons, `&& || !`, ternary,
//! function calls) over variables resolved per-timestamp by a [`crate::join`]
//! alignment.

use std::collections::HashMap;

use tsq_core::TsqError;

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
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
}

#[derive(Debug, Clone)]
pub enum Expr {
    Number(f64),
    Ident(String),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

impl Expr {
    pub fn parse(source: &str) -> Result<Expr, TsqError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_expr(0)?;
        if parser.pos != parser.tokens.len() {
            return Err(TsqError::ParseError(format!(
                "unexpected trailing input in expression '{source}'"
            )));
        }
        Ok(expr)
    }

    /// Evaluate against a fully-resolved variable environment. Missing
    /// identifiers are an evaluation error: `join` is responsible for
    /// filling every referenced variable before this is called.
    pub fn evaluate(&self, env: &HashMap<String, f64>) -> Result<f64, TsqError> {
        Ok(match self {
            Expr::Number(n) => *n,
            Expr::Ident(name) => *env
                .get(name)
                .ok_or_else(|| TsqError::ParseError(format!("unresolved identifier '{name}'")))?,
            Expr::Not(e) => bool_to_f64(!f64_to_bool(e.evaluate(env)?)),
            Expr::Neg(e) => -e.evaluate(env)?,
            Expr::Binary(op, l, r) => {
                let a = l.evaluate(env)?;
                // short-circuit && / || as the spec requires
                if *op == BinOp::And {
                    if !f64_to_bool(a) {
                        return Ok(0.0);
                    }
                    return Ok(bool_to_f64(f64_to_bool(r.evaluate(env)?)));
                }
                if *op == BinOp::Or {
                    if f64_to_bool(a) {
                        return Ok(1.0);
                    }
                    return Ok(bool_to_f64(f64_to_bool(r.evaluate(env)?)));
                }
                let b = r.evaluate(env)?;
                match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                    BinOp::Div => a / b,
                    BinOp::Mod => a % b,
                    BinOp::Eq => bool_to_f64(a == b),
                    BinOp::Ne => bool_to_f64(a != b),
                    BinOp::Lt => bool_to_f64(a < b),
                    BinOp::Le => bool_to_f64(a <= b),
                    BinOp::Gt => bool_to_f64(a > b),
                    BinOp::Ge => bool_to_f64(a >= b),
                    BinOp::And | BinOp::Or => unreachable!("handled above"),
                }
            }
            Expr::Ternary(cond, then_e, else_e) => {
                if f64_to_bool(cond.evaluate(env)?) {
                    then_e.evaluate(env)?
                } else {
                    else_e.evaluate(env)?
                }
            }
            Expr::Call(name, args) => {
                let vals = args.iter().map(|a| a.evaluate(env)).collect::<Result<Vec<_>, _>>()?;
                call_builtin(name, &vals)?
            }
        })
    }

    /// The set of identifiers this expression references, used by the
    /// planner to determine join inputs (§4.4 step 4).
    pub fn identifiers(&self, out: &mut std::collections::BTreeSet<String>) {
        match self {
            Expr::Number(_) => {}
            Expr::Ident(name) => {
                out.insert(name.clone());
            }
            Expr::Not(e) | Expr::Neg(e) => e.identifiers(out),
            Expr::Binary(_, l, r) => {
                l.identifiers(out);
                r.identifiers(out);
            }
            Expr::Ternary(a, b, c) => {
                a.identifiers(out);
                b.identifiers(out);
                c.identifiers(out);
            }
            Expr::Call(_, args) => args.iter().for_each(|a| a.identifiers(out)),
        }
    }
}

fn f64_to_bool(v: f64) -> bool {
    v != 0.0 && !v.is_nan()
}

fn bool_to_f64(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn call_builtin(name: &str, args: &[f64]) -> Result<f64, TsqError> {
    match (name, args) {
        ("abs", [a]) => Ok(a.abs()),
        ("min", [a, b]) => Ok(a.min(*b)),
        ("max", [a, b]) => Ok(a.max(*b)),
        ("sqrt", [a]) => Ok(a.sqrt()),
        _ => Err(TsqError::ParseError(format!(
            "unknown function '{name}' with {} args",
            args.len()
        ))),
    }
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
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,
    Question,
    Colon,
    Comma,
    LParen,
    RParen,
}

fn tokenize(src: &str) -> Result<Vec<Token>, TsqError> {
    let chars: Vec<char> = src.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let n = text
                .parse()
                .map_err(|_| TsqError::ParseError(format!("bad number literal '{text}'")))?;
            out.push(Token::Number(n));
            continue;
        }
        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                i += 1;
            }
            out.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }
        macro_rules! two {
            ($next:expr, $two_tok:expr, $one_tok:expr) => {{
                if chars.get(i + 1) == Some(&$next) {
                    i += 2;
                    out.push($two_tok);
                } else {
                    i += 1;
                    out.push($one_tok);
                }
            }};
        }
        match c {
            '+' => {
                out.push(Token::Plus);
                i += 1;
            }
            '-' => {
                out.push(Token::Minus);
                i += 1;
            }
            '*' => {
                out.push(Token::Star);
                i += 1;
            }
            '/' => {
                out.push(Token::Slash);
                i += 1;
            }
            '%' => {
                out.push(Token::Percent);
                i += 1;
            }
            '?' => {
                out.push(Token::Question);
                i += 1;
            }
            ':' => {
                out.push(Token::Colon);
                i += 1;
            }
            ',' => {
                out.push(Token::Comma);
                i += 1;
            }
            '(' => {
                out.push(Token::LParen);
                i += 1;
            }
            ')' => {
                out.push(Token::RParen);
                i += 1;
            }
            '=' => two!('=', Token::Eq, Token::Eq),
            '!' => two!('=', Token::Ne, Token::Bang),
            '<' => two!('=', Token::Le, Token::Lt),
            '>' => two!('=', Token::Ge, Token::Gt),
            '&' => two!('&', Token::AndAnd, Token::AndAnd),
            '|' => two!('|', Token::OrOr, Token::OrOr),
            other => return Err(TsqError::ParseError(format!("unexpected character '{other}'"))),
        }
    }
    Ok(out)
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

    fn expect(&mut self, expected: &Token) -> Result<(), TsqError> {
        match self.bump() {
            Some(t) if &t == expected => Ok(()),
            other => Err(TsqError::ParseError(format!("expected {expected:?}, found {other:?}"))),
        }
    }

    /// Precedence-climbing parse; binds tighter with higher `min_bp`.
    fn parse_expr(&mut self, min_bp: u8) -> Result<Expr, TsqError> {
        let mut lhs = self.parse_prefix()?;

        loop {
            let Some(op) = self.peek().and_then(peek_binop) else {
                break;
            };
            let bp = binop_precedence(op);
            if bp < min_bp {
                break;
            }
            if let Some(Token::Question) = self.peek() {
                self.bump();
                let then_e = self.parse_expr(0)?;
                self.expect(&Token::Colon)?;
                let else_e = self.parse_expr(0)?;
                lhs = Expr::Ternary(Box::new(lhs), Box::new(then_e), Box::new(else_e));
                continue;
            }
            self.bump();
            let rhs = self.parse_expr(bp + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_prefix(&mut self) -> Result<Expr, TsqError> {
        match self.bump() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Minus) => Ok(Expr::Neg(Box::new(self.parse_expr(100)?))),
            Some(Token::Bang) => Ok(Expr::Not(Box::new(self.parse_expr(100)?))),
            Some(Token::LParen) => {
                let e = self.parse_expr(0)?;
                self.expect(&Token::RParen)?;
                Ok(e)
            }
            Some(Token::Ident(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.bump();
                    let mut args = Vec::new();
                    if self.peek() != Some(&Token::RParen) {
                        loop {
                            args.push(self.parse_expr(0)?);
                            if self.peek() == Some(&Token::Comma) {
                                self.bump();
                                continue;
                            }
                            break;
                        }
                    }
                    self.expect(&Token::RParen)?;
                    Ok(Expr::Call(name, args))
                } else {
                    Ok(Expr::Ident(name))
                }
            }
            other => Err(TsqError::ParseError(format!("unexpected token {other:?}"))),
        }
    }
}

fn peek_binop(t: &Token) -> Option<BinOp> {
    Some(match t {
        Token::Plus => BinOp::Add,
        Token::Minus => BinOp::Sub,
        Token::Star => BinOp::Mul,
        Token::Slash => BinOp::Div,
        Token::Percent => BinOp::Mod,
        Token::Eq => BinOp::Eq,
        Token::Ne => BinOp::Ne,
        Token::Lt => BinOp::Lt,
        Token::Le => BinOp::Le,
        Token::Gt => BinOp::Gt,
        Token::Ge => BinOp::Ge,
        Token::AndAnd => BinOp::And,
        Token::OrOr => BinOp::Or,
        Token::Question => return Some(BinOp::Or), // placeholder precedence, handled specially above
        _ => return None,
    })
}

fn binop_precedence(op: BinOp) -> u8 {
    match op {
        BinOp::Or => 1,
        BinOp::And => 2,
        BinOp::Eq | BinOp::Ne => 3,
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => 4,
        BinOp::Add | BinOp::Sub => 5,
        BinOp::Mul | BinOp::Div | BinOp::Mod => 6,
    }
}
