//! Restricted evaluator for inline nonce expressions.
//!
//! Only number and string literals, `+ - * / %`, unary sign, and parentheses are
//! understood. Anything else (identifiers, calls, member access) is an error, so a
//! page script can never execute here; the caller falls back to a token scan.
//!
//! Grammar:
//! ```text
//! expr    = term (("+" | "-") term)*
//! term    = unary (("*" | "/" | "%") unary)*
//! unary   = ("-" | "+") unary | primary
//! primary = number | string | "(" expr ")"
//! ```

use anyhow::{bail, Result};

/// Nesting limit for parentheses and unary operators.
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Str(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
}

/// Runtime value with JavaScript-like `+` semantics.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Num(f64),
    Str(String),
}

impl Value {
    /// String form as a script engine would print it (integral numbers without `.0`).
    pub fn into_string(self) -> String {
        match self {
            Value::Str(s) => s,
            Value::Num(n) => format_number(n),
        }
    }

    fn as_number(&self) -> Result<f64> {
        match self {
            Value::Num(n) => Ok(*n),
            Value::Str(s) => {
                let t = s.trim();
                if t.is_empty() {
                    return Ok(0.0);
                }
                match t.parse::<f64>() {
                    Ok(n) => Ok(n),
                    Err(_) => bail!("string {:?} is not numeric", s),
                }
            }
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Evaluate `source` and return its string value. A trailing `;` is ignored.
pub fn eval_to_string(source: &str) -> Result<String> {
    Ok(eval(source)?.into_string())
}

pub fn eval(source: &str) -> Result<Value> {
    let source = source.trim().trim_end_matches(';');
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        bail!("empty expression");
    }
    let mut parser = Parser { tokens, pos: 0 };
    let value = parser.expr(0)?;
    if parser.pos < parser.tokens.len() {
        bail!(
            "unexpected {:?} at token {}",
            parser.tokens[parser.pos],
            parser.pos
        );
    }
    Ok(value)
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
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
            '"' | '\'' => tokens.push(Token::Str(read_quoted(&chars, &mut i)?)),
            '0'..='9' | '.' => tokens.push(Token::Num(read_number(&chars, &mut i)?)),
            _ => bail!("unsupported character {:?} at position {}", c, i),
        }
    }
    Ok(tokens)
}

fn read_quoted(chars: &[char], i: &mut usize) -> Result<String> {
    let quote = chars[*i];
    let start = *i;
    *i += 1;
    let mut s = String::new();
    while *i < chars.len() {
        let c = chars[*i];
        if c == '\\' && *i + 1 < chars.len() {
            *i += 1;
            match chars[*i] {
                'x' => s.push(read_hex_escape(chars, i, 2)?),
                'u' => s.push(read_hex_escape(chars, i, 4)?),
                'n' => s.push('\n'),
                't' => s.push('\t'),
                other => s.push(other),
            }
            *i += 1;
            continue;
        }
        if c == quote {
            *i += 1;
            return Ok(s);
        }
        s.push(c);
        *i += 1;
    }
    bail!("unterminated string starting at position {}", start);
}

/// `\xHH` / `\uHHHH`; on entry `*i` points at the `x`/`u`, on exit at the last hex digit.
fn read_hex_escape(chars: &[char], i: &mut usize, len: usize) -> Result<char> {
    let digits: String = chars.iter().skip(*i + 1).take(len).collect();
    if digits.len() != len {
        bail!("truncated escape at position {}", i);
    }
    let code = u32::from_str_radix(&digits, 16)?;
    *i += len;
    match char::from_u32(code) {
        Some(c) => Ok(c),
        None => bail!("invalid escape code {:#x}", code),
    }
}

fn read_number(chars: &[char], i: &mut usize) -> Result<f64> {
    let start = *i;
    while *i < chars.len() && (chars[*i].is_ascii_digit() || chars[*i] == '.') {
        *i += 1;
    }
    let text: String = chars[start..*i].iter().collect();
    match text.parse::<f64>() {
        Ok(n) => Ok(n),
        Err(_) => bail!("invalid number {:?} at position {}", text, start),
    }
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
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expr(&mut self, depth: usize) -> Result<Value> {
        let mut left = self.term(depth)?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.advance();
                    let right = self.term(depth)?;
                    left = add(left, right)?;
                }
                Some(Token::Minus) => {
                    self.advance();
                    let right = self.term(depth)?;
                    left = Value::Num(left.as_number()? - right.as_number()?);
                }
                _ => return Ok(left),
            }
        }
    }

    fn term(&mut self, depth: usize) -> Result<Value> {
        let mut left = self.unary(depth)?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => Token::Star,
                Some(Token::Slash) => Token::Slash,
                Some(Token::Percent) => Token::Percent,
                _ => return Ok(left),
            };
            self.advance();
            let a = left.as_number()?;
            let b = self.unary(depth)?.as_number()?;
            left = Value::Num(match op {
                Token::Star => a * b,
                Token::Slash if b == 0.0 => bail!("division by zero"),
                Token::Slash => a / b,
                Token::Percent if b == 0.0 => bail!("modulo by zero"),
                _ => a % b,
            });
        }
    }

    fn unary(&mut self, depth: usize) -> Result<Value> {
        if depth > MAX_DEPTH {
            bail!("expression nested too deeply");
        }
        match self.peek() {
            Some(Token::Minus) => {
                self.advance();
                Ok(Value::Num(-self.unary(depth + 1)?.as_number()?))
            }
            Some(Token::Plus) => {
                self.advance();
                Ok(Value::Num(self.unary(depth + 1)?.as_number()?))
            }
            _ => self.primary(depth),
        }
    }

    fn primary(&mut self, depth: usize) -> Result<Value> {
        match self.advance() {
            Some(Token::Num(n)) => Ok(Value::Num(n)),
            Some(Token::Str(s)) => Ok(Value::Str(s)),
            Some(Token::LParen) => {
                let value = self.expr(depth + 1)?;
                match self.advance() {
                    Some(Token::RParen) => Ok(value),
                    Some(tok) => bail!("expected ')', got {:?}", tok),
                    None => bail!("expected ')', got end of input"),
                }
            }
            Some(tok) => bail!("unexpected {:?} at token {}", tok, self.pos - 1),
            None => bail!("unexpected end of input"),
        }
    }
}

fn add(left: Value, right: Value) -> Result<Value> {
    match (left, right) {
        (Value::Num(a), Value::Num(b)) => Ok(Value::Num(a + b)),
        (a, b) => Ok(Value::Str(a.into_string() + &b.into_string())),
    }
}
