//! Diagnostic evaluator for validated formulas.
//!
//! Used by tests and the CLI `compile --value/--weight/--quantity` preview.
//! Grammar:
//!
//! ```text
//! expr   := term (('+' | '-') term)*
//! term   := factor (('*' | '/') factor)*
//! factor := number | variable | '(' expr ')' | '-' factor
//! ```

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum EvalError {
    #[error("unexpected character {0:?} at {1}")]
    UnexpectedChar(char, usize),
    #[error("unknown identifier {0:?}")]
    UnknownIdentifier(String),
    #[error("unexpected end of formula")]
    UnexpectedEnd,
    #[error("trailing input at {0}")]
    TrailingInput(usize),
    #[error("division by zero")]
    DivisionByZero,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Op(char),
    Open,
    Close,
}

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>, EvalError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
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
                let literal: String = chars[start..i].iter().collect();
                let n = literal
                    .parse()
                    .map_err(|_| EvalError::UnexpectedChar(c, start))?;
                tokens.push((start, Token::Num(n)));
            }
            'a'..='z' | '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_lowercase() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push((start, Token::Ident(chars[start..i].iter().collect())));
            }
            '+' | '-' | '*' | '/' => {
                tokens.push((i, Token::Op(c)));
                i += 1;
            }
            '(' => {
                tokens.push((i, Token::Open));
                i += 1;
            }
            ')' => {
                tokens.push((i, Token::Close));
                i += 1;
            }
            _ => return Err(EvalError::UnexpectedChar(c, i)),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [(usize, Token)],
    pos: usize,
    vars: [f64; 3],
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn next(&mut self) -> Option<&Token> {
        let t = self.tokens.get(self.pos).map(|(_, t)| t);
        self.pos += 1;
        t
    }

    fn expr(&mut self) -> Result<f64, EvalError> {
        let mut acc = self.term()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek() {
            let op = *op;
            self.pos += 1;
            let rhs = self.term()?;
            acc = if op == '+' { acc + rhs } else { acc - rhs };
        }
        Ok(acc)
    }

    fn term(&mut self) -> Result<f64, EvalError> {
        let mut acc = self.factor()?;
        while let Some(Token::Op(op @ ('*' | '/'))) = self.peek() {
            let op = *op;
            self.pos += 1;
            let rhs = self.factor()?;
            if op == '*' {
                acc *= rhs;
            } else if rhs == 0.0 {
                return Err(EvalError::DivisionByZero);
            } else {
                acc /= rhs;
            }
        }
        Ok(acc)
    }

    fn factor(&mut self) -> Result<f64, EvalError> {
        let vars = self.vars;
        match self.next().cloned() {
            Some(Token::Num(n)) => Ok(n),
            Some(Token::Ident(name)) => match name.as_str() {
                "value" => Ok(vars[0]),
                "weight" => Ok(vars[1]),
                "quantity" => Ok(vars[2]),
                _ => Err(EvalError::UnknownIdentifier(name)),
            },
            Some(Token::Op('-')) => Ok(-self.factor()?),
            Some(Token::Open) => {
                let v = self.expr()?;
                match self.next() {
                    Some(Token::Close) => Ok(v),
                    _ => Err(EvalError::UnexpectedEnd),
                }
            }
            Some(Token::Op(c)) => {
                let at = self.tokens[self.pos - 1].0;
                Err(EvalError::UnexpectedChar(c, at))
            }
            Some(Token::Close) => {
                let at = self.tokens[self.pos - 1].0;
                Err(EvalError::UnexpectedChar(')', at))
            }
            None => Err(EvalError::UnexpectedEnd),
        }
    }
}

/// Evaluate a formula for the given variable bindings.
pub fn evaluate(formula: &str, value: f64, weight: f64, quantity: f64) -> Result<f64, EvalError> {
    let tokens = tokenize(formula)?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        vars: [value, weight, quantity],
    };
    let result = parser.expr()?;
    if let Some((at, _)) = tokens.get(parser.pos) {
        return Err(EvalError::TrailingInput(*at));
    }
    Ok(result)
}
