//! Expression tokenizer
//!
//! Splits conversion/assertion expressions such as
//! `IF(age >= 18, "adult", "minor")` into tokens.

use std::iter::Peekable;
use std::str::Chars;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    /// String literal, double or single quoted
    Text(String),
    /// Function name, field name or keyword
    Identifier(String),
    /// One of `+ - * / ^ & = <> >= <= < >`
    Operator(String),
    OpenParen,
    CloseParen,
    Comma,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenizeError {
    pub message: String,
    pub position: usize,
}

impl TokenizeError {
    fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

impl std::fmt::Display for TokenizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "at position {}: {}", self.position, self.message)
    }
}

impl std::error::Error for TokenizeError {}

pub struct Tokenizer<'a> {
    chars: Peekable<Chars<'a>>,
    position: usize,
}

impl<'a> Tokenizer<'a> {
    /// A leading `=` is accepted and dropped
    pub fn new(source: &'a str) -> Self {
        let source = source.trim_start();
        let source = source.strip_prefix('=').unwrap_or(source);
        Self {
            chars: source.chars().peekable(),
            position: 0,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, TokenizeError> {
        let mut tokens = Vec::new();
        while let Some(token) = self.next_token()? {
            tokens.push(token);
        }
        Ok(tokens)
    }

    fn next_token(&mut self) -> Result<Option<Token>, TokenizeError> {
        while self.next_if(char::is_whitespace).is_some() {}

        let Some(c) = self.chars.peek().copied() else {
            return Ok(None);
        };

        let token = match c {
            '"' | '\'' => self.read_string()?,
            '(' | ')' | ',' => {
                self.bump();
                match c {
                    '(' => Token::OpenParen,
                    ')' => Token::CloseParen,
                    _ => Token::Comma,
                }
            }
            '+' | '-' | '*' | '/' | '^' | '&' | '=' => {
                self.bump();
                Token::Operator(c.to_string())
            }
            '<' => {
                self.bump();
                if self.next_if(|c| c == '=').is_some() {
                    Token::Operator("<=".into())
                } else if self.next_if(|c| c == '>').is_some() {
                    Token::Operator("<>".into())
                } else {
                    Token::Operator("<".into())
                }
            }
            '>' => {
                self.bump();
                if self.next_if(|c| c == '=').is_some() {
                    Token::Operator(">=".into())
                } else {
                    Token::Operator(">".into())
                }
            }
            c if c.is_ascii_digit() || c == '.' => self.read_number()?,
            c if c.is_alphabetic() || c == '_' => self.read_identifier(),
            c => {
                return Err(TokenizeError::new(
                    format!("unexpected character '{}'", c),
                    self.position,
                ))
            }
        };
        Ok(Some(token))
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next();
        if c.is_some() {
            self.position += 1;
        }
        c
    }

    fn next_if(&mut self, pred: impl FnOnce(char) -> bool) -> Option<char> {
        let c = self.chars.next_if(|c| pred(*c));
        if c.is_some() {
            self.position += 1;
        }
        c
    }

    fn read_string(&mut self) -> Result<Token, TokenizeError> {
        let start = self.position;
        let quote = self.bump();
        let mut value = String::new();

        loop {
            match self.bump() {
                None => return Err(TokenizeError::new("unterminated string literal", start)),
                Some(c) if Some(c) == quote => {
                    // doubled quote is an escaped quote
                    match self.next_if(|n| Some(n) == quote) {
                        Some(q) => value.push(q),
                        None => break,
                    }
                }
                Some(c) => value.push(c),
            }
        }
        Ok(Token::Text(value))
    }

    fn read_number(&mut self) -> Result<Token, TokenizeError> {
        let start = self.position;
        let mut digits = String::new();

        while let Some(c) = self.next_if(|c| c.is_ascii_digit()) {
            digits.push(c);
        }
        if let Some(dot) = self.next_if(|c| c == '.') {
            digits.push(dot);
            while let Some(c) = self.next_if(|c| c.is_ascii_digit()) {
                digits.push(c);
            }
        }
        if let Some(e) = self.next_if(|c| c == 'e' || c == 'E') {
            digits.push(e);
            if let Some(sign) = self.next_if(|c| c == '+' || c == '-') {
                digits.push(sign);
            }
            while let Some(c) = self.next_if(|c| c.is_ascii_digit()) {
                digits.push(c);
            }
        }

        digits
            .parse::<f64>()
            .map(Token::Number)
            .map_err(|_| TokenizeError::new(format!("invalid number '{}'", digits), start))
    }

    fn read_identifier(&mut self) -> Token {
        let mut ident = String::new();
        while let Some(c) = self.next_if(|c| c.is_alphanumeric() || c == '_' || c == '.') {
            ident.push(c);
        }
        Token::Identifier(ident)
    }
}

pub fn tokenize(source: &str) -> Result<Vec<Token>, TokenizeError> {
    Tokenizer::new(source).tokenize()
}
