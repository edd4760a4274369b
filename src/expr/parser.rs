//! Expression parser
//!
//! Recursive descent over the token stream. Precedence, loosest first:
//! comparison, `&`, `+ -`, `* /`, `^` (right-associative), unary minus.

use super::tokenizer::Token;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Text(String),
    Bool(bool),
    Null,
    /// Field or variable name
    Variable(String),
    Call { name: String, args: Vec<Expr> },
    Binary {
        op: String,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Negate(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl ParseError {
    fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "at token {}: {}", self.position, self.message)
    }
}

impl std::error::Error for ParseError {}

pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            position: 0,
        }
    }

    pub fn parse(mut self) -> Result<Expr, ParseError> {
        if self.tokens.is_empty() {
            return Err(ParseError::new("empty expression", 0));
        }
        let expr = self.comparison()?;
        if let Some(token) = self.peek() {
            return Err(ParseError::new(
                format!("unexpected token after expression: {:?}", token),
                self.position,
            ));
        }
        Ok(expr)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn eat_operator(&mut self, ops: &[&str]) -> Option<String> {
        match self.peek() {
            Some(Token::Operator(op)) if ops.contains(&op.as_str()) => {
                let op = op.clone();
                self.position += 1;
                Some(op)
            }
            _ => None,
        }
    }

    fn binary_level(
        &mut self,
        ops: &[&str],
        next: fn(&mut Self) -> Result<Expr, ParseError>,
    ) -> Result<Expr, ParseError> {
        let mut left = next(self)?;
        while let Some(op) = self.eat_operator(ops) {
            let right = next(self)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(&["=", "<>", "<", ">", "<=", ">="], Self::concat)
    }

    fn concat(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(&["&"], Self::term)
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(&["+", "-"], Self::factor)
    }

    fn factor(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(&["*", "/"], Self::power)
    }

    fn power(&mut self) -> Result<Expr, ParseError> {
        let base = self.unary()?;
        if self.eat_operator(&["^"]).is_some() {
            let exponent = self.power()?;
            return Ok(Expr::Binary {
                op: "^".to_string(),
                left: Box::new(base),
                right: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        if self.eat_operator(&["-"]).is_some() {
            return Ok(Expr::Negate(Box::new(self.unary()?)));
        }
        if self.eat_operator(&["+"]).is_some() {
            return self.unary();
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let position = self.position;
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Text(s)) => Ok(Expr::Text(s)),
            Some(Token::OpenParen) => {
                let inner = self.comparison()?;
                if !self.eat(&Token::CloseParen) {
                    return Err(ParseError::new("expected ')'", self.position));
                }
                Ok(inner)
            }
            Some(Token::Identifier(name)) => {
                if self.eat(&Token::OpenParen) {
                    let args = self.arguments()?;
                    return Ok(Expr::Call {
                        name: name.to_uppercase(),
                        args,
                    });
                }
                Ok(match name.to_uppercase().as_str() {
                    "TRUE" => Expr::Bool(true),
                    "FALSE" => Expr::Bool(false),
                    "NULL" => Expr::Null,
                    _ => Expr::Variable(name),
                })
            }
            Some(token) => Err(ParseError::new(
                format!("unexpected token {:?}", token),
                position,
            )),
            None => Err(ParseError::new("unexpected end of expression", position)),
        }
    }

    /// Arguments after an opening parenthesis, closing parenthesis consumed
    fn arguments(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        if self.eat(&Token::CloseParen) {
            return Ok(args);
        }
        loop {
            args.push(self.comparison()?);
            if self.eat(&Token::Comma) {
                continue;
            }
            if self.eat(&Token::CloseParen) {
                return Ok(args);
            }
            return Err(ParseError::new(
                "expected ',' or ')' in argument list",
                self.position,
            ));
        }
    }
}
