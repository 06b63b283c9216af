//! Lexer for ODE right-hand-side expressions using logos
//!
//! Supports tokens like:
//! - Identifiers: x, sigma, beta_2
//! - Numbers: 1, 2.5, 3e-2 (signs are handled by the parser)
//! - Operators: +, -, *, /
//! - Punctuation: (, ), ,
//! - Keywords: sin, cos, integ

use logos::Logos;

use crate::error::{CompileError, CompileResult};

/// Token types for the expression language
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\n\r]+")]
pub enum Token {
    // Literals
    #[regex(r"[0-9]+\.?[0-9]*([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    #[regex(r"\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Number(f64),

    // Keywords
    #[token("sin")]
    Sin,

    #[token("cos")]
    Cos,

    #[token("integ")]
    Integ,

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    // Operators
    #[token("+")]
    Plus,

    #[token("-")]
    Minus,

    #[token("*")]
    Star,

    #[token("/")]
    Slash,

    // Punctuation
    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    #[token(",")]
    Comma,
}

impl Token {
    /// Binary arithmetic operator tokens
    pub fn is_operator(&self) -> bool {
        matches!(self, Token::Plus | Token::Minus | Token::Star | Token::Slash)
    }

    /// Unary wave function tokens
    pub fn is_wave(&self) -> bool {
        matches!(self, Token::Sin | Token::Cos)
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{}", n),
            Token::Ident(s) => write!(f, "{}", s),
            Token::Sin => write!(f, "sin"),
            Token::Cos => write!(f, "cos"),
            Token::Integ => write!(f, "integ"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Comma => write!(f, ","),
        }
    }
}

/// Lexer wrapper that provides a stream of tokens
pub struct Lexer<'source> {
    inner: logos::Lexer<'source, Token>,
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source str) -> Self {
        Self {
            inner: Token::lexer(source),
        }
    }

    /// Get current position in source
    pub fn span(&self) -> std::ops::Range<usize> {
        self.inner.span()
    }

    /// Collect every token, failing on the first character no token matches
    pub fn tokenize(mut self) -> CompileResult<Vec<Token>> {
        let mut tokens = Vec::new();
        while let Some(result) = self.inner.next() {
            match result {
                Ok(token) => tokens.push(token),
                Err(()) => {
                    let span = self.span();
                    return Err(CompileError::LexerError {
                        position: span.start,
                        message: format!("unexpected input '{}'", self.inner.slice()),
                    });
                }
            }
        }
        Ok(tokens)
    }
}

impl<'source> Iterator for Lexer<'source> {
    type Item = Result<Token, ()>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}
