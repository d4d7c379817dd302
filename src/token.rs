use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Number(f64),
    StringLit(String),
    Ident(String),

    // Keywords
    Instr,
    Endin,

    // Punctuation
    Comma,  // ,
    Eq,     // =
    LParen, // (
    RParen, // )
    Plus,   // +
    Minus,  // -
    Star,   // *
    Slash,  // /
    Caret,  // ^

    // Structural
    Newline,
    EOF,
}

/// Byte range into the whole CSD document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }

    /// Smallest span covering both `self` and `other`.
    pub fn join(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Spanned {
    pub token: Token,
    pub span: Span,
}

/// Convert a token back to its approximate source representation.
pub fn token_to_string(token: &Token) -> String {
    match token {
        Token::Number(n) => {
            if *n == (*n as i64) as f64 {
                format!("{}", *n as i64)
            } else {
                format!("{n}")
            }
        }
        Token::StringLit(s) => format!("\"{s}\""),
        Token::Ident(s) => s.clone(),
        Token::Instr => "instr".into(),
        Token::Endin => "endin".into(),
        Token::Comma => ",".into(),
        Token::Eq => "=".into(),
        Token::LParen => "(".into(),
        Token::RParen => ")".into(),
        Token::Plus => "+".into(),
        Token::Minus => "-".into(),
        Token::Star => "*".into(),
        Token::Slash => "/".into(),
        Token::Caret => "^".into(),
        Token::Newline => "end of line".into(),
        Token::EOF => "end of orchestra".into(),
    }
}
