use crate::error::LexError;
use crate::token::{Span, Spanned, Token};

/// Tokenizer for the `<CsInstruments>` section.
///
/// Spans are byte offsets into the whole document: `base` is the offset of
/// the orchestra text within it.
pub struct Lexer {
    chars: Vec<char>,
    /// `byte_offsets[i]` = document byte offset of `chars[i]`;
    /// `byte_offsets[chars.len()]` is the end sentinel.
    byte_offsets: Vec<usize>,
    pos: usize,
}

impl Lexer {
    pub fn new(input: &str, base: usize) -> Self {
        let chars: Vec<char> = input.chars().collect();
        let mut byte_offsets = Vec::with_capacity(chars.len() + 1);
        let mut offset = base;
        for ch in &chars {
            byte_offsets.push(offset);
            offset += ch.len_utf8();
        }
        byte_offsets.push(offset);
        Lexer {
            chars,
            byte_offsets,
            pos: 0,
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<Spanned>, LexError> {
        let mut tokens = Vec::new();
        loop {
            let spanned = self.next_token()?;
            let is_eof = spanned.token == Token::EOF;
            // Collapse blank lines.
            let is_repeat_newline = spanned.token == Token::Newline
                && matches!(tokens.last(), None | Some(Spanned { token: Token::Newline, .. }));
            if !is_repeat_newline {
                tokens.push(spanned);
            }
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.chars.get(self.pos).copied();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn byte_pos_of(&self, char_idx: usize) -> usize {
        self.byte_offsets[char_idx.min(self.chars.len())]
    }

    fn spanned(&self, token: Token, start: usize) -> Spanned {
        Spanned {
            token,
            span: Span {
                start: self.byte_pos_of(start),
                end: self.byte_pos_of(self.pos),
            },
        }
    }

    /// Skip blanks, comments and `\` line continuations.
    fn skip_trivia(&mut self) -> Result<(), LexError> {
        while let Some(ch) = self.peek_at(0) {
            match ch {
                ' ' | '\t' | '\r' => {
                    self.pos += 1;
                }
                ';' => self.skip_line_comment(),
                '/' if self.peek_at(1) == Some('/') => self.skip_line_comment(),
                '/' if self.peek_at(1) == Some('*') => {
                    let start = self.pos;
                    self.pos += 2;
                    loop {
                        match self.advance() {
                            Some('*') if self.peek_at(0) == Some('/') => {
                                self.pos += 1;
                                break;
                            }
                            Some(_) => {}
                            None => {
                                return Err(LexError::UnterminatedComment {
                                    pos: self.byte_pos_of(start),
                                });
                            }
                        }
                    }
                }
                '\\' if matches!(self.peek_at(1), Some('\n')) => {
                    self.pos += 2;
                }
                '\\' if self.peek_at(1) == Some('\r') && self.peek_at(2) == Some('\n') => {
                    self.pos += 3;
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn skip_line_comment(&mut self) {
        while let Some(ch) = self.peek_at(0) {
            if ch == '\n' {
                break;
            }
            self.pos += 1;
        }
    }

    fn next_token(&mut self) -> Result<Spanned, LexError> {
        self.skip_trivia()?;

        let start = self.pos;
        let Some(ch) = self.peek_at(0) else {
            return Ok(self.spanned(Token::EOF, start));
        };

        let single = match ch {
            '\n' => Some(Token::Newline),
            ',' => Some(Token::Comma),
            '=' => Some(Token::Eq),
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            '^' => Some(Token::Caret),
            _ => None,
        };
        if let Some(token) = single {
            self.advance();
            return Ok(self.spanned(token, start));
        }

        match ch {
            '"' => self.lex_string(start),
            // `0dbfs` is the one identifier that starts with a digit.
            '0' if self.matches_word("0dbfs") => {
                self.pos += 5;
                Ok(self.spanned(Token::Ident("0dbfs".into()), start))
            }
            c if c.is_ascii_digit() || (c == '.' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit())) => {
                self.lex_number(start)
            }
            c if c.is_ascii_alphabetic() || c == '_' => Ok(self.lex_ident(start)),
            other => Err(LexError::UnexpectedChar {
                ch: other,
                pos: self.byte_pos_of(start),
            }),
        }
    }

    fn matches_word(&self, word: &str) -> bool {
        let len = word.chars().count();
        let matches = word.chars().enumerate().all(|(i, c)| self.peek_at(i) == Some(c));
        matches && !self.peek_at(len).is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
    }

    fn lex_string(&mut self, start: usize) -> Result<Spanned, LexError> {
        self.advance();
        let mut s = String::new();
        loop {
            match self.advance() {
                Some('"') => break,
                Some('\n') | None => {
                    return Err(LexError::UnterminatedString {
                        pos: self.byte_pos_of(start),
                    });
                }
                Some(c) => s.push(c),
            }
        }
        Ok(self.spanned(Token::StringLit(s), start))
    }

    fn lex_number(&mut self, start: usize) -> Result<Spanned, LexError> {
        let mut text = String::new();
        while let Some(c) = self.peek_at(0) {
            if c.is_ascii_digit() || c == '.' {
                text.push(c);
                self.pos += 1;
            } else if (c == 'e' || c == 'E')
                && (self.peek_at(1).is_some_and(|d| d.is_ascii_digit())
                    || (matches!(self.peek_at(1), Some('+') | Some('-'))
                        && self.peek_at(2).is_some_and(|d| d.is_ascii_digit())))
            {
                text.push(c);
                self.pos += 1;
                if let Some(sign @ ('+' | '-')) = self.peek_at(0) {
                    text.push(sign);
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
        match text.parse::<f64>() {
            Ok(n) => Ok(self.spanned(Token::Number(n), start)),
            Err(_) => Err(LexError::InvalidNumber {
                text,
                pos: self.byte_pos_of(start),
            }),
        }
    }

    fn lex_ident(&mut self, start: usize) -> Spanned {
        let mut name = String::new();
        while let Some(c) = self.peek_at(0) {
            if c.is_ascii_alphanumeric() || c == '_' {
                name.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        let token = match name.as_str() {
            "instr" => Token::Instr,
            "endin" => Token::Endin,
            _ => Token::Ident(name),
        };
        self.spanned(token, start)
    }
}
