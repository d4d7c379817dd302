use crate::ast::*;
use crate::error::ParseError;
use crate::opcode;
use crate::token::{Span, Spanned, Token};

/// Recursive-descent parser for the orchestra token stream.
pub struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Spanned>) -> Self {
        Parser { tokens, pos: 0 }
    }

    // ── Helpers ──────────────────────────────────────────────

    fn peek(&self) -> Token {
        self.tokens[self.pos].token.clone()
    }

    fn peek_at(&self, offset: usize) -> Token {
        let idx = self.pos + offset;
        if idx < self.tokens.len() {
            self.tokens[idx].token.clone()
        } else {
            Token::EOF
        }
    }

    fn span(&self) -> Span {
        self.tokens[self.pos].span
    }

    fn advance(&mut self) -> Spanned {
        let s = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        s
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek(), Token::EOF)
    }

    fn check(&self, expected: &Token) -> bool {
        std::mem::discriminant(&self.tokens[self.pos].token) == std::mem::discriminant(expected)
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        if self.is_at_end() {
            return ParseError::UnexpectedEOF {
                expected: expected.into(),
            };
        }
        ParseError::UnexpectedToken {
            expected: expected.into(),
            found: self.peek(),
            span: self.span(),
        }
    }

    fn expect_name(&mut self) -> Result<Name, ParseError> {
        match self.peek() {
            Token::Ident(text) => {
                let span = self.advance().span;
                Ok(Name { text, span })
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn expect_line_end(&mut self) -> Result<(), ParseError> {
        if self.eat(&Token::Newline) || self.is_at_end() {
            Ok(())
        } else {
            Err(self.unexpected("end of line"))
        }
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek(), Token::Newline) {
            self.advance();
        }
    }

    // ── Orchestra ────────────────────────────────────────────

    pub fn parse_orchestra(&mut self) -> Result<Orchestra, ParseError> {
        let mut orchestra = Orchestra::default();
        loop {
            self.skip_newlines();
            match self.peek() {
                Token::EOF => break,
                Token::Instr => orchestra.instruments.push(self.parse_instrument()?),
                Token::Ident(_) => orchestra.header.push(self.parse_statement()?),
                _ => return Err(self.unexpected("'instr' or a header statement")),
            }
        }
        Ok(orchestra)
    }

    fn parse_instrument(&mut self) -> Result<InstrumentDef, ParseError> {
        let start = self.advance().span;
        let mut numbers = vec![self.parse_instrument_number()?];
        while self.eat(&Token::Comma) {
            numbers.push(self.parse_instrument_number()?);
        }
        self.expect_line_end()?;

        let mut body = Vec::new();
        loop {
            self.skip_newlines();
            match self.peek() {
                Token::Endin => break,
                Token::Ident(_) => body.push(self.parse_statement()?),
                _ => return Err(self.unexpected("'endin'")),
            }
        }
        let end = self.advance().span;
        self.expect_line_end()?;

        Ok(InstrumentDef {
            numbers,
            body,
            span: start.join(end),
        })
    }

    fn parse_instrument_number(&mut self) -> Result<u32, ParseError> {
        match self.peek() {
            Token::Number(n) if n >= 1.0 && n.fract() == 0.0 && n <= u32::MAX as f64 => {
                self.advance();
                Ok(n as u32)
            }
            _ => Err(self.unexpected("instrument number")),
        }
    }

    /// One statement line. Output-less opcodes are told apart from output
    /// variables by consulting the opcode table, as the reference engine does.
    fn parse_statement(&mut self) -> Result<Statement, ParseError> {
        let start = self.span();
        let first = self.expect_name()?;

        let (outputs, opcode) = match self.peek() {
            Token::Eq => {
                let span = self.advance().span;
                (
                    vec![first],
                    Name {
                        text: "=".into(),
                        span,
                    },
                )
            }
            Token::Comma => {
                let mut outputs = vec![first];
                while self.eat(&Token::Comma) {
                    outputs.push(self.expect_name()?);
                }
                let opcode = self.expect_name()?;
                (outputs, opcode)
            }
            _ if opcode::is_sink(&first.text) => (Vec::new(), first),
            Token::Ident(_) => {
                let opcode = self.expect_name()?;
                (vec![first], opcode)
            }
            _ => return Err(self.unexpected("opcode")),
        };

        let mut args = Vec::new();
        if !matches!(self.peek(), Token::Newline | Token::EOF) {
            args.push(self.parse_expr()?);
            while self.eat(&Token::Comma) {
                args.push(self.parse_expr()?);
            }
        }
        let end = self.tokens[self.pos.saturating_sub(1)].span;
        self.expect_line_end()?;

        Ok(Statement {
            outputs,
            opcode,
            args,
            span: start.join(end),
        })
    }

    // ── Expressions ──────────────────────────────────────────

    pub fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if self.check(&Token::Minus) {
            let start = self.advance().span;
            let operand = self.parse_unary()?;
            let span = start.join(operand.span());
            return Ok(Expr::Neg(Box::new(operand), span));
        }
        if self.eat(&Token::Plus) {
            return self.parse_unary();
        }
        self.parse_power()
    }

    /// `^` binds tighter than unary minus and is right-associative.
    fn parse_power(&mut self) -> Result<Expr, ParseError> {
        let base = self.parse_primary()?;
        if self.eat(&Token::Caret) {
            let exponent = self.parse_unary()?;
            return Ok(Expr::Binary {
                op: BinaryOp::Pow,
                lhs: Box::new(base),
                rhs: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        match self.peek() {
            Token::Number(n) => {
                let span = self.advance().span;
                Ok(Expr::Number(n, span))
            }
            Token::StringLit(s) => {
                let span = self.advance().span;
                Ok(Expr::Str(s, span))
            }
            Token::Ident(_) => {
                let name = self.expect_name()?;
                if self.check(&Token::LParen) {
                    self.advance();
                    let arg = self.parse_expr()?;
                    let close = self.span();
                    if !self.eat(&Token::RParen) {
                        return Err(self.unexpected("')'"));
                    }
                    let span = name.span.join(close);
                    return Ok(Expr::Call {
                        function: name,
                        arg: Box::new(arg),
                        span,
                    });
                }
                Ok(Expr::Var(name))
            }
            Token::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                if !self.eat(&Token::RParen) {
                    return Err(self.unexpected("')'"));
                }
                Ok(inner)
            }
            _ => Err(self.unexpected("expression")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn parse(src: &str) -> Result<Orchestra, ParseError> {
        let tokens = Lexer::new(src, 0).tokenize().unwrap();
        Parser::new(tokens).parse_orchestra()
    }

    #[test]
    fn header_and_instrument() {
        let orc = parse("sr = 44100\nksmps = 32\n\ninstr 1, 2\n asig oscili p4, p5\n outs asig, asig\nendin\n")
            .unwrap();
        assert_eq!(orc.header.len(), 2);
        assert_eq!(orc.header[0].opcode.text, "=");
        assert_eq!(orc.instruments.len(), 1);
        let instr = &orc.instruments[0];
        assert_eq!(instr.numbers, vec![1, 2]);
        assert_eq!(instr.body[0].outputs[0].text, "asig");
        assert_eq!(instr.body[0].opcode.text, "oscili");
        assert_eq!(instr.body[0].args.len(), 2);
        assert!(instr.body[1].outputs.is_empty());
        assert_eq!(instr.body[1].opcode.text, "outs");
    }

    #[test]
    fn sink_with_single_argument_is_not_an_output() {
        let orc = parse("instr 1\nout asig\nendin").unwrap();
        let stmt = &orc.instruments[0].body[0];
        assert!(stmt.outputs.is_empty());
        assert_eq!(stmt.opcode.text, "out");
        assert_eq!(stmt.args, vec![Expr::Var(Name { text: "asig".into(), span: Span::new(12, 16) })]);
    }

    #[test]
    fn operator_precedence() {
        let orc = parse("instr 1\nk1 = 1 + 2 * -3 ^ 2\nendin\n").unwrap();
        match &orc.instruments[0].body[0].args[0] {
            Expr::Binary { op: BinaryOp::Add, rhs, .. } => match rhs.as_ref() {
                Expr::Binary { op: BinaryOp::Mul, rhs, .. } => {
                    assert!(matches!(rhs.as_ref(), Expr::Neg(inner, _)
                        if matches!(inner.as_ref(), Expr::Binary { op: BinaryOp::Pow, .. })));
                }
                other => panic!("unexpected {other:?}"),
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn function_call() {
        let orc = parse("instr 1\ni1 = cpspch(p5)\nendin\n").unwrap();
        assert!(matches!(
            &orc.instruments[0].body[0].args[0],
            Expr::Call { function, .. } if function.text == "cpspch"
        ));
    }

    #[test]
    fn missing_endin_is_eof_error() {
        assert!(matches!(
            parse("instr 1\nasig oscili 1, 440\n"),
            Err(ParseError::UnexpectedEOF { .. })
        ));
    }

    #[test]
    fn fractional_instrument_number_rejected() {
        assert!(matches!(
            parse("instr 1.5\nendin\n"),
            Err(ParseError::UnexpectedToken { found: Token::Number(_), .. })
        ));
    }

    #[test]
    fn multiple_outputs() {
        let orc = parse("instr 1\naL, aR oscili 1, 2\nendin\n").unwrap();
        assert_eq!(orc.instruments[0].body[0].outputs.len(), 2);
    }
}
