use crate::token::{token_to_string, Span, Token};
use std::fmt;
use std::io;

/// Any failure turning CSD text into a compiled performance.
#[derive(Debug)]
pub enum CsdError {
    Document(DocumentError),
    Lex(LexError),
    Parse(ParseError),
    Compile(CompileError),
}

#[derive(Debug)]
pub enum DocumentError {
    MissingRoot,
    MissingSection { name: &'static str },
    UnterminatedSection { name: String, pos: usize },
}

#[derive(Debug)]
pub enum LexError {
    UnexpectedChar { ch: char, pos: usize },
    UnterminatedString { pos: usize },
    UnterminatedComment { pos: usize },
    InvalidNumber { text: String, pos: usize },
}

#[derive(Debug)]
pub enum ParseError {
    UnexpectedToken {
        expected: String,
        found: Token,
        span: Span,
    },
    UnexpectedEOF {
        expected: String,
    },
    InvalidScoreField {
        text: String,
        span: Span,
    },
    UnsupportedScoreStatement {
        statement: char,
        span: Span,
    },
}

#[derive(Debug)]
pub enum CompileError {
    UnknownOpcode {
        name: String,
        span: Span,
    },
    Arity {
        opcode: String,
        expected: String,
        found: usize,
        span: Span,
    },
    InvalidVariable {
        name: String,
        span: Span,
    },
    UndefinedVariable {
        name: String,
        span: Span,
    },
    RateMismatch {
        detail: String,
        span: Span,
    },
    InvalidHeader {
        detail: String,
        span: Span,
    },
    TooManyChannels {
        opcode: String,
        found: usize,
        nchnls: u32,
        span: Span,
    },
    DuplicateInstrument {
        number: u32,
        span: Span,
    },
    UndefinedInstrument {
        number: u32,
        span: Span,
    },
    InvalidTable {
        detail: String,
        span: Span,
    },
}

impl CompileError {
    pub fn span(&self) -> Span {
        match self {
            CompileError::UnknownOpcode { span, .. }
            | CompileError::Arity { span, .. }
            | CompileError::InvalidVariable { span, .. }
            | CompileError::UndefinedVariable { span, .. }
            | CompileError::RateMismatch { span, .. }
            | CompileError::InvalidHeader { span, .. }
            | CompileError::TooManyChannels { span, .. }
            | CompileError::DuplicateInstrument { span, .. }
            | CompileError::UndefinedInstrument { span, .. }
            | CompileError::InvalidTable { span, .. } => *span,
        }
    }
}

impl CsdError {
    /// Location of the failure in the document, when known.
    pub fn span(&self) -> Option<Span> {
        match self {
            CsdError::Document(DocumentError::UnterminatedSection { pos, .. }) => {
                Some(Span::new(*pos, *pos + 1))
            }
            CsdError::Document(_) => None,
            CsdError::Lex(e) => {
                let pos = match e {
                    LexError::UnexpectedChar { pos, .. }
                    | LexError::UnterminatedString { pos }
                    | LexError::UnterminatedComment { pos }
                    | LexError::InvalidNumber { pos, .. } => *pos,
                };
                Some(Span::new(pos, pos + 1))
            }
            CsdError::Parse(ParseError::UnexpectedToken { span, .. })
            | CsdError::Parse(ParseError::InvalidScoreField { span, .. })
            | CsdError::Parse(ParseError::UnsupportedScoreStatement { span, .. }) => Some(*span),
            CsdError::Parse(ParseError::UnexpectedEOF { .. }) => None,
            CsdError::Compile(e) => Some(e.span()),
        }
    }
}

impl fmt::Display for CsdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CsdError::Document(e) => write!(f, "Document error: {e}"),
            CsdError::Lex(e) => write!(f, "Lexer error: {e}"),
            CsdError::Parse(e) => write!(f, "Parse error: {e}"),
            CsdError::Compile(e) => write!(f, "Compile error: {e}"),
        }
    }
}

impl std::error::Error for CsdError {}

impl fmt::Display for DocumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentError::MissingRoot => write!(f, "missing <CsoundSynthesizer> element"),
            DocumentError::MissingSection { name } => write!(f, "missing <{name}> section"),
            DocumentError::UnterminatedSection { name, pos } => {
                write!(f, "section <{name}> at pos {pos} is never closed")
            }
        }
    }
}

impl std::error::Error for DocumentError {}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexError::UnexpectedChar { ch, pos } => write!(f, "Unexpected char '{ch}' at pos {pos}"),
            LexError::UnterminatedString { pos } => write!(f, "Unterminated string at pos {pos}"),
            LexError::UnterminatedComment { pos } => write!(f, "Unterminated comment at pos {pos}"),
            LexError::InvalidNumber { text, pos } => write!(f, "Invalid number '{text}' at pos {pos}"),
        }
    }
}

impl std::error::Error for LexError {}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::UnexpectedToken { expected, found, span } => write!(
                f,
                "Expected {expected}, found '{}' at pos {}",
                token_to_string(found),
                span.start
            ),
            ParseError::UnexpectedEOF { expected } => {
                write!(f, "Unexpected end of orchestra, expected {expected}")
            }
            ParseError::InvalidScoreField { text, span } => {
                write!(f, "Invalid score field '{text}' at pos {}", span.start)
            }
            ParseError::UnsupportedScoreStatement { statement, span } => {
                write!(f, "Unsupported score statement '{statement}' at pos {}", span.start)
            }
        }
    }
}

impl std::error::Error for ParseError {}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::UnknownOpcode { name, .. } => write!(f, "unknown opcode '{name}'"),
            CompileError::Arity { opcode, expected, found, .. } => {
                write!(f, "'{opcode}' expects {expected}, found {found}")
            }
            CompileError::InvalidVariable { name, .. } => {
                write!(f, "'{name}' is not a valid variable name")
            }
            CompileError::UndefinedVariable { name, .. } => {
                write!(f, "variable '{name}' used before defined")
            }
            CompileError::RateMismatch { detail, .. } => write!(f, "{detail}"),
            CompileError::InvalidHeader { detail, .. } => write!(f, "{detail}"),
            CompileError::TooManyChannels { opcode, found, nchnls, .. } => {
                write!(f, "'{opcode}' writes {found} channels but nchnls = {nchnls}")
            }
            CompileError::DuplicateInstrument { number, .. } => {
                write!(f, "instr {number} redefined")
            }
            CompileError::UndefinedInstrument { number, .. } => {
                write!(f, "instr {number} is not defined")
            }
            CompileError::InvalidTable { detail, .. } => write!(f, "{detail}"),
        }
    }
}

impl std::error::Error for CompileError {}

impl From<DocumentError> for CsdError {
    fn from(e: DocumentError) -> Self {
        CsdError::Document(e)
    }
}

impl From<LexError> for CsdError {
    fn from(e: LexError) -> Self {
        CsdError::Lex(e)
    }
}

impl From<ParseError> for CsdError {
    fn from(e: ParseError) -> Self {
        CsdError::Parse(e)
    }
}

impl From<CompileError> for CsdError {
    fn from(e: CompileError) -> Self {
        CsdError::Compile(e)
    }
}

/// Failures reported by a synthesis engine while preparing a session.
#[derive(Debug)]
pub enum EngineError {
    /// The output override was refused before compilation.
    OptionRejected { option: String, reason: String },
    Compile(CsdError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::OptionRejected { option, reason } => {
                write!(f, "option '{option}' rejected: {reason}")
            }
            EngineError::Compile(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Compile(e) => Some(e),
            EngineError::OptionRejected { .. } => None,
        }
    }
}

impl From<CsdError> for EngineError {
    fn from(e: CsdError) -> Self {
        EngineError::Compile(e)
    }
}

/// Failures surfaced to the host through the decoder's open/tag surface.
#[derive(Debug)]
pub enum DecoderError {
    UnsupportedFormat(String),
    CompileFailed(EngineError),
    TaggingUnsupported,
    Io(io::Error),
}

impl DecoderError {
    /// Compile failures are reported to the host as unsupported format.
    pub fn is_unsupported_format(&self) -> bool {
        matches!(
            self,
            DecoderError::UnsupportedFormat(_) | DecoderError::CompileFailed(_)
        )
    }
}

impl fmt::Display for DecoderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecoderError::UnsupportedFormat(reason) => write!(f, "Unsupported format: {reason}"),
            DecoderError::CompileFailed(e) => write!(f, "Unsupported format: {e}"),
            DecoderError::TaggingUnsupported => write!(f, "Tagging is not supported for this format"),
            DecoderError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for DecoderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DecoderError::CompileFailed(e) => Some(e),
            DecoderError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for DecoderError {
    fn from(e: io::Error) -> Self {
        DecoderError::Io(e)
    }
}

impl From<EngineError> for DecoderError {
    fn from(e: EngineError) -> Self {
        DecoderError::CompileFailed(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_failures_count_as_unsupported_format() {
        let err = DecoderError::CompileFailed(EngineError::OptionRejected {
            option: "-o".into(),
            reason: "no device".into(),
        });
        assert!(err.is_unsupported_format());
        assert!(DecoderError::UnsupportedFormat("Invalid file size".into()).is_unsupported_format());
        assert!(!DecoderError::TaggingUnsupported.is_unsupported_format());
    }

    #[test]
    fn csd_error_span_points_at_token() {
        let err = CsdError::from(CompileError::UnknownOpcode {
            name: "vco9".into(),
            span: Span::new(10, 14),
        });
        assert_eq!(err.span(), Some(Span::new(10, 14)));
        assert_eq!(format!("{err}"), "Compile error: unknown opcode 'vco9'");
    }
}
