use serde::{Deserialize, Serialize};

use crate::token::Span;

/// A parsed `<CsInstruments>` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Orchestra {
    /// Statements outside any instrument (header and globals), in order.
    pub header: Vec<Statement>,
    pub instruments: Vec<InstrumentDef>,
}

/// `instr N[, M…]` … `endin`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentDef {
    pub numbers: Vec<u32>,
    pub body: Vec<Statement>,
    pub span: Span,
}

/// `[outputs] opcode [args]`, or `output = expr` (opcode `"="`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statement {
    pub outputs: Vec<Name>,
    pub opcode: Name,
    pub args: Vec<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Name {
    pub text: String,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Number(f64, Span),
    Str(String, Span),
    Var(Name),
    Neg(Box<Expr>, Span),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        function: Name,
        arg: Box<Expr>,
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Number(_, span) | Expr::Str(_, span) | Expr::Neg(_, span) => *span,
            Expr::Var(name) => name.span,
            Expr::Binary { lhs, rhs, .. } => lhs.span().join(rhs.span()),
            Expr::Call { span, .. } => *span,
        }
    }
}
