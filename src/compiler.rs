use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ast::*;
use crate::document::CsdDocument;
use crate::dsp::table::FunctionTable;
use crate::error::{CompileError, CsdError};
use crate::lexer::Lexer;
use crate::opcode::{self, Function, OpKind, Rate};
use crate::parser::Parser;
use crate::score::{self, Score, TableDef};
use crate::token::Span;

// ── Header ──────────────────────────────────────────────────

/// Orchestra header values, fixed for the lifetime of a compiled program.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub sr: f64,
    pub kr: f64,
    pub ksmps: u32,
    pub nchnls: u32,
    pub zero_dbfs: f64,
}

impl Default for Header {
    fn default() -> Self {
        Header {
            sr: 44100.0,
            kr: 4410.0,
            ksmps: 10,
            nchnls: 1,
            zero_dbfs: 32768.0,
        }
    }
}

/// Upper bound on `ksmps * nchnls`, the size of one cycle's output buffer.
pub const MAX_CYCLE_SAMPLES: usize = 1 << 20;

const HEADER_NAMES: &[&str] = &["sr", "kr", "ksmps", "nchnls", "0dbfs"];

impl Header {
    fn value_of(&self, name: &str) -> Option<f64> {
        match name {
            "sr" => Some(self.sr),
            "kr" => Some(self.kr),
            "ksmps" => Some(self.ksmps as f64),
            "nchnls" => Some(self.nchnls as f64),
            "0dbfs" => Some(self.zero_dbfs),
            _ => None,
        }
    }
}

// ── Compiled program ────────────────────────────────────────

/// Where an expression reads a value from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    Const(f64),
    /// p-field, zero-based (`p1` is index 0).
    PField(usize),
    Local(Rate, usize),
    Global(Rate, usize),
}

/// Where a statement writes its output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Target {
    Local(Rate, usize),
    Global(Rate, usize),
}

impl Target {
    pub fn rate(&self) -> Rate {
        match self {
            Target::Local(rate, _) | Target::Global(rate, _) => *rate,
        }
    }
}

/// A resolved expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CExpr {
    Operand(Operand),
    Neg(Box<CExpr>),
    Binary(BinaryOp, Box<CExpr>, Box<CExpr>),
    Call(Function, Box<CExpr>),
}

impl CExpr {
    /// The fastest-changing input of this expression.
    pub fn rate(&self) -> Rate {
        match self {
            CExpr::Operand(Operand::Const(_)) | CExpr::Operand(Operand::PField(_)) => Rate::Init,
            CExpr::Operand(Operand::Local(rate, _)) | CExpr::Operand(Operand::Global(rate, _)) => *rate,
            CExpr::Neg(inner) | CExpr::Call(_, inner) => inner.rate(),
            CExpr::Binary(_, lhs, rhs) => lhs.rate().max(rhs.rate()),
        }
    }
}

/// One compiled statement of an instrument body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Op {
    pub kind: OpKind,
    pub name: String,
    /// Rate the statement runs at (the output rate, or audio for sinks).
    pub rate: Rate,
    pub output: Option<Target>,
    pub args: Vec<CExpr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentPlan {
    pub number: u32,
    pub init_slots: usize,
    pub control_slots: usize,
    pub audio_slots: usize,
    /// Highest p-field index referenced, plus one.
    pub pfield_count: usize,
    pub ops: Vec<Op>,
}

/// Initial values of the orchestra's global variables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Globals {
    pub init: Vec<f64>,
    pub control: Vec<f64>,
    /// One value per audio slot, broadcast over the cycle.
    pub audio: Vec<f64>,
}

/// The output of compiling a CSD document.
#[derive(Debug, Clone)]
pub struct Program {
    pub header: Header,
    pub instruments: BTreeMap<u32, Arc<InstrumentPlan>>,
    pub globals: Globals,
    pub tables: BTreeMap<u32, Arc<FunctionTable>>,
    pub score: Score,
    pub options: Vec<String>,
}

// ── Public API ──────────────────────────────────────────────

/// Compile a whole `.csd` document.
pub fn compile_document(source: &str) -> Result<Program, CsdError> {
    let document = CsdDocument::parse(source)?;
    let tokens = Lexer::new(document.instruments.text, document.instruments.offset).tokenize()?;
    let orchestra = Parser::new(tokens).parse_orchestra()?;
    let score = match &document.score {
        Some(section) => score::parse_score(section.text, section.offset)?,
        None => score::parse_score("", 0)?,
    };
    let options = document.option_flags().into_iter().map(String::from).collect();
    Ok(compile(&orchestra, score, options)?)
}

/// Compile a parsed orchestra together with its resolved score.
pub fn compile(orchestra: &Orchestra, score: Score, options: Vec<String>) -> Result<Program, CompileError> {
    let mut ctx = CompileCtx::default();
    ctx.compile_header(&orchestra.header)?;

    let mut instruments = BTreeMap::new();
    for def in &orchestra.instruments {
        let plan = ctx.compile_instrument(def)?;
        for &number in &def.numbers {
            let mut numbered = plan.clone();
            numbered.number = number;
            if instruments.insert(number, Arc::new(numbered)).is_some() {
                return Err(CompileError::DuplicateInstrument {
                    number,
                    span: def.span,
                });
            }
        }
    }

    for event in &score.events {
        if !instruments.contains_key(&event.instr) {
            return Err(CompileError::UndefinedInstrument {
                number: event.instr,
                span: event.span,
            });
        }
    }

    let mut tables = BTreeMap::new();
    for def in ctx.tables.iter().chain(score.tables.iter()) {
        let table = FunctionTable::generate(def).map_err(|detail| CompileError::InvalidTable {
            detail,
            span: def.span,
        })?;
        tables.insert(def.number, Arc::new(table));
    }

    Ok(Program {
        header: ctx.header,
        instruments,
        globals: ctx.globals,
        tables,
        score,
        options,
    })
}

// ── Compiler ────────────────────────────────────────────────

#[derive(Default)]
struct CompileCtx {
    header: Header,
    globals: Globals,
    global_names: HashMap<String, (Rate, usize)>,
    /// Tables created by `ftgen` in the header.
    tables: Vec<TableDef>,
}

/// Per-instrument variable table.
#[derive(Default)]
struct Locals {
    names: HashMap<String, (Rate, usize)>,
    counts: [usize; 3],
    pfield_count: usize,
}

fn rate_index(rate: Rate) -> usize {
    match rate {
        Rate::Init => 0,
        Rate::Control => 1,
        Rate::Audio => 2,
    }
}

/// Rate implied by a variable's prefix letter.
fn prefix_rate(c: Option<char>) -> Option<Rate> {
    match c {
        Some('i') => Some(Rate::Init),
        Some('k') => Some(Rate::Control),
        Some('a') => Some(Rate::Audio),
        _ => None,
    }
}

fn pfield_index(name: &str) -> Option<usize> {
    let digits = name.strip_prefix('p')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let n: usize = digits.parse().ok()?;
    if n == 0 { None } else { Some(n - 1) }
}

fn rate_name(rate: Rate) -> &'static str {
    match rate {
        Rate::Init => "i-rate",
        Rate::Control => "k-rate",
        Rate::Audio => "a-rate",
    }
}

impl CompileCtx {
    // ── Header ───────────────────────────────────────────────

    fn compile_header(&mut self, statements: &[Statement]) -> Result<(), CompileError> {
        let mut explicit: HashMap<&str, (f64, Span)> = HashMap::new();

        for stmt in statements {
            let spec = opcode::lookup(&stmt.opcode.text).ok_or_else(|| CompileError::UnknownOpcode {
                name: stmt.opcode.text.clone(),
                span: stmt.opcode.span,
            })?;
            if !matches!(spec.kind, OpKind::Assign | OpKind::Init | OpKind::Ftgen) {
                return Err(CompileError::RateMismatch {
                    detail: format!("'{}' is not allowed outside an instrument", stmt.opcode.text),
                    span: stmt.opcode.span,
                });
            }
            check_arity(stmt, spec.min_args, spec.max_args, spec.outputs)?;
            let output = &stmt.outputs[0];
            let values: Vec<f64> = stmt
                .args
                .iter()
                .map(|arg| self.const_eval(arg))
                .collect::<Result<_, _>>()?;

            match spec.kind {
                OpKind::Assign | OpKind::Init if HEADER_NAMES.contains(&output.text.as_str()) => {
                    let Some(name) = HEADER_NAMES.iter().copied().find(|n| *n == output.text) else {
                        continue;
                    };
                    explicit.insert(name, (values[0], stmt.span));
                    self.apply_header(name, values[0]);
                }
                OpKind::Assign | OpKind::Init => {
                    let target = self.declare_global(output)?;
                    self.set_global_initial(target, values[0]);
                }
                _ => {
                    let target = self.declare_global(output)?;
                    if target.0 != Rate::Init {
                        return Err(CompileError::RateMismatch {
                            detail: "ftgen output must be an i-rate global".into(),
                            span: output.span,
                        });
                    }
                    let number = if values[0] >= 1.0 {
                        values[0] as u32
                    } else {
                        self.next_table_number()
                    };
                    if values[2] < 1.0 {
                        return Err(CompileError::InvalidTable {
                            detail: format!("ftgen size {} is invalid", values[2]),
                            span: stmt.span,
                        });
                    }
                    self.tables.push(TableDef {
                        number,
                        size: values[2] as usize,
                        routine: values[3] as i32,
                        args: values[4..].to_vec(),
                        span: stmt.span,
                    });
                    self.set_global_initial(target, number as f64);
                }
            }
        }

        self.resolve_header(&explicit)
    }

    fn apply_header(&mut self, name: &str, value: f64) {
        match name {
            "sr" => self.header.sr = value,
            "kr" => self.header.kr = value,
            "ksmps" => self.header.ksmps = value.max(0.0) as u32,
            "nchnls" => self.header.nchnls = value.max(0.0) as u32,
            _ => self.header.zero_dbfs = value,
        }
    }

    /// Reconcile sr, kr and ksmps the way the reference engine does.
    fn resolve_header(&mut self, explicit: &HashMap<&str, (f64, Span)>) -> Result<(), CompileError> {
        let span_of = |name: &str| explicit.get(name).map(|(_, span)| *span).unwrap_or_default();
        let sr = self.header.sr;
        if !(sr > 0.0 && sr.is_finite()) {
            return Err(CompileError::InvalidHeader {
                detail: format!("sr = {sr} is not a valid sample rate"),
                span: span_of("sr"),
            });
        }

        let kr = explicit.get("kr").map(|(v, _)| *v);
        let ksmps = explicit.get("ksmps").map(|(v, _)| *v);
        let ksmps = match (kr, ksmps) {
            (Some(kr), Some(ksmps)) => {
                if kr <= 0.0 || (kr * ksmps - sr).abs() > 1e-6 {
                    return Err(CompileError::InvalidHeader {
                        detail: format!("inconsistent sr, kr, ksmps ({sr}, {kr}, {ksmps})"),
                        span: span_of("ksmps"),
                    });
                }
                ksmps
            }
            (Some(kr), None) => {
                let ratio = if kr > 0.0 { sr / kr } else { 0.0 };
                if ratio < 1.0 || (ratio - ratio.round()).abs() > 1e-9 {
                    return Err(CompileError::InvalidHeader {
                        detail: format!("sr/kr = {ratio} is not an integer"),
                        span: span_of("kr"),
                    });
                }
                ratio.round()
            }
            (None, Some(ksmps)) => ksmps,
            (None, None) => Header::default().ksmps as f64,
        };
        if ksmps < 1.0 || ksmps.fract() != 0.0 {
            return Err(CompileError::InvalidHeader {
                detail: format!("ksmps = {ksmps} must be a positive integer"),
                span: span_of("ksmps"),
            });
        }
        self.header.ksmps = ksmps as u32;
        self.header.kr = sr / ksmps;

        let nchnls = explicit.get("nchnls").map(|(v, _)| *v).unwrap_or(1.0);
        if nchnls < 1.0 || nchnls.fract() != 0.0 {
            return Err(CompileError::InvalidHeader {
                detail: format!("nchnls = {nchnls} must be a positive integer"),
                span: span_of("nchnls"),
            });
        }
        if ksmps * nchnls > MAX_CYCLE_SAMPLES as f64 {
            return Err(CompileError::InvalidHeader {
                detail: format!("ksmps * nchnls = {} exceeds {MAX_CYCLE_SAMPLES} samples per cycle", ksmps * nchnls),
                span: span_of("nchnls"),
            });
        }
        if !(self.header.zero_dbfs > 0.0) {
            return Err(CompileError::InvalidHeader {
                detail: format!("0dbfs = {} must be positive", self.header.zero_dbfs),
                span: span_of("0dbfs"),
            });
        }
        Ok(())
    }

    fn next_table_number(&self) -> u32 {
        let mut number = 101;
        while self.tables.iter().any(|t| t.number == number) {
            number += 1;
        }
        number
    }

    fn declare_global(&mut self, name: &Name) -> Result<(Rate, usize), CompileError> {
        if let Some(entry) = self.global_names.get(&name.text) {
            return Ok(*entry);
        }
        if !name.text.starts_with('g') {
            return Err(CompileError::InvalidVariable {
                name: name.text.clone(),
                span: name.span,
            });
        }
        let rate = prefix_rate(name.text.chars().nth(1)).ok_or_else(|| CompileError::InvalidVariable {
            name: name.text.clone(),
            span: name.span,
        })?;
        let slot = match rate {
            Rate::Init => {
                self.globals.init.push(0.0);
                self.globals.init.len() - 1
            }
            Rate::Control => {
                self.globals.control.push(0.0);
                self.globals.control.len() - 1
            }
            Rate::Audio => {
                self.globals.audio.push(0.0);
                self.globals.audio.len() - 1
            }
        };
        self.global_names.insert(name.text.clone(), (rate, slot));
        Ok((rate, slot))
    }

    fn set_global_initial(&mut self, (rate, slot): (Rate, usize), value: f64) {
        match rate {
            Rate::Init => self.globals.init[slot] = value,
            Rate::Control => self.globals.control[slot] = value,
            Rate::Audio => self.globals.audio[slot] = value,
        }
    }

    /// Evaluate a header expression: numbers, header names and i-rate globals.
    fn const_eval(&self, expr: &Expr) -> Result<f64, CompileError> {
        match expr {
            Expr::Number(n, _) => Ok(*n),
            Expr::Str(_, span) => Err(CompileError::RateMismatch {
                detail: "strings are not supported here".into(),
                span: *span,
            }),
            Expr::Var(name) => {
                if let Some(v) = self.header.value_of(&name.text) {
                    return Ok(v);
                }
                match self.global_names.get(&name.text) {
                    Some((Rate::Init, slot)) => Ok(self.globals.init[*slot]),
                    Some(_) => Err(CompileError::RateMismatch {
                        detail: format!("'{}' is not an i-rate value", name.text),
                        span: name.span,
                    }),
                    None => Err(CompileError::UndefinedVariable {
                        name: name.text.clone(),
                        span: name.span,
                    }),
                }
            }
            Expr::Neg(inner, _) => Ok(-self.const_eval(inner)?),
            Expr::Binary { op, lhs, rhs } => Ok(apply_binary(*op, self.const_eval(lhs)?, self.const_eval(rhs)?)),
            Expr::Call { function, arg, .. } => {
                let f = resolve_function(function)?;
                Ok(f.apply(self.const_eval(arg)?))
            }
        }
    }

    // ── Instruments ──────────────────────────────────────────

    fn compile_instrument(&mut self, def: &InstrumentDef) -> Result<InstrumentPlan, CompileError> {
        let mut locals = Locals::default();
        let mut ops = Vec::with_capacity(def.body.len());

        for stmt in &def.body {
            let spec = opcode::lookup(&stmt.opcode.text).ok_or_else(|| CompileError::UnknownOpcode {
                name: stmt.opcode.text.clone(),
                span: stmt.opcode.span,
            })?;
            check_arity(stmt, spec.min_args, spec.max_args, spec.outputs)?;

            // Arguments resolve before the output is declared: `a1 = a1 + 1`
            // needs an earlier definition of `a1`.
            let args: Vec<CExpr> = stmt
                .args
                .iter()
                .map(|arg| self.resolve_expr(arg, &mut locals))
                .collect::<Result<_, _>>()?;

            let output = match stmt.outputs.first() {
                Some(name) => Some(self.declare_output(name, &mut locals)?),
                None => None,
            };
            let rate = output.map(|t| t.rate()).unwrap_or(Rate::Audio);

            if let Some(target) = output {
                if !spec.output_rates.contains(&target.rate()) {
                    return Err(CompileError::RateMismatch {
                        detail: format!(
                            "'{}' cannot produce an {} output",
                            stmt.opcode.text,
                            rate_name(target.rate())
                        ),
                        span: stmt.outputs[0].span,
                    });
                }
            }

            self.check_rates(spec.kind, rate, &args, stmt)?;

            ops.push(Op {
                kind: spec.kind,
                name: stmt.opcode.text.clone(),
                rate,
                output,
                args,
                span: stmt.span,
            });
        }

        Ok(InstrumentPlan {
            number: def.numbers[0],
            init_slots: locals.counts[0],
            control_slots: locals.counts[1],
            audio_slots: locals.counts[2],
            pfield_count: locals.pfield_count.max(3),
            ops,
        })
    }

    fn check_rates(&self, kind: OpKind, rate: Rate, args: &[CExpr], stmt: &Statement) -> Result<(), CompileError> {
        let at_most = |idx: usize, max: Rate, what: &str| -> Result<(), CompileError> {
            match args.get(idx) {
                Some(arg) if arg.rate() > max => Err(CompileError::RateMismatch {
                    detail: format!(
                        "'{}' {what} must be {} or slower, found {}",
                        stmt.opcode.text,
                        rate_name(max),
                        rate_name(arg.rate())
                    ),
                    span: stmt.args[idx].span(),
                }),
                _ => Ok(()),
            }
        };

        match kind {
            OpKind::Assign => at_most(0, rate, "value"),
            OpKind::Init => at_most(0, Rate::Init, "value"),
            OpKind::Oscil | OpKind::Oscili | OpKind::Poscil => {
                at_most(0, rate, "amplitude")?;
                at_most(1, rate, "frequency")?;
                at_most(2, Rate::Init, "table")?;
                at_most(3, Rate::Init, "phase")
            }
            OpKind::Line | OpKind::Expon | OpKind::Linseg | OpKind::Expseg => {
                if matches!(kind, OpKind::Linseg | OpKind::Expseg) && args.len() % 2 == 0 {
                    return Err(CompileError::Arity {
                        opcode: stmt.opcode.text.clone(),
                        expected: "an odd number of arguments".into(),
                        found: args.len(),
                        span: stmt.span,
                    });
                }
                (0..args.len()).try_for_each(|i| at_most(i, Rate::Init, "breakpoints"))
            }
            OpKind::Linen => {
                at_most(0, rate, "amplitude")?;
                (1..4).try_for_each(|i| at_most(i, Rate::Init, "durations"))
            }
            OpKind::Rand => at_most(0, rate, "amplitude"),
            OpKind::Tone => at_most(1, Rate::Control, "cutoff"),
            OpKind::Out | OpKind::Outs => {
                let nchnls = self.header.nchnls;
                if args.len() > nchnls as usize {
                    return Err(CompileError::TooManyChannels {
                        opcode: stmt.opcode.text.clone(),
                        found: args.len(),
                        nchnls,
                        span: stmt.span,
                    });
                }
                Ok(())
            }
            OpKind::Outch => {
                if args.len() % 2 != 0 {
                    return Err(CompileError::Arity {
                        opcode: stmt.opcode.text.clone(),
                        expected: "channel/signal pairs".into(),
                        found: args.len(),
                        span: stmt.span,
                    });
                }
                (0..args.len())
                    .step_by(2)
                    .try_for_each(|i| at_most(i, Rate::Control, "channel"))
            }
            OpKind::Ftgen => Err(CompileError::RateMismatch {
                detail: "ftgen is only supported in the orchestra header".into(),
                span: stmt.opcode.span,
            }),
        }
    }

    fn declare_output(&mut self, name: &Name, locals: &mut Locals) -> Result<Target, CompileError> {
        if name.text.starts_with('g') {
            let (rate, slot) = self.declare_global(name)?;
            return Ok(Target::Global(rate, slot));
        }
        if let Some((rate, slot)) = locals.names.get(&name.text) {
            return Ok(Target::Local(*rate, *slot));
        }
        let rate = prefix_rate(name.text.chars().next()).ok_or_else(|| CompileError::InvalidVariable {
            name: name.text.clone(),
            span: name.span,
        })?;
        let slot = locals.counts[rate_index(rate)];
        locals.counts[rate_index(rate)] += 1;
        locals.names.insert(name.text.clone(), (rate, slot));
        Ok(Target::Local(rate, slot))
    }

    fn resolve_expr(&self, expr: &Expr, locals: &mut Locals) -> Result<CExpr, CompileError> {
        match expr {
            Expr::Number(n, _) => Ok(CExpr::Operand(Operand::Const(*n))),
            Expr::Str(_, span) => Err(CompileError::RateMismatch {
                detail: "strings are not supported here".into(),
                span: *span,
            }),
            Expr::Var(name) => self.resolve_var(name, locals).map(CExpr::Operand),
            Expr::Neg(inner, _) => Ok(CExpr::Neg(Box::new(self.resolve_expr(inner, locals)?))),
            Expr::Binary { op, lhs, rhs } => Ok(CExpr::Binary(
                *op,
                Box::new(self.resolve_expr(lhs, locals)?),
                Box::new(self.resolve_expr(rhs, locals)?),
            )),
            Expr::Call { function, arg, .. } => {
                let f = resolve_function(function)?;
                Ok(CExpr::Call(f, Box::new(self.resolve_expr(arg, locals)?)))
            }
        }
    }

    fn resolve_var(&self, name: &Name, locals: &mut Locals) -> Result<Operand, CompileError> {
        if let Some(idx) = pfield_index(&name.text) {
            locals.pfield_count = locals.pfield_count.max(idx + 1);
            return Ok(Operand::PField(idx));
        }
        if let Some(v) = self.header.value_of(&name.text) {
            return Ok(Operand::Const(v));
        }
        if let Some((rate, slot)) = self.global_names.get(&name.text) {
            return Ok(Operand::Global(*rate, *slot));
        }
        if let Some((rate, slot)) = locals.names.get(&name.text) {
            return Ok(Operand::Local(*rate, *slot));
        }
        let well_formed = match name.text.chars().next() {
            Some('g') => prefix_rate(name.text.chars().nth(1)).is_some(),
            first => prefix_rate(first).is_some(),
        };
        if well_formed {
            Err(CompileError::UndefinedVariable {
                name: name.text.clone(),
                span: name.span,
            })
        } else {
            Err(CompileError::InvalidVariable {
                name: name.text.clone(),
                span: name.span,
            })
        }
    }
}

fn check_arity(stmt: &Statement, min: usize, max: usize, outputs: usize) -> Result<(), CompileError> {
    let found = stmt.args.len();
    if found < min || found > max {
        let expected = if min == max {
            format!("{min} argument(s)")
        } else if max == usize::MAX {
            format!("at least {min} arguments")
        } else {
            format!("{min} to {max} arguments")
        };
        return Err(CompileError::Arity {
            opcode: stmt.opcode.text.clone(),
            expected,
            found,
            span: stmt.span,
        });
    }
    if stmt.outputs.len() != outputs {
        return Err(CompileError::Arity {
            opcode: stmt.opcode.text.clone(),
            expected: format!("{outputs} output(s)"),
            found: stmt.outputs.len(),
            span: stmt.span,
        });
    }
    Ok(())
}

fn resolve_function(name: &Name) -> Result<Function, CompileError> {
    Function::from_name(&name.text).ok_or_else(|| CompileError::UnknownOpcode {
        name: name.text.clone(),
        span: name.span,
    })
}

pub fn apply_binary(op: BinaryOp, a: f64, b: f64) -> f64 {
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        // Division by zero yields zero rather than an infinity in the output.
        BinaryOp::Div => {
            if b == 0.0 {
                0.0
            } else {
                a / b
            }
        }
        BinaryOp::Pow => a.powf(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn csd(orc: &str, sco: &str) -> String {
        format!(
            "<CsoundSynthesizer>\n<CsInstruments>\n{orc}\n</CsInstruments>\n<CsScore>\n{sco}\n</CsScore>\n</CsoundSynthesizer>\n"
        )
    }

    #[test]
    fn test_header_from_sr_and_kr() {
        let program = compile_document(&csd("sr = 44100\nkr = 441\nnchnls = 2\n0dbfs = 1\n", "e")).unwrap();
        assert_eq!(program.header.sr, 44100.0);
        assert_eq!(program.header.kr, 441.0);
        assert_eq!(program.header.ksmps, 100);
        assert_eq!(program.header.nchnls, 2);
        assert_eq!(program.header.zero_dbfs, 1.0);
    }

    #[test]
    fn test_header_defaults() {
        let program = compile_document(&csd("", "e")).unwrap();
        assert_eq!(program.header, Header::default());
    }

    #[test]
    fn test_header_from_ksmps_expression() {
        let program = compile_document(&csd("sr = 48000\nksmps = sr / 1500\n", "")).unwrap();
        assert_eq!(program.header.ksmps, 32);
        assert_eq!(program.header.kr, 1500.0);
    }

    #[test]
    fn test_non_integer_ksmps_rejected() {
        let err = compile_document(&csd("sr = 44100\nkr = 1000\n", "")).unwrap_err();
        assert!(matches!(err, CsdError::Compile(CompileError::InvalidHeader { .. })));
    }

    #[test]
    fn test_inconsistent_header_rejected() {
        let err = compile_document(&csd("sr = 44100\nkr = 4410\nksmps = 32\n", "")).unwrap_err();
        assert!(matches!(err, CsdError::Compile(CompileError::InvalidHeader { .. })));
    }

    #[test]
    fn test_oversized_cycle_buffer_rejected() {
        let err = compile_document(&csd("sr = 65536\nksmps = 65536\nnchnls = 65536\n", "")).unwrap_err();
        assert!(matches!(err, CsdError::Compile(CompileError::InvalidHeader { .. })));
        let program = compile_document(&csd("sr = 65536\nksmps = 1024\nnchnls = 1024\n", "")).unwrap();
        assert_eq!(program.header.ksmps as usize * program.header.nchnls as usize, MAX_CYCLE_SAMPLES);
    }

    #[test]
    fn test_instrument_slots_and_rates() {
        let orc = "nchnls = 2\ninstr 1\nkenv line 0, p3, 1\nasig oscili kenv * p4, p5\nouts asig, asig\nendin\n";
        let program = compile_document(&csd(orc, "i1 0 1 0.5 440")).unwrap();
        let plan = &program.instruments[&1];
        assert_eq!(plan.control_slots, 1);
        assert_eq!(plan.audio_slots, 1);
        assert_eq!(plan.pfield_count, 5);
        assert_eq!(plan.ops[0].rate, Rate::Control);
        assert_eq!(plan.ops[1].rate, Rate::Audio);
        assert_eq!(plan.ops[1].args[0].rate(), Rate::Control);
        assert_eq!(plan.ops[2].kind, OpKind::Outs);
    }

    #[test]
    fn test_unknown_opcode() {
        let err = compile_document(&csd("instr 1\nasig vco9 1, 2\nendin\n", "")).unwrap_err();
        match err {
            CsdError::Compile(CompileError::UnknownOpcode { name, .. }) => assert_eq!(name, "vco9"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_use_before_definition() {
        let err = compile_document(&csd("instr 1\nout asig\nendin\n", "")).unwrap_err();
        assert!(matches!(err, CsdError::Compile(CompileError::UndefinedVariable { .. })));
    }

    #[test]
    fn test_bad_variable_prefix() {
        let err = compile_document(&csd("instr 1\nxsig oscili 1, 440\nendin\n", "")).unwrap_err();
        assert!(matches!(err, CsdError::Compile(CompileError::InvalidVariable { .. })));
    }

    #[test]
    fn test_k_rate_assignment_from_audio_rejected() {
        let orc = "instr 1\nasig oscili 1, 440\nksig = asig\nendin\n";
        let err = compile_document(&csd(orc, "")).unwrap_err();
        assert!(matches!(err, CsdError::Compile(CompileError::RateMismatch { .. })));
    }

    #[test]
    fn test_outs_needs_two_channels() {
        let orc = "instr 1\nasig oscili 1, 440\nouts asig, asig\nendin\n";
        let err = compile_document(&csd(orc, "")).unwrap_err();
        assert!(matches!(err, CsdError::Compile(CompileError::TooManyChannels { nchnls: 1, .. })));
    }

    #[test]
    fn test_score_must_reference_defined_instruments() {
        let err = compile_document(&csd("instr 1\nendin\n", "i2 0 1")).unwrap_err();
        assert!(matches!(err, CsdError::Compile(CompileError::UndefinedInstrument { number: 2, .. })));
    }

    #[test]
    fn test_duplicate_instrument() {
        let err = compile_document(&csd("instr 1\nendin\ninstr 2, 1\nendin\n", "")).unwrap_err();
        assert!(matches!(err, CsdError::Compile(CompileError::DuplicateInstrument { number: 1, .. })));
    }

    #[test]
    fn test_globals_and_ftgen() {
        let orc = "giAmp = 0.25\ngiSaw ftgen 0, 0, 1024, 7, 1, 1024, -1\ngaMix init 0\ninstr 1\nasig oscili giAmp, 220, giSaw\ngaMix = gaMix + asig\nendin\n";
        let program = compile_document(&csd(orc, "f 1 0 16 10 1\ni1 0 1")).unwrap();
        assert_eq!(program.globals.init, vec![0.25, 101.0]);
        assert_eq!(program.globals.audio, vec![0.0]);
        assert!(program.tables.contains_key(&101));
        assert!(program.tables.contains_key(&1));
    }

    #[test]
    fn test_linseg_needs_odd_arguments() {
        let err = compile_document(&csd("instr 1\nk1 linseg 0, 1, 1, 2\nendin\n", "")).unwrap_err();
        assert!(matches!(err, CsdError::Compile(CompileError::Arity { .. })));
    }

    #[test]
    fn test_options_are_kept() {
        let src = "<CsoundSynthesizer><CsOptions>-odac -m0</CsOptions><CsInstruments>\n</CsInstruments></CsoundSynthesizer>";
        let program = compile_document(src).unwrap();
        assert_eq!(program.options, vec!["-odac", "-m0"]);
    }

    #[test]
    fn test_parse_errors_surface() {
        let err = compile_document(&csd("instr 1\nasig oscili 1,\nendin\n", "")).unwrap_err();
        assert!(matches!(err, CsdError::Parse(_)));
    }
}
