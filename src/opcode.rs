//! Opcode table: names, arities and the rates each opcode may run at.

use serde::{Deserialize, Serialize};

/// Evaluation rate of a variable or statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Rate {
    /// Once, when an instance is activated.
    Init,
    /// Once per control cycle.
    Control,
    /// Once per audio frame.
    Audio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpKind {
    Assign,
    Init,
    Oscil,
    Oscili,
    Poscil,
    Line,
    Expon,
    Linseg,
    Expseg,
    Linen,
    Rand,
    Tone,
    Out,
    Outs,
    Outch,
    Ftgen,
}

/// Static description of one opcode.
#[derive(Debug, Clone, Copy)]
pub struct OpcodeSpec {
    pub name: &'static str,
    pub kind: OpKind,
    pub outputs: usize,
    pub min_args: usize,
    /// `usize::MAX` for variadic opcodes.
    pub max_args: usize,
    /// Rates the single output may have; empty for sinks.
    pub output_rates: &'static [Rate],
}

const IKA: &[Rate] = &[Rate::Init, Rate::Control, Rate::Audio];
const KA: &[Rate] = &[Rate::Control, Rate::Audio];
const A: &[Rate] = &[Rate::Audio];
const I: &[Rate] = &[Rate::Init];
const NONE: &[Rate] = &[];

pub const OPCODES: &[OpcodeSpec] = &[
    OpcodeSpec { name: "=", kind: OpKind::Assign, outputs: 1, min_args: 1, max_args: 1, output_rates: IKA },
    OpcodeSpec { name: "init", kind: OpKind::Init, outputs: 1, min_args: 1, max_args: 1, output_rates: IKA },
    OpcodeSpec { name: "oscil", kind: OpKind::Oscil, outputs: 1, min_args: 2, max_args: 4, output_rates: KA },
    OpcodeSpec { name: "oscili", kind: OpKind::Oscili, outputs: 1, min_args: 2, max_args: 4, output_rates: KA },
    OpcodeSpec { name: "poscil", kind: OpKind::Poscil, outputs: 1, min_args: 2, max_args: 4, output_rates: KA },
    OpcodeSpec { name: "line", kind: OpKind::Line, outputs: 1, min_args: 3, max_args: 3, output_rates: KA },
    OpcodeSpec { name: "expon", kind: OpKind::Expon, outputs: 1, min_args: 3, max_args: 3, output_rates: KA },
    OpcodeSpec { name: "linseg", kind: OpKind::Linseg, outputs: 1, min_args: 3, max_args: usize::MAX, output_rates: KA },
    OpcodeSpec { name: "expseg", kind: OpKind::Expseg, outputs: 1, min_args: 3, max_args: usize::MAX, output_rates: KA },
    OpcodeSpec { name: "linen", kind: OpKind::Linen, outputs: 1, min_args: 4, max_args: 4, output_rates: KA },
    OpcodeSpec { name: "rand", kind: OpKind::Rand, outputs: 1, min_args: 1, max_args: 1, output_rates: KA },
    OpcodeSpec { name: "tone", kind: OpKind::Tone, outputs: 1, min_args: 2, max_args: 2, output_rates: A },
    OpcodeSpec { name: "out", kind: OpKind::Out, outputs: 0, min_args: 1, max_args: usize::MAX, output_rates: NONE },
    OpcodeSpec { name: "outs", kind: OpKind::Outs, outputs: 0, min_args: 2, max_args: 2, output_rates: NONE },
    OpcodeSpec { name: "outch", kind: OpKind::Outch, outputs: 0, min_args: 2, max_args: usize::MAX, output_rates: NONE },
    OpcodeSpec { name: "ftgen", kind: OpKind::Ftgen, outputs: 1, min_args: 5, max_args: usize::MAX, output_rates: I },
];

pub fn lookup(name: &str) -> Option<&'static OpcodeSpec> {
    OPCODES.iter().find(|spec| spec.name == name)
}

/// Whether `name` can start a statement with no output variables.
pub fn is_sink(name: &str) -> bool {
    lookup(name).is_some_and(|spec| spec.outputs == 0)
}

/// One-argument functions usable inside expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Function {
    Abs,
    Int,
    Frac,
    Round,
    Floor,
    Ceil,
    Sqrt,
    Exp,
    Log,
    Sin,
    Cos,
    Ampdb,
    Dbamp,
    Cpspch,
    Cpsmidinn,
}

impl Function {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "abs" => Function::Abs,
            "int" => Function::Int,
            "frac" => Function::Frac,
            "round" => Function::Round,
            "floor" => Function::Floor,
            "ceil" => Function::Ceil,
            "sqrt" => Function::Sqrt,
            "exp" => Function::Exp,
            "log" => Function::Log,
            "sin" => Function::Sin,
            "cos" => Function::Cos,
            "ampdb" => Function::Ampdb,
            "dbamp" => Function::Dbamp,
            "cpspch" => Function::Cpspch,
            "cpsmidinn" => Function::Cpsmidinn,
            _ => return None,
        })
    }

    pub fn apply(self, x: f64) -> f64 {
        match self {
            Function::Abs => x.abs(),
            Function::Int => x.trunc(),
            Function::Frac => x.fract(),
            Function::Round => x.round(),
            Function::Floor => x.floor(),
            Function::Ceil => x.ceil(),
            Function::Sqrt => x.sqrt(),
            Function::Exp => x.exp(),
            Function::Log => x.ln(),
            Function::Sin => x.sin(),
            Function::Cos => x.cos(),
            Function::Ampdb => 10.0_f64.powf(x / 20.0),
            Function::Dbamp => 20.0 * x.log10(),
            Function::Cpspch => cpspch(x),
            Function::Cpsmidinn => midi_to_frequency(x, 440.0),
        }
    }
}

/// Convert a MIDI note number to frequency using the given tuning pitch.
///
/// `tuning_pitch` is the frequency of A4 (MIDI 69).
pub fn midi_to_frequency(midi: f64, tuning_pitch: f64) -> f64 {
    tuning_pitch * (2.0_f64).powf((midi - 69.0) / 12.0)
}

/// Octave-point-pitch-class to Hz: `8.09` is A4, `8.00` is middle C.
pub fn cpspch(pch: f64) -> f64 {
    let octave = pch.trunc();
    let pitch_class = (pch - octave) * 100.0;
    let oct = octave + pitch_class / 12.0;
    440.0 * (2.0_f64).powf(oct - 8.75)
}
