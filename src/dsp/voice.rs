//! Instance: one activated score event running a compiled instrument.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::compiler::{apply_binary, CExpr, Globals, InstrumentPlan, Op, Operand, Target};
use crate::opcode::{OpKind, Rate};

use super::envelope::{Curve, Envelope, Linen};
use super::filter::Tone;
use super::oscillator::{Lookup, Noise, TableOscillator};
use super::table::FunctionTable;

/// Global variable storage shared by every instance of a performance.
#[derive(Debug, Clone)]
pub struct GlobalVars {
    pub init: Vec<f64>,
    pub control: Vec<f64>,
    /// `ksmps` samples per audio slot.
    pub audio: Vec<f64>,
    ksmps: usize,
}

impl GlobalVars {
    pub fn new(initial: &Globals, ksmps: usize) -> Self {
        let audio = initial
            .audio
            .iter()
            .flat_map(|value| std::iter::repeat_n(*value, ksmps))
            .collect();
        GlobalVars {
            init: initial.init.clone(),
            control: initial.control.clone(),
            audio,
            ksmps,
        }
    }
}

/// What an instance reads and writes outside itself during one pass.
pub struct Context<'a> {
    pub sr: f64,
    pub kr: f64,
    pub ksmps: usize,
    pub nchnls: usize,
    pub tables: &'a BTreeMap<u32, Arc<FunctionTable>>,
    /// Used when an oscillator names no table.
    pub default_table: &'a Arc<FunctionTable>,
    pub globals: &'a mut GlobalVars,
    /// Interleaved output for the current cycle, `ksmps × nchnls` samples.
    pub spout: &'a mut [f64],
}

/// An init-pass failure. The instance is discarded.
#[derive(Debug, Clone, PartialEq)]
pub struct InitError {
    pub instr: u32,
    pub opcode: String,
    pub message: String,
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "INIT ERROR in instr {} (opcode {}): {}",
            self.instr, self.opcode, self.message
        )
    }
}

/// Per-statement runtime state.
#[derive(Debug, Clone)]
enum OpState {
    Stateless,
    Oscillator {
        osc: TableOscillator,
        table: Arc<FunctionTable>,
    },
    Envelope(Envelope),
    Linen(Linen),
    Noise(Noise),
    Tone(Tone),
}

#[derive(Debug, Clone)]
pub struct Instance {
    pub instr: u32,
    plan: Arc<InstrumentPlan>,
    pfields: Vec<f64>,
    init_vars: Vec<f64>,
    control_vars: Vec<f64>,
    audio_vars: Vec<f64>,
    states: Vec<OpState>,
    ksmps: usize,
    /// First cycle the instance no longer runs in; `None` while held.
    pub end_cycle: Option<u64>,
}

impl Instance {
    /// Allocate an instance and run its init pass.
    pub fn activate(
        plan: Arc<InstrumentPlan>,
        pfields: &[f64],
        end_cycle: Option<u64>,
        ctx: &mut Context<'_>,
    ) -> Result<Self, InitError> {
        let mut p = pfields.to_vec();
        if p.len() < plan.pfield_count {
            p.resize(plan.pfield_count, 0.0);
        }
        let mut instance = Instance {
            instr: plan.number,
            pfields: p,
            init_vars: vec![0.0; plan.init_slots],
            control_vars: vec![0.0; plan.control_slots],
            audio_vars: vec![0.0; plan.audio_slots * ctx.ksmps],
            states: Vec::with_capacity(plan.ops.len()),
            ksmps: ctx.ksmps,
            end_cycle,
            plan: Arc::clone(&plan),
        };
        for op in &plan.ops {
            let state = instance.init_op(op, ctx).map_err(|message| InitError {
                instr: instance.instr,
                opcode: op.name.clone(),
                message,
            })?;
            instance.states.push(state);
        }
        Ok(instance)
    }

    /// Whether the instance has played its last cycle before `cycle`.
    pub fn is_finished(&self, cycle: u64) -> bool {
        self.end_cycle.is_some_and(|end| cycle >= end)
    }

    // ── Init pass ────────────────────────────────────────────

    fn init_op(&mut self, op: &Op, ctx: &mut Context<'_>) -> Result<OpState, String> {
        let step_rate = if op.rate == Rate::Control { ctx.kr } else { ctx.sr };
        let state = match op.kind {
            OpKind::Assign | OpKind::Init => {
                let writes_now = op.kind == OpKind::Init || op.rate == Rate::Init;
                if let (true, Some(target)) = (writes_now, op.output) {
                    let value = self.eval(&op.args[0], ctx.globals, 0);
                    let frames = if target.rate() == Rate::Audio { self.ksmps } else { 1 };
                    for frame in 0..frames {
                        self.write(target, ctx.globals, frame, value);
                    }
                }
                OpState::Stateless
            }
            OpKind::Oscil | OpKind::Oscili | OpKind::Poscil => {
                let number = op.args.get(2).map(|e| self.eval(e, ctx.globals, 0)).unwrap_or(-1.0);
                let table = if number <= 0.0 {
                    Arc::clone(ctx.default_table)
                } else {
                    ctx.tables
                        .get(&(number as u32))
                        .cloned()
                        .ok_or_else(|| format!("Invalid ftable no. {number}"))?
                };
                let phase = op.args.get(3).map(|e| self.eval(e, ctx.globals, 0)).unwrap_or(0.0);
                let lookup = if op.kind == OpKind::Oscil {
                    Lookup::Truncate
                } else {
                    Lookup::Interpolate
                };
                OpState::Oscillator {
                    osc: TableOscillator::new(lookup, step_rate, phase),
                    table,
                }
            }
            OpKind::Line | OpKind::Expon | OpKind::Linseg | OpKind::Expseg => {
                let breakpoints: Vec<f64> = op.args.iter().map(|e| self.eval(e, ctx.globals, 0)).collect();
                let curve = match op.kind {
                    OpKind::Expon | OpKind::Expseg => Curve::Exponential,
                    _ => Curve::Linear,
                };
                let extend = matches!(op.kind, OpKind::Line | OpKind::Expon);
                OpState::Envelope(Envelope::new(curve, &breakpoints, step_rate, extend)?)
            }
            OpKind::Linen => {
                let rise = self.eval(&op.args[1], ctx.globals, 0);
                let duration = self.eval(&op.args[2], ctx.globals, 0);
                let decay = self.eval(&op.args[3], ctx.globals, 0);
                OpState::Linen(Linen::new(rise, duration, decay, step_rate)?)
            }
            OpKind::Rand => OpState::Noise(Noise::default()),
            OpKind::Tone => OpState::Tone(Tone::new(ctx.sr)),
            OpKind::Out | OpKind::Outs | OpKind::Outch | OpKind::Ftgen => OpState::Stateless,
        };
        Ok(state)
    }

    // ── Performance pass ─────────────────────────────────────

    /// Run one control cycle: k-rate statements once, a-rate statements
    /// once per frame.
    pub fn perform(&mut self, ctx: &mut Context<'_>) {
        let plan = Arc::clone(&self.plan);
        for (idx, op) in plan.ops.iter().enumerate() {
            match op.rate {
                Rate::Init => {}
                Rate::Control => self.run_op(idx, op, ctx, 0),
                Rate::Audio => {
                    for frame in 0..self.ksmps {
                        self.run_op(idx, op, ctx, frame);
                    }
                }
            }
        }
    }

    fn run_op(&mut self, idx: usize, op: &Op, ctx: &mut Context<'_>, frame: usize) {
        let value = match op.kind {
            OpKind::Assign => self.eval(&op.args[0], ctx.globals, frame),
            OpKind::Init | OpKind::Ftgen => return,
            OpKind::Oscil | OpKind::Oscili | OpKind::Poscil => {
                let amplitude = self.eval(&op.args[0], ctx.globals, frame);
                let frequency = self.eval(&op.args[1], ctx.globals, frame);
                match &mut self.states[idx] {
                    OpState::Oscillator { osc, table } => osc.next_value(table, amplitude, frequency),
                    _ => 0.0,
                }
            }
            OpKind::Line | OpKind::Expon | OpKind::Linseg | OpKind::Expseg => match &mut self.states[idx] {
                OpState::Envelope(env) => env.next_value(),
                _ => 0.0,
            },
            OpKind::Linen => {
                let amplitude = self.eval(&op.args[0], ctx.globals, frame);
                match &mut self.states[idx] {
                    OpState::Linen(linen) => amplitude * linen.next_gain(),
                    _ => 0.0,
                }
            }
            OpKind::Rand => {
                let amplitude = self.eval(&op.args[0], ctx.globals, frame);
                match &mut self.states[idx] {
                    OpState::Noise(noise) => noise.next_value(amplitude),
                    _ => 0.0,
                }
            }
            OpKind::Tone => {
                let input = self.eval(&op.args[0], ctx.globals, frame);
                let cutoff = self.eval(&op.args[1], ctx.globals, frame);
                match &mut self.states[idx] {
                    OpState::Tone(tone) => {
                        tone.set_cutoff(cutoff);
                        tone.process(input)
                    }
                    _ => 0.0,
                }
            }
            OpKind::Out | OpKind::Outs => {
                for (channel, arg) in op.args.iter().enumerate() {
                    let value = self.eval(arg, ctx.globals, frame);
                    ctx.spout[frame * ctx.nchnls + channel] += value;
                }
                return;
            }
            OpKind::Outch => {
                for pair in op.args.chunks(2) {
                    let channel = self.eval(&pair[0], ctx.globals, frame).round();
                    let value = self.eval(&pair[1], ctx.globals, frame);
                    // Channels outside 1..=nchnls are dropped.
                    if channel >= 1.0 && channel <= ctx.nchnls as f64 {
                        ctx.spout[frame * ctx.nchnls + channel as usize - 1] += value;
                    }
                }
                return;
            }
        };
        if let Some(target) = op.output {
            self.write(target, ctx.globals, frame, value);
        }
    }

    // ── Variables ────────────────────────────────────────────

    fn eval(&self, expr: &CExpr, globals: &GlobalVars, frame: usize) -> f64 {
        match expr {
            CExpr::Operand(operand) => self.read(*operand, globals, frame),
            CExpr::Neg(inner) => -self.eval(inner, globals, frame),
            CExpr::Binary(op, lhs, rhs) => apply_binary(
                *op,
                self.eval(lhs, globals, frame),
                self.eval(rhs, globals, frame),
            ),
            CExpr::Call(function, arg) => function.apply(self.eval(arg, globals, frame)),
        }
    }

    fn read(&self, operand: Operand, globals: &GlobalVars, frame: usize) -> f64 {
        match operand {
            Operand::Const(value) => value,
            Operand::PField(idx) => self.pfields.get(idx).copied().unwrap_or(0.0),
            Operand::Local(Rate::Init, slot) => self.init_vars[slot],
            Operand::Local(Rate::Control, slot) => self.control_vars[slot],
            Operand::Local(Rate::Audio, slot) => self.audio_vars[slot * self.ksmps + frame],
            Operand::Global(Rate::Init, slot) => globals.init[slot],
            Operand::Global(Rate::Control, slot) => globals.control[slot],
            Operand::Global(Rate::Audio, slot) => globals.audio[slot * globals.ksmps + frame],
        }
    }

    fn write(&mut self, target: Target, globals: &mut GlobalVars, frame: usize, value: f64) {
        match target {
            Target::Local(Rate::Init, slot) => self.init_vars[slot] = value,
            Target::Local(Rate::Control, slot) => self.control_vars[slot] = value,
            Target::Local(Rate::Audio, slot) => self.audio_vars[slot * self.ksmps + frame] = value,
            Target::Global(Rate::Init, slot) => globals.init[slot] = value,
            Target::Global(Rate::Control, slot) => globals.control[slot] = value,
            Target::Global(Rate::Audio, slot) => globals.audio[slot * globals.ksmps + frame] = value,
        }
    }
}
