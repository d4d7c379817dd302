//! CSD Engine: performs a compiled orchestra and score one control cycle
//! at a time.
//!
//! Each cycle clears the output buffer, activates due score events, runs
//! every active instance in instrument-number order, then retires the
//! instances whose duration has elapsed.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::compiler::{compile_document, Header, Program};
use crate::diagnostic::render_report;
use crate::engine::{MessageCallback, MessageLevel, OutputOverride, Sample, SynthEngine, TickStatus};
use crate::error::EngineError;

use super::table::FunctionTable;
use super::voice::{Context, GlobalVars, Instance};

/// Language level this engine follows, packed as `major*1000 + minor*10 + patch`.
pub const ENGINE_VERSION: u32 = 6180;

pub const ENGINE_NAME: &str = "CsdEngine";

/// A score event waiting for its start cycle.
#[derive(Debug, Clone)]
struct PendingEvent {
    instr: u32,
    start_cycle: u64,
    /// `None` for held notes.
    end_cycle: Option<u64>,
    /// p3 = 0: run the init pass only.
    init_only: bool,
    pfields: Vec<f64>,
}

/// Runtime state between `start` and `reset`.
struct Performance {
    cycle: u64,
    end_cycle: Option<u64>,
    pending: VecDeque<PendingEvent>,
    active: Vec<Instance>,
    globals: GlobalVars,
    default_table: Arc<FunctionTable>,
    /// Peak absolute value per channel over the whole performance.
    peaks: Vec<f64>,
    finished: bool,
}

impl Performance {
    fn new(program: &Program) -> Self {
        let kr = program.header.kr;
        let to_cycle = |seconds: f64| (seconds * kr).round().max(0.0) as u64;

        let pending = program
            .score
            .events
            .iter()
            .map(|event| {
                let start_cycle = to_cycle(event.start);
                let end_cycle = if event.is_held() {
                    None
                } else {
                    Some(start_cycle.saturating_add(to_cycle(event.duration).max(1)))
                };
                PendingEvent {
                    instr: event.instr,
                    start_cycle,
                    end_cycle,
                    init_only: event.duration == 0.0,
                    pfields: event.pfields.clone(),
                }
            })
            .collect();

        Performance {
            cycle: 0,
            end_cycle: program.score.end_time.map(|t| to_cycle(t).max(1)),
            pending,
            active: Vec::new(),
            globals: GlobalVars::new(&program.globals, program.header.ksmps as usize),
            default_table: Arc::new(FunctionTable::sine()),
            peaks: vec![0.0; program.header.nchnls as usize],
            finished: false,
        }
    }
}

/// The built-in engine.
pub struct CsdEngine {
    program: Option<Program>,
    performance: Option<Performance>,
    callback: Option<MessageCallback>,
    level: MessageLevel,
    spout: Vec<Sample>,
}

impl CsdEngine {
    pub fn new() -> Self {
        CsdEngine {
            program: None,
            performance: None,
            callback: None,
            level: MessageLevel::default(),
            spout: Vec::new(),
        }
    }

    fn header(&self) -> Header {
        self.program.as_ref().map(|p| p.header).unwrap_or_default()
    }

    /// Compiled program, if any.
    pub fn program(&self) -> Option<&Program> {
        self.program.as_ref()
    }

    pub fn is_started(&self) -> bool {
        self.performance.is_some()
    }
}

impl Default for CsdEngine {
    fn default() -> Self {
        CsdEngine::new()
    }
}

fn emit(callback: &mut Option<MessageCallback>, text: &str) {
    if let Some(callback) = callback.as_mut() {
        callback(text);
    }
}

impl SynthEngine for CsdEngine {
    fn set_message_callback(&mut self, callback: MessageCallback) {
        self.callback = Some(callback);
    }

    fn set_message_level(&mut self, level: MessageLevel) {
        self.level = level;
    }

    fn set_output(&mut self, output: &OutputOverride) -> Result<(), EngineError> {
        if output.device != "null" {
            return Err(EngineError::OptionRejected {
                option: format!("-o{}", output.device),
                reason: "only the null device is available".into(),
            });
        }
        if output.sample_format != "double" {
            return Err(EngineError::OptionRejected {
                option: format!("--format={}:{}", output.file_type, output.sample_format),
                reason: "samples are produced as double".into(),
            });
        }
        Ok(())
    }

    fn compile_csd_text(&mut self, text: &str) -> Result<(), EngineError> {
        self.performance = None;
        match compile_document(text) {
            Ok(program) => {
                self.program = Some(program);
                Ok(())
            }
            Err(err) => {
                self.program = None;
                emit(&mut self.callback, &render_report(&err, text, "input.csd"));
                Err(EngineError::Compile(err))
            }
        }
    }

    fn sample_rate(&self) -> f64 {
        self.header().sr
    }

    fn control_rate(&self) -> f64 {
        self.header().kr
    }

    fn channel_count(&self) -> u32 {
        self.header().nchnls
    }

    fn zero_dbfs(&self) -> f64 {
        self.header().zero_dbfs
    }

    fn ksmps(&self) -> u32 {
        self.header().ksmps
    }

    fn start(&mut self) {
        let Some(program) = &self.program else {
            return;
        };
        if self.performance.is_some() {
            return;
        }
        let header = program.header;
        let Some(cycle_len) = (header.ksmps as usize).checked_mul(header.nchnls as usize) else {
            return;
        };
        self.performance = Some(Performance::new(program));
        self.spout = vec![0.0; cycle_len];
        if self.level >= MessageLevel::Normal {
            emit(&mut self.callback, "SECTION 1:\n");
        }
    }

    fn perform_ksmps(&mut self) -> TickStatus {
        let CsdEngine {
            program,
            performance,
            callback,
            level,
            spout,
        } = self;
        let (Some(program), Some(perf)) = (program.as_ref(), performance.as_mut()) else {
            return TickStatus::EndOfPerformance;
        };
        spout.fill(0.0);
        if perf.finished {
            return TickStatus::EndOfPerformance;
        }

        let header = program.header;
        let mut ctx = Context {
            sr: header.sr,
            kr: header.kr,
            ksmps: header.ksmps as usize,
            nchnls: header.nchnls as usize,
            tables: &program.tables,
            default_table: &perf.default_table,
            globals: &mut perf.globals,
            spout: spout.as_mut_slice(),
        };

        while perf.pending.front().is_some_and(|e| e.start_cycle <= perf.cycle) {
            let Some(event) = perf.pending.pop_front() else {
                break;
            };
            let Some(plan) = program.instruments.get(&event.instr) else {
                continue;
            };
            if *level >= MessageLevel::Verbose {
                emit(callback, &format!("new alloc for instr {}:\n", event.instr));
            }
            match Instance::activate(Arc::clone(plan), &event.pfields, event.end_cycle, &mut ctx) {
                Ok(instance) if !event.init_only => {
                    let pos = perf.active.partition_point(|i| i.instr <= instance.instr);
                    perf.active.insert(pos, instance);
                }
                Ok(_) => {}
                Err(err) => emit(callback, &format!("{err}\n")),
            }
        }

        for instance in perf.active.iter_mut() {
            instance.perform(&mut ctx);
        }

        perf.cycle += 1;
        let cycle = perf.cycle;
        perf.active.retain(|instance| !instance.is_finished(cycle));

        let nchnls = header.nchnls as usize;
        for frame in spout.chunks(nchnls) {
            for (peak, sample) in perf.peaks.iter_mut().zip(frame) {
                *peak = peak.max(sample.abs());
            }
        }

        if perf.end_cycle.is_some_and(|end| cycle >= end) {
            perf.finished = true;
            if *level >= MessageLevel::Normal {
                let amps: String = perf.peaks.iter().map(|peak| format!("{peak:9.5}")).collect();
                emit(callback, &format!("end of score.\t\t   overall amps:{amps}\n"));
            }
            return TickStatus::EndOfPerformance;
        }
        TickStatus::Continue
    }

    fn spout(&self) -> &[Sample] {
        &self.spout
    }

    fn reset(&mut self) {
        self.performance = None;
        self.program = None;
        self.spout.clear();
    }

    fn version(&self) -> u32 {
        ENGINE_VERSION
    }

    fn name(&self) -> &str {
        ENGINE_NAME
    }
}
