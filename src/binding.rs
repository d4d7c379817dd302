//! Engine Binding: owns one engine and its Load/Start/Tick/Stop lifecycle.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use serde::Serialize;

use crate::engine::{MessageLevel, OutputOverride, Sample, SynthEngine, TickStatus};
use crate::error::EngineError;
use crate::logging::Logger;

/// Host chunks hold at least this many frames.
pub const HOST_CHUNK_GRANULARITY: usize = 512;

/// Smallest multiple of `ksmps` that is at least [`HOST_CHUNK_GRANULARITY`].
pub fn frames_per_host_chunk(ksmps: usize) -> usize {
    let ksmps = ksmps.max(1);
    HOST_CHUNK_GRANULARITY.div_ceil(ksmps) * ksmps
}

/// Format a packed engine version `V` as `V/1000.(V%1000)/10.V%10`.
pub fn format_version(version: u32) -> String {
    format!("{}.{}.{}", version / 1000, (version % 1000) / 10, version % 10)
}

/// Parameters read once after a successful compile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EngineParams {
    pub sample_rate: f64,
    pub control_rate: f64,
    pub channels: u32,
    pub zero_dbfs: f64,
    pub ksmps: u32,
    pub frames_per_host_chunk: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Compiled,
    Running,
}

/// Accumulates engine message fragments into complete lines.
#[derive(Default)]
struct LineBuffer {
    partial: String,
}

impl LineBuffer {
    fn push(&mut self, text: &str, logger: &dyn Logger) {
        self.partial.push_str(text);
        while let Some(newline) = self.partial.find('\n') {
            let line: String = self.partial.drain(..=newline).collect();
            logger.info(line.trim_end_matches(['\n', '\r']));
        }
    }

    fn flush(&mut self, logger: &dyn Logger) {
        if !self.partial.is_empty() {
            let line = std::mem::take(&mut self.partial);
            logger.info(line.trim_end_matches('\r'));
        }
    }
}

pub struct EngineBinding<E: SynthEngine> {
    engine: E,
    state: State,
    params: Option<EngineParams>,
    output: OutputOverride,
    lines: Rc<RefCell<LineBuffer>>,
    logger: Arc<dyn Logger>,
}

impl<E: SynthEngine> EngineBinding<E> {
    /// Take ownership of `engine` and route its messages to `logger`.
    pub fn new(mut engine: E, logger: Arc<dyn Logger>) -> Self {
        let lines = Rc::new(RefCell::new(LineBuffer::default()));
        let sink = Rc::clone(&lines);
        let sink_logger = Arc::clone(&logger);
        engine.set_message_callback(Box::new(move |text: &str| {
            // A message emitted while the buffer is flushing is dropped.
            if let Ok(mut buffer) = sink.try_borrow_mut() {
                buffer.push(text, sink_logger.as_ref());
            }
        }));
        EngineBinding {
            engine,
            state: State::Idle,
            params: None,
            output: OutputOverride::default(),
            lines,
            logger,
        }
    }

    pub fn set_output_override(&mut self, output: OutputOverride) {
        self.output = output;
    }

    pub fn set_message_level(&mut self, level: MessageLevel) {
        self.engine.set_message_level(level);
    }

    /// Compile `script` into a fresh session and record its parameters.
    pub fn load(&mut self, script: &str) -> Result<&EngineParams, EngineError> {
        self.engine.reset();
        self.state = State::Idle;
        self.params = None;

        self.engine.set_output(&self.output)?;
        self.engine.compile_csd_text(script)?;

        let ksmps = self.engine.ksmps();
        let params = EngineParams {
            sample_rate: self.engine.sample_rate(),
            control_rate: self.engine.control_rate(),
            channels: self.engine.channel_count(),
            zero_dbfs: self.engine.zero_dbfs(),
            ksmps,
            frames_per_host_chunk: frames_per_host_chunk(ksmps as usize),
        };
        self.state = State::Compiled;
        Ok(&*self.params.insert(params))
    }

    /// Begin the performance. Without a compiled session this does nothing.
    pub fn start(&mut self) {
        if self.state == State::Compiled {
            self.engine.start();
            self.state = State::Running;
        }
    }

    /// Run one control cycle.
    pub fn tick(&mut self) -> TickStatus {
        match self.state {
            State::Running => self.engine.perform_ksmps(),
            State::Idle | State::Compiled => TickStatus::EndOfPerformance,
        }
    }

    /// The last cycle's interleaved output, while running.
    pub fn output(&self) -> Option<&[Sample]> {
        match self.state {
            State::Running => Some(self.engine.spout()),
            State::Idle | State::Compiled => None,
        }
    }

    /// End the session. Parameters stay readable until the next load.
    pub fn stop(&mut self) {
        if self.state != State::Idle {
            self.engine.reset();
            self.state = State::Idle;
        }
        self.lines.borrow_mut().flush(self.logger.as_ref());
    }

    pub fn is_running(&self) -> bool {
        self.state == State::Running
    }

    pub fn is_compiled(&self) -> bool {
        self.state != State::Idle
    }

    pub fn params(&self) -> Option<&EngineParams> {
        self.params.as_ref()
    }

    pub fn version_string(&self) -> String {
        format_version(self.engine.version())
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn logger(&self) -> &Arc<dyn Logger> {
        &self.logger
    }
}
