//! Decoder Session: the host-facing input adapter around the Renderer.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::binding::{EngineBinding, EngineParams};
use crate::config::DecoderConfig;
use crate::dsp::engine::CsdEngine;
use crate::engine::SynthEngine;
use crate::error::DecoderError;
use crate::file::FileSource;
use crate::logging::Logger;
use crate::renderer::{AudioChunk, Renderer};

pub const FILE_TYPE_DESCRIPTION: &str = "Csound Documents (CSD)";
pub const FILE_TYPE_PATTERN: &str = "*.csd";
pub const CONTENT_TYPE: &str = "audio/csd";
pub const EXTENSION: &str = "csd";

/// Whether the host may route `content_type` to this decoder.
pub fn is_our_content_type(content_type: &str) -> bool {
    content_type.eq_ignore_ascii_case(CONTENT_TYPE)
}

/// Whether a file with `extension` belongs to this decoder. The path
/// itself is not inspected.
pub fn is_our_path(_path: &str, extension: &str) -> bool {
    extension.eq_ignore_ascii_case(EXTENSION)
}

/// Why the host opens a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenReason {
    Decode,
    InfoRead,
    InfoWrite,
}

/// Track information reported to the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FileInfo {
    /// Length in seconds; `None` for an unbounded stream.
    pub length: Option<f64>,
    info: BTreeMap<String, String>,
}

impl FileInfo {
    pub fn new() -> Self {
        FileInfo::default()
    }

    pub fn info_set(&mut self, name: &str, value: impl Into<String>) {
        self.info.insert(name.to_string(), value.into());
    }

    pub fn info_set_int(&mut self, name: &str, value: i64) {
        self.info_set(name, value.to_string());
    }

    pub fn info_get(&self, name: &str) -> Option<&str> {
        self.info.get(name).map(String::as_str)
    }

    pub fn info(&self) -> &BTreeMap<String, String> {
        &self.info
    }
}

/// File statistics captured at open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FileStats {
    pub size: u64,
}

pub struct DecoderSession<F: FileSource, E: SynthEngine> {
    renderer: Renderer<E>,
    file: Option<F>,
    path: String,
    stats: FileStats,
    script: String,
    component_name: String,
    dynamic_info_set: bool,
    logger: Arc<dyn Logger>,
}

impl<F: FileSource> DecoderSession<F, CsdEngine> {
    /// A session backed by the built-in engine.
    pub fn with_config(config: &DecoderConfig) -> Self {
        DecoderSession::new(CsdEngine::new(), config, config.logger())
    }
}

impl<F: FileSource, E: SynthEngine> DecoderSession<F, E> {
    pub fn new(engine: E, config: &DecoderConfig, logger: Arc<dyn Logger>) -> Self {
        let mut binding = EngineBinding::new(engine, Arc::clone(&logger));
        binding.set_output_override(config.output.clone());
        binding.set_message_level(config.message_level);
        DecoderSession {
            renderer: Renderer::new(binding),
            file: None,
            path: String::new(),
            stats: FileStats::default(),
            script: String::new(),
            component_name: config.component_name.clone(),
            dynamic_info_set: false,
            logger,
        }
    }

    // ── Input ────────────────────────────────────────────────

    /// Read and compile the script in `file`.
    pub fn open(&mut self, mut file: F, path: &str, reason: OpenReason) -> Result<(), DecoderError> {
        if reason == OpenReason::InfoWrite {
            return Err(DecoderError::TaggingUnsupported);
        }

        self.stats = FileStats { size: file.size()? };
        if self.stats.size == 0 {
            return Err(DecoderError::UnsupportedFormat("Invalid file size".into()));
        }

        let data = file.read_all()?;
        let script = String::from_utf8(data)
            .map_err(|e| DecoderError::UnsupportedFormat(format!("script is not valid UTF-8: {e}")))?;

        self.file = Some(file);
        self.path = path.to_string();
        self.renderer.binding_mut().load(&script)?;
        self.script = script;

        let binding = self.renderer.binding();
        self.logger.info(&format!(
            "{} is using {} {}.",
            self.component_name,
            binding.engine_name(),
            binding.version_string()
        ));
        Ok(())
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn params(&self) -> Option<&EngineParams> {
        self.renderer.binding().params()
    }

    // ── Info reader ──────────────────────────────────────────

    pub fn subsong_count(&self) -> u32 {
        1
    }

    pub fn subsong(&self, index: u32) -> u32 {
        index
    }

    pub fn info(&self, _subsong: u32) -> FileInfo {
        let mut info = FileInfo::new();
        info.length = None;
        info.info_set("encoding", "Synthesized");
        if let Some(params) = self.params() {
            info.info_set_int("fis_control_rate", params.control_rate as i64);
            info.info_set_int("fis_channel_count", params.channels as i64);
            info.info_set_int("fis_0dbfs_level", params.zero_dbfs as i64);
        }
        info
    }

    pub fn file_stats(&self) -> FileStats {
        self.stats
    }

    // ── Info writer ──────────────────────────────────────────

    pub fn retag_set_info(&mut self, _subsong: u32, _info: &FileInfo) -> Result<(), DecoderError> {
        Err(DecoderError::TaggingUnsupported)
    }

    pub fn retag_commit(&mut self) -> Result<(), DecoderError> {
        Err(DecoderError::TaggingUnsupported)
    }

    pub fn remove_tags(&mut self) -> Result<(), DecoderError> {
        Err(DecoderError::TaggingUnsupported)
    }

    // ── Decoder ──────────────────────────────────────────────

    /// Prepare playback from the beginning.
    pub fn decode_initialize(&mut self, _subsong: u32) -> Result<(), DecoderError> {
        if let Some(file) = self.file.as_mut() {
            file.reopen()?;
        }
        let binding = self.renderer.binding_mut();
        if binding.is_running() {
            binding.stop();
        }
        if !binding.is_compiled() && !self.script.is_empty() {
            binding.load(&self.script)?;
        }
        binding.start();
        Ok(())
    }

    /// Fill `chunk`; `false` once the performance is over.
    pub fn decode_run(&mut self, chunk: &mut AudioChunk) -> bool {
        self.renderer.render(chunk)
    }

    /// Only a seek to the start repositions playback; it restarts the
    /// performance. Other offsets are accepted and ignored.
    pub fn decode_seek(&mut self, seconds: f64) -> Result<(), DecoderError> {
        if seconds <= 0.0 {
            return self.decode_initialize(0);
        }
        self.logger.info(&format!(
            "{}: seeking to {seconds:.3} s is not supported, playback continues.",
            self.component_name
        ));
        Ok(())
    }

    pub fn decode_can_seek(&self) -> bool {
        true
    }

    /// Report the sample rate once per session. Returns `true` when `info`
    /// was updated.
    pub fn decode_get_dynamic_info(&mut self, info: &mut FileInfo) -> bool {
        if self.dynamic_info_set {
            return false;
        }
        let Some(params) = self.params() else {
            return false;
        };
        info.info_set_int("sample_rate", params.sample_rate as i64);
        self.dynamic_info_set = true;
        true
    }

    pub fn decode_get_dynamic_info_track(&mut self, _info: &mut FileInfo) -> bool {
        false
    }

    pub fn decode_on_idle(&mut self) {
        if let Some(file) = self.file.as_mut() {
            file.on_idle();
        }
    }

    pub fn file(&self) -> Option<&F> {
        self.file.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::tests::ScriptedEngine;
    use crate::engine::MessageLevel;
    use crate::file::MemoryFileSource;
    use crate::logging::MemoryLog;

    const TONE: &str = "<CsoundSynthesizer>
<CsInstruments>
sr = 44100
kr = 441
nchnls = 2
0dbfs = 1

instr 1
  kenv linseg 0, 0.005, 1, p3 - 0.01, 1, 0.005, 0
  asig oscili 0.5 * kenv, p4
  outs asig, asig
endin
</CsInstruments>
<CsScore>
i1 0 0.5 440
e
</CsScore>
</CsoundSynthesizer>
";

    fn session() -> (DecoderSession<MemoryFileSource, CsdEngine>, Arc<MemoryLog>) {
        let log = Arc::new(MemoryLog::default());
        let config = DecoderConfig::default();
        (DecoderSession::new(CsdEngine::new(), &config, log.clone()), log)
    }

    #[test]
    fn file_type_association() {
        assert!(is_our_path("/music/a.CSD", "CSD"));
        assert!(is_our_path("a.csd", "csd"));
        assert!(!is_our_path("a.orc", "orc"));
        assert!(is_our_content_type("Audio/CSD"));
        assert!(!is_our_content_type("audio/midi"));
    }

    #[test]
    fn open_reports_engine_and_info() {
        let (mut s, log) = session();
        s.open(MemoryFileSource::new(TONE), "tone.csd", OpenReason::Decode).unwrap();
        assert!(log.contains("CSD Input is using CsdEngine 6.18.0."));

        let info = s.info(0);
        assert_eq!(info.length, None);
        assert_eq!(info.info_get("encoding"), Some("Synthesized"));
        assert_eq!(info.info_get("fis_control_rate"), Some("441"));
        assert_eq!(info.info_get("fis_channel_count"), Some("2"));
        assert_eq!(info.info_get("fis_0dbfs_level"), Some("1"));
        assert_eq!(s.file_stats().size, TONE.len() as u64);
        assert_eq!(s.subsong_count(), 1);
        assert_eq!(s.subsong(0), 0);
        assert_eq!(s.path(), "tone.csd");
    }

    #[test]
    fn open_failures() {
        let (mut s, _) = session();
        let err = s
            .open(MemoryFileSource::new(TONE), "x.csd", OpenReason::InfoWrite)
            .unwrap_err();
        assert!(matches!(err, DecoderError::TaggingUnsupported));

        let err = s.open(MemoryFileSource::new(""), "x.csd", OpenReason::Decode).unwrap_err();
        assert!(matches!(&err, DecoderError::UnsupportedFormat(m) if m == "Invalid file size"));

        let err = s
            .open(MemoryFileSource::new(vec![0xff, 0xfe, 0x00]), "x.csd", OpenReason::Decode)
            .unwrap_err();
        assert!(err.is_unsupported_format());

        let err = s
            .open(MemoryFileSource::new("not a csd"), "x.csd", OpenReason::InfoRead)
            .unwrap_err();
        assert!(matches!(err, DecoderError::CompileFailed(_)));
        assert!(err.is_unsupported_format());
    }

    #[test]
    fn rejected_opens_never_reach_the_engine() {
        let scripted = || -> DecoderSession<MemoryFileSource, ScriptedEngine> {
            let engine = ScriptedEngine::new(44100.0, 441.0, 2, 100);
            DecoderSession::new(engine, &DecoderConfig::default(), Arc::new(MemoryLog::default()))
        };

        let mut s = scripted();
        let file = MemoryFileSource::new(TONE);
        let err = s.open(file.clone(), "x.csd", OpenReason::InfoWrite).unwrap_err();
        assert!(matches!(err, DecoderError::TaggingUnsupported));
        assert_eq!(file.reads(), 0);
        assert_eq!(file.reopens(), 0);
        assert!(!s.renderer.binding().engine().compiled);
        assert_eq!(s.renderer.binding().engine().resets, 0);

        let mut s = scripted();
        let file = MemoryFileSource::new("");
        let err = s.open(file.clone(), "x.csd", OpenReason::Decode).unwrap_err();
        assert!(err.is_unsupported_format());
        // Only the size was queried.
        assert_eq!(file.reads(), 1);
        assert!(!s.renderer.binding().engine().compiled);
        assert_eq!(s.renderer.binding().engine().resets, 0);
        assert!(s.params().is_none());
    }

    #[test]
    fn option_rejection_is_compile_failure() {
        let log = Arc::new(MemoryLog::default());
        let config = DecoderConfig::from_json(r#"{"output":{"device":"dac"}}"#).unwrap();
        let mut s: DecoderSession<MemoryFileSource, CsdEngine> =
            DecoderSession::new(CsdEngine::new(), &config, log);
        let err = s.open(MemoryFileSource::new(TONE), "x.csd", OpenReason::Decode).unwrap_err();
        assert!(matches!(
            err,
            DecoderError::CompileFailed(crate::error::EngineError::OptionRejected { .. })
        ));
    }

    #[test]
    fn tagging_is_unsupported() {
        let (mut s, _) = session();
        assert!(matches!(s.retag_set_info(0, &FileInfo::new()), Err(DecoderError::TaggingUnsupported)));
        assert!(matches!(s.retag_commit(), Err(DecoderError::TaggingUnsupported)));
        assert!(matches!(s.remove_tags(), Err(DecoderError::TaggingUnsupported)));
    }

    #[test]
    fn decodes_to_end_and_restarts() {
        let (mut s, log) = session();
        s.open(MemoryFileSource::new(TONE), "tone.csd", OpenReason::Decode).unwrap();
        s.decode_initialize(0).unwrap();
        assert!(s.decode_can_seek());

        let mut chunk = AudioChunk::new();
        let mut frames = 0;
        let mut peak: f64 = 0.0;
        while s.decode_run(&mut chunk) {
            assert_eq!(chunk.frames, 600);
            frames += chunk.frames;
            peak = chunk.samples().iter().fold(peak, |m, x| m.max(x.abs()));
        }
        frames += chunk.frames;
        // 0.5 s at kr = 441 is 220.5 cycles, rounded to 221, plus one silent frame.
        assert_eq!(frames, 221 * 100 + 1);
        assert!(peak > 0.45 && peak <= 0.5, "peak {peak}");
        assert!(log.contains("SECTION 1:"));
        assert!(log.contains("end of score."));

        // The performance was stopped; initializing again recompiles.
        s.decode_initialize(0).unwrap();
        assert!(s.decode_run(&mut chunk));
        assert_eq!(s.file().map(|f| f.reopens()), Some(2));
    }

    #[test]
    fn seek_to_zero_restarts_and_other_offsets_are_ignored() {
        let (mut s, log) = session();
        s.open(MemoryFileSource::new(TONE), "tone.csd", OpenReason::Decode).unwrap();
        s.decode_initialize(0).unwrap();
        let mut first = AudioChunk::new();
        assert!(s.decode_run(&mut first));
        let mut second = AudioChunk::new();
        assert!(s.decode_run(&mut second));
        assert_ne!(first.samples(), second.samples());

        s.decode_seek(1.5).unwrap();
        assert!(log.contains("seeking to 1.500 s is not supported"));

        s.decode_seek(0.0).unwrap();
        let mut again = AudioChunk::new();
        assert!(s.decode_run(&mut again));
        assert_eq!(again.samples(), first.samples());
    }

    #[test]
    fn dynamic_info_once_per_session() {
        let (mut s, _) = session();
        s.open(MemoryFileSource::new(TONE), "tone.csd", OpenReason::Decode).unwrap();
        s.decode_initialize(0).unwrap();
        let mut info = FileInfo::new();
        assert!(s.decode_get_dynamic_info(&mut info));
        assert_eq!(info.info_get("sample_rate"), Some("44100"));
        assert!(!s.decode_get_dynamic_info(&mut info));
        s.decode_seek(0.0).unwrap();
        assert!(!s.decode_get_dynamic_info(&mut info));
        assert!(!s.decode_get_dynamic_info_track(&mut info));
    }

    #[test]
    fn idle_forwards_to_file() {
        let (mut s, _) = session();
        s.decode_on_idle();
        s.open(MemoryFileSource::new(TONE), "tone.csd", OpenReason::Decode).unwrap();
        s.decode_on_idle();
        assert_eq!(s.file().map(|f| f.idle_polls()), Some(1));
    }

    #[test]
    fn works_with_any_engine() {
        let log = Arc::new(MemoryLog::default());
        let mut engine = ScriptedEngine::new(44100.0, 441.0, 2, 100);
        engine.end_on_tick = Some(4);
        let config = DecoderConfig {
            message_level: MessageLevel::Quiet,
            component_name: "test".into(),
            ..DecoderConfig::default()
        };
        let mut s = DecoderSession::new(engine, &config, log.clone());
        s.open(MemoryFileSource::new("x"), "x.csd", OpenReason::Decode).unwrap();
        assert!(log.contains("test is using Scripted 6.18.0."));
        s.decode_initialize(0).unwrap();
        let mut chunk = AudioChunk::new();
        assert!(!s.decode_run(&mut chunk));
        assert_eq!(chunk.frames, 401);
        assert!(!s.decode_run(&mut chunk));
        assert_eq!(chunk.frames, 401);
    }
}
