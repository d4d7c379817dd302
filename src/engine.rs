//! The synthesis engine contract driven by [`crate::binding::EngineBinding`].

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// One output sample. Engine and host share the representation, so whole
/// control cycles copy without conversion.
pub type Sample = f64;

/// Receives raw diagnostic text; a message may hold several lines or a
/// fragment of one.
pub type MessageCallback = Box<dyn FnMut(&str)>;

/// Result of one control cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    Continue,
    /// The score is finished. The output buffer still holds this cycle.
    EndOfPerformance,
}

/// How chatty the engine's diagnostics are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    /// Errors only.
    Quiet,
    #[default]
    Normal,
    /// Adds per-instance allocation notices.
    Verbose,
}

/// Output destination forced on every compiled document, replacing
/// whatever its `<CsOptions>` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputOverride {
    pub device: String,
    pub file_type: String,
    pub sample_format: String,
}

impl Default for OutputOverride {
    fn default() -> Self {
        OutputOverride {
            device: "null".into(),
            file_type: "raw".into(),
            sample_format: "double".into(),
        }
    }
}

impl OutputOverride {
    /// Command-line form: `-o<device> --format=<type>:<format>`.
    pub fn to_flags(&self) -> Vec<String> {
        vec![
            format!("-o{}", self.device),
            format!("--format={}:{}", self.file_type, self.sample_format),
        ]
    }
}

/// A synthesis engine that compiles CSD text and performs it one control
/// cycle at a time.
pub trait SynthEngine {
    fn set_message_callback(&mut self, callback: MessageCallback);

    fn set_message_level(&mut self, level: MessageLevel);

    /// Must be applied before [`SynthEngine::compile_csd_text`].
    fn set_output(&mut self, output: &OutputOverride) -> Result<(), EngineError>;

    fn compile_csd_text(&mut self, text: &str) -> Result<(), EngineError>;

    fn sample_rate(&self) -> f64;

    fn control_rate(&self) -> f64;

    fn channel_count(&self) -> u32;

    fn zero_dbfs(&self) -> f64;

    /// Frames per control cycle.
    fn ksmps(&self) -> u32;

    fn start(&mut self);

    fn perform_ksmps(&mut self) -> TickStatus;

    /// Interleaved output of the last cycle, `ksmps × channel_count` samples.
    fn spout(&self) -> &[Sample];

    /// Drop the compiled document and any performance state.
    fn reset(&mut self);

    /// Packed version number, e.g. `6180` for 6.18.0.
    fn version(&self) -> u32;

    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_override_is_null_raw_double() {
        let output = OutputOverride::default();
        assert_eq!(output.to_flags(), vec!["-onull", "--format=raw:double"]);
    }

    #[test]
    fn override_fills_missing_fields() {
        let output: OutputOverride = serde_json::from_str(r#"{"device":"dac"}"#).unwrap();
        assert_eq!(output.device, "dac");
        assert_eq!(output.sample_format, "double");
    }

    #[test]
    fn message_levels_are_ordered() {
        assert!(MessageLevel::Quiet < MessageLevel::Normal);
        assert!(MessageLevel::Normal < MessageLevel::Verbose);
    }
}
