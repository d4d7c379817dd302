//! Decoder configuration, loadable from JSON.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::engine::{MessageLevel, OutputOverride};
use crate::logging::{FacadeLog, LogLevel, Logger, NullLog};

pub const DEFAULT_COMPONENT_NAME: &str = "CSD Input";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Name used in session log lines.
    pub component_name: String,
    pub log_level: LogLevel,
    pub message_level: MessageLevel,
    pub output: OutputOverride,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        DecoderConfig {
            component_name: DEFAULT_COMPONENT_NAME.into(),
            log_level: LogLevel::default(),
            message_level: MessageLevel::default(),
            output: OutputOverride::default(),
        }
    }
}

impl DecoderConfig {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// A logger forwarding to the `log` facade at the configured level.
    pub fn logger(&self) -> Arc<dyn Logger> {
        match self.log_level {
            LogLevel::Never => Arc::new(NullLog),
            level => Arc::new(FacadeLog::new(level)),
        }
    }
}
