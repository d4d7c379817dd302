//! Leveled line logging for engine diagnostics and session events.

use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Severity of a log line. `Never` disables output entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Never,
    Fatal,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            LogLevel::Debug
        } else {
            LogLevel::Info
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Never => "never",
            LogLevel::Fatal => "fatal",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        };
        f.write_str(name)
    }
}

/// A sink for complete log lines.
pub trait Logger: Send + Sync {
    /// Most verbose level this logger accepts.
    fn level(&self) -> LogLevel;

    /// Record one line. Called only for enabled levels.
    fn write(&self, level: LogLevel, line: &str);

    fn enabled(&self, level: LogLevel) -> bool {
        level != LogLevel::Never && level <= self.level()
    }

    fn log(&self, level: LogLevel, line: &str) {
        if self.enabled(level) {
            self.write(level, line);
        }
    }

    fn error(&self, line: &str) {
        self.log(LogLevel::Error, line);
    }

    fn warn(&self, line: &str) {
        self.log(LogLevel::Warn, line);
    }

    fn info(&self, line: &str) {
        self.log(LogLevel::Info, line);
    }

    fn debug(&self, line: &str) {
        self.log(LogLevel::Debug, line);
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLog;

impl Logger for NullLog {
    fn level(&self) -> LogLevel {
        LogLevel::Never
    }

    fn write(&self, _level: LogLevel, _line: &str) {}
}

/// Forwards lines to the `log` facade under the `csd_input` target.
#[derive(Debug, Clone)]
pub struct FacadeLog {
    level: LogLevel,
}

pub const LOG_TARGET: &str = "csd_input";

impl FacadeLog {
    pub fn new(level: LogLevel) -> Self {
        FacadeLog { level }
    }
}

impl Default for FacadeLog {
    fn default() -> Self {
        FacadeLog::new(LogLevel::default())
    }
}

impl Logger for FacadeLog {
    fn level(&self) -> LogLevel {
        self.level
    }

    fn write(&self, level: LogLevel, line: &str) {
        let level = match level {
            LogLevel::Never => return,
            LogLevel::Fatal | LogLevel::Error => ::log::Level::Error,
            LogLevel::Warn => ::log::Level::Warn,
            LogLevel::Info => ::log::Level::Info,
            LogLevel::Debug => ::log::Level::Debug,
            LogLevel::Trace => ::log::Level::Trace,
        };
        ::log::log!(target: LOG_TARGET, level, "{line}");
    }
}

/// Keeps every line in memory.
#[derive(Debug)]
pub struct MemoryLog {
    level: LogLevel,
    lines: Mutex<Vec<(LogLevel, String)>>,
}

impl MemoryLog {
    pub fn new(level: LogLevel) -> Self {
        MemoryLog {
            level,
            lines: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of the recorded lines.
    pub fn lines(&self) -> Vec<(LogLevel, String)> {
        match self.lines.lock() {
            Ok(lines) => lines.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Recorded text only, in order.
    pub fn messages(&self) -> Vec<String> {
        self.lines().into_iter().map(|(_, line)| line).collect()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|(_, line)| line.contains(needle))
    }
}

impl Default for MemoryLog {
    fn default() -> Self {
        MemoryLog::new(LogLevel::Trace)
    }
}

impl Logger for MemoryLog {
    fn level(&self) -> LogLevel {
        self.level
    }

    fn write(&self, level: LogLevel, line: &str) {
        let entry = (level, line.to_string());
        match self.lines.lock() {
            Ok(mut lines) => lines.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_filtering() {
        let log = MemoryLog::new(LogLevel::Info);
        log.debug("hidden");
        log.info("shown");
        log.error("also shown");
        assert_eq!(log.messages(), vec!["shown", "also shown"]);
        assert!(!log.enabled(LogLevel::Never));
    }

    #[test]
    fn null_log_accepts_nothing() {
        let log = NullLog;
        assert!(!log.enabled(LogLevel::Fatal));
        log.info("dropped");
    }

    #[test]
    fn level_serde_names() {
        let level: LogLevel = serde_json::from_str("\"warn\"").unwrap();
        assert_eq!(level, LogLevel::Warn);
        assert_eq!(serde_json::to_string(&LogLevel::Trace).unwrap(), "\"trace\"");
    }
}
