//! Logger sink
//!
//! Hosts decide where protocol chatter goes. The library writes two kinds
//! of lines: debug detail for developers and short user-facing progress.

use std::sync::{Arc, Mutex};

/// Destination for protocol log lines
pub trait Logger: Send + Sync {
    /// Developer detail (raw traffic, retries)
    fn debug(&self, message: &str);

    /// Progress and results meant for the person at the keyboard
    fn user(&self, message: &str);
}

/// Shared logger handle
pub type SharedLogger = Arc<dyn Logger>;

/// Forwards to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn debug(&self, message: &str) {
        tracing::debug!(target: "vpwlink::debug", "{}", message);
    }

    fn user(&self, message: &str) {
        tracing::info!(target: "vpwlink::user", "{}", message);
    }
}

/// A [`TracingLogger`] behind a shared handle
pub fn tracing_logger() -> SharedLogger {
    Arc::new(TracingLogger)
}

/// Which sink method produced a line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// From [`Logger::debug`]
    Debug,
    /// From [`Logger::user`]
    User,
}

/// Keeps every line in memory, for UIs that render their own log pane
#[derive(Debug, Default)]
pub struct MemoryLogger {
    lines: Mutex<Vec<(LogLevel, String)>>,
}

impl MemoryLogger {
    /// Empty logger
    pub fn new() -> Self {
        Self::default()
    }

    /// Every line so far
    pub fn lines(&self) -> Vec<(LogLevel, String)> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }

    /// User lines only
    pub fn user_lines(&self) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|(level, _)| *level == LogLevel::User)
            .map(|(_, line)| line)
            .collect()
    }

    fn push(&self, level: LogLevel, message: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push((level, message.to_string()));
        }
    }
}

impl Logger for MemoryLogger {
    fn debug(&self, message: &str) {
        self.push(LogLevel::Debug, message);
    }

    fn user(&self, message: &str) {
        self.push(LogLevel::User, message);
    }
}
