//! Output sinks for language server diagnostics
//!
//! A sink receives the server's stderr lines and lifecycle messages, and can be
//! asked to make itself visible when something went wrong.

use std::sync::Mutex;
use tracing::{info, warn};

/// Target used for server output forwarded to tracing
pub const SERVER_OUTPUT_TARGET: &str = "r_language_server";

/// Write-only destination for server output
pub trait OutputSink: Send + Sync {
    /// Append one line of output
    fn append_line(&self, line: &str);

    /// Ask the sink to become visible to the user
    fn show(&self);
}

/// Sink that forwards everything to tracing
#[derive(Debug, Default, Clone)]
pub struct TracingOutputSink;

impl OutputSink for TracingOutputSink {
    fn append_line(&self, line: &str) {
        info!(target: SERVER_OUTPUT_TARGET, "{}", line);
    }

    fn show(&self) {
        warn!(target: SERVER_OUTPUT_TARGET, "R Language Server output requires attention");
    }
}

/// Sink that keeps output in memory
#[derive(Debug, Default)]
pub struct MemoryOutputSink {
    lines: Mutex<Vec<String>>,
    shown: Mutex<usize>,
}

impl MemoryOutputSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all lines appended so far
    pub fn lines(&self) -> Vec<String> {
        // Intentional .unwrap() - poisoned mutex indicates serious bug, panic is appropriate
        self.lines.lock().unwrap().clone()
    }

    /// How many times `show` was requested
    pub fn show_count(&self) -> usize {
        *self.shown.lock().unwrap()
    }
}

impl OutputSink for MemoryOutputSink {
    fn append_line(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }

    fn show(&self) {
        *self.shown.lock().unwrap() += 1;
    }
}
