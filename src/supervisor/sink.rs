// src/supervisor/sink.rs

use tracing::{info, warn};

/// Destination for subprocess output and supervision failures.
///
/// The core never parses what goes through here.
pub trait LogSink: Send + Sync {
    fn line(&self, tag: &str, line: &str);
    fn failure(&self, tag: &str, error: &anyhow::Error);
}

/// Sink forwarding to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn line(&self, tag: &str, line: &str) {
        info!(target: "warden::subprocess", tag = %tag, "{}", line);
    }

    fn failure(&self, tag: &str, error: &anyhow::Error) {
        warn!(target: "warden::subprocess", tag = %tag, error = ?error, "supervision failed");
    }
}
