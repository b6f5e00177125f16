//! Cancellation, progress reporting and per-run message buffers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info, warn};

/// Soft cancellation flag shared between a run and whoever may stop it
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Clear the flag so the token can be used for another run
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}

/// Receives progress while a run is reading rows
pub trait ProgressMonitor: Send + Sync {
    fn report_progress(&self, table: &str, row: u64);
}

/// Progress monitor that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressMonitor for NoProgress {
    fn report_progress(&self, _table: &str, _row: u64) {}
}

/// Progress monitor that logs through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgress;

impl ProgressMonitor for LogProgress {
    fn report_progress(&self, table: &str, row: u64) {
        info!(table, row, "Processing rows");
    }
}

/// Warnings and errors collected during one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageBuffer {
    warnings: Vec<String>,
    errors: Vec<String>,
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.warnings.push(message);
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        error!("{}", message);
        self.errors.push(message);
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn clear(&mut self) {
        self.warnings.clear();
        self.errors.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!token.is_cancelled());
        other.cancel();
        assert!(token.is_cancelled());
        token.reset();
        assert!(!other.is_cancelled());
    }

    #[test]
    fn test_message_buffer() {
        let mut messages = MessageBuffer::new();
        messages.add_warning("column x missing");
        messages.add_error("boom");
        assert_eq!(messages.warnings(), &["column x missing".to_string()]);
        assert!(messages.has_errors());
        messages.clear();
        assert_eq!(messages, MessageBuffer::default());
    }
}
