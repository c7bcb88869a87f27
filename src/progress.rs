//! Progress-callback trait for pipeline stage events.
//!
//! Inject an [`Arc<dyn AuditProgressCallback>`] via
//! [`crate::config::AuditConfigBuilder::progress_callback`] to receive events
//! as an audit moves through its stages. The CLI uses this to drive a
//! spinner; a server could forward events to a log or a WebSocket.
//!
//! # Example
//!
//! ```rust
//! use oversight_ai::{AuditConfig, AuditProgressCallback, Stage};
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! impl AuditProgressCallback for Printer {
//!     fn on_stage_complete(&self, stage: Stage, duration_ms: u64) {
//!         eprintln!("{stage} done in {duration_ms}ms");
//!     }
//! }
//!
//! let config = AuditConfig::builder()
//!     .progress_callback(Arc::new(Printer))
//!     .build()
//!     .unwrap();
//! ```

use crate::error::AuditError;
use crate::pipeline::Stage;
use std::sync::Arc;

/// Called by the pipeline as it runs.
///
/// Implementations must be `Send + Sync` (the auditor is shared across
/// request tasks). All methods have default no-op implementations so callers
/// only override what they care about.
pub trait AuditProgressCallback: Send + Sync {
    /// Called once text extraction has produced usable text.
    ///
    /// # Arguments
    /// * `pages`: pages in the document (1 for plain text)
    /// * `chars`: characters extracted, before truncation
    fn on_text_extracted(&self, pages: usize, chars: usize) {
        let _ = (pages, chars);
    }

    /// Called just before a stage's model request is sent.
    fn on_stage_start(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called when a stage's model call returns (fallbacks included).
    fn on_stage_complete(&self, stage: Stage, duration_ms: u64) {
        let _ = (stage, duration_ms);
    }

    /// Called when a stage's precondition is not met (no letter needed).
    fn on_stage_skipped(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called once at the end of an audit or quick review that did not error.
    ///
    /// `success` is false when the document had no extractable text.
    fn on_audit_complete(&self, success: bool) {
        let _ = success;
    }

    /// Called instead of `on_audit_complete` when the audit returns an error.
    fn on_audit_failed(&self, error: &AuditError) {
        let _ = error;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl AuditProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::AuditConfig`].
pub type ProgressCallback = Arc<dyn AuditProgressCallback>;
