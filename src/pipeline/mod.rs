//! Pipeline stages for a bill audit.
//!
//! Each submodule implements exactly one concern. Stages never call each
//! other; [`crate::audit::BillAuditor`] threads each stage's output into the
//! next.
//!
//! ## Data Flow
//!
//! ```text
//! bytes ──▶ extract ──▶ structure ──▶ analyse ──▶ letter (conditional)
//!          (pdfium)     (LLM #1)      (LLM #2)    (LLM #3)
//! ```
//!
//! 1. [`extract`]: sniff the payload, pull per-page text out of PDFs on the
//!    blocking pool, join pages and cap the length
//! 2. [`stages`]: one function per model call, each turning a reply into a
//!    typed record or its fallback
//! 3. [`llm`]: the completion seam, retry/backoff and per-call timeout;
//!    the only pipeline module with network I/O
//! 4. [`parse`]: deterministic reply cleanup and JSON location

pub mod extract;
pub mod llm;
pub mod parse;
pub mod stages;

use serde::{Deserialize, Serialize};
use std::fmt;

/// A model-backed pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extraction,
    Analysis,
    Letter,
    QuickReview,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Extraction => f.write_str("extraction"),
            Stage::Analysis => f.write_str("analysis"),
            Stage::Letter => f.write_str("dispute letter"),
            Stage::QuickReview => f.write_str("quick review"),
        }
    }
}
