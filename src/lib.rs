//! # oversight-ai
//!
//! Audit medical bills for overcharges with LLMs.
//!
//! A patient uploads a bill; the service pulls the text out of the PDF, asks a
//! model to turn it into a structured bill, asks again for an audit of that
//! bill against typical pricing and common billing errors, and, when the audit
//! recommends it, drafts a dispute letter the patient can send.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF bytes
//!  │
//!  ├─ 1. Extract   page text via pdfium (spawn_blocking), joined with "\n"
//!  │               no text at all → {"status":"failed"}, no model calls
//!  ├─ 2. Structure bill text (first 12 000 chars) → StructuredBill JSON
//!  ├─ 3. Analyse   StructuredBill (+ user context) → AuditResult JSON
//!  └─ 4. Letter    only when dispute_letter_needed and issues exist
//! ```
//!
//! Each model call is retried with exponential backoff. A reply that is not
//! the JSON we asked for never fails the request; the stage substitutes a
//! marked fallback record instead (see [`StageError`]).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use oversight_ai::{AuditConfig, AuditResponse, BillAuditor};
//! use serde_json::Map;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / ...
//!     let auditor = BillAuditor::from_config(AuditConfig::default()).await?;
//!     let pdf = std::fs::read("bill.pdf")?;
//!     match auditor.audit_document(pdf, &Map::new()).await? {
//!         AuditResponse::Success(report) => {
//!             println!("risk: {:?}", report.analysis.risk_level);
//!             if let Some(letter) = report.dispute_letter {
//!                 println!("{letter}");
//!             }
//!         }
//!         AuditResponse::Failed { error } => eprintln!("{error}"),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `oversight` binary (clap + anyhow + tracing-subscriber) |
//!
//! ## Testing without a model
//!
//! [`BillAuditor::new`] takes any [`CompletionClient`] and [`TextExtractor`].
//! [`ScriptedClient`] replays queued replies and records every request;
//! [`StaticExtractor`] returns fixed page text.

pub mod audit;
pub mod bill;
pub mod config;
pub mod error;
pub mod memory;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod server;

// Re-export primary API surface
pub use audit::BillAuditor;
pub use bill::{
    AuditResult, Benchmark, FacilityType, Issue, IssueType, LineItem, LineItemCategory,
    QuickReview, Severity, StructuredBill,
};
pub use config::{AuditConfig, AuditConfigBuilder, MemoryConfig, ServerConfig};
pub use error::{AuditError, StageError};
pub use memory::{MemoryError, MemoryStore};
pub use output::{AuditReport, AuditResponse, AuditStats, QuickReviewReport, StageReport};
pub use pipeline::extract::{PdfiumExtractor, StaticExtractor, TextExtractor};
pub use pipeline::llm::{Completion, CompletionClient, CompletionRequest, ScriptedClient};
pub use pipeline::Stage;
pub use progress::{AuditProgressCallback, NoopProgressCallback, ProgressCallback};
pub use prompts::{PromptSet, PromptVersion};
pub use server::{router, serve, AppState};
