//! Error types for the oversight-ai library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`AuditError`] is **fatal**: the request cannot proceed at all (empty or
//!   unreadable payload, pdfium unavailable, LLM unreachable after retries).
//!   Returned as `Err(AuditError)` from the [`crate::audit::BillAuditor`]
//!   entry points and mapped to an HTTP status by [`crate::server`].
//!
//! * [`StageError`] is **non-fatal**: a model reply could not be parsed or did
//!   not satisfy its schema. The stage substitutes a clearly marked fallback
//!   record and the request carries on; the error text travels inside that
//!   record so the caller can see what happened.
//!
//! An image-only PDF is a normal outcome for a full audit, reported as
//! [`crate::output::AuditResponse::Failed`]. The quick review has no such
//! envelope and returns [`AuditError::NoExtractableText`] instead.

use crate::pipeline::Stage;
use thiserror::Error;

/// All fatal errors returned by the oversight-ai library.
#[derive(Debug, Error)]
pub enum AuditError {
    // ── Payload errors ────────────────────────────────────────────────────
    /// No bytes (or no text) were supplied.
    #[error("No PDF data received")]
    EmptyPayload,

    /// The request envelope could not be decoded (bad JSON, bad hex, bad multipart).
    #[error("Invalid request payload: {0}")]
    InvalidPayload(String),

    /// The bytes are neither a PDF nor UTF-8 text.
    #[error("Unsupported document: expected a PDF or plain text, first bytes: {magic:?}")]
    UnsupportedDocument { magic: Vec<u8> },

    /// Upload exceeds the configured cap.
    #[error("File too large: {size} bytes (max {max} bytes)")]
    PayloadTooLarge { size: usize, max: usize },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// The document has no text layer (scanned or image-only).
    #[error("{}", crate::pipeline::extract::EXTRACTION_FAILED_MESSAGE)]
    NoExtractableText,

    /// pdfium could not open the document at all.
    #[error("PDF is corrupt or encrypted: {detail}")]
    CorruptPdf { detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or place the library next to the binary."
    )]
    PdfiumBindingFailed(String),

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Every attempt of a stage's LLM call failed.
    #[error("LLM call for {stage} stage failed after {retries} retries: {message}")]
    LlmApiError {
        stage: Stage,
        retries: u32,
        message: String,
    },

    // ── Request errors ────────────────────────────────────────────────────
    /// The whole request exceeded its time budget and was cancelled.
    #[error("Request timed out after {secs}s")]
    Timeout { secs: u64 },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuditError {
    /// Whether the caller sent something we cannot work with.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AuditError::EmptyPayload
                | AuditError::InvalidPayload(_)
                | AuditError::UnsupportedDocument { .. }
                | AuditError::PayloadTooLarge { .. }
                | AuditError::CorruptPdf { .. }
        )
    }
}

/// A non-fatal error for a single stage's model reply.
///
/// Stored inside the fallback record the stage produces instead of its
/// normal output.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum StageError {
    /// The reply contained no parseable JSON object.
    #[error("{stage} reply was not valid JSON: {detail}")]
    MalformedJson { stage: Stage, detail: String },

    /// The reply parsed but did not match the declared schema.
    #[error("{stage} reply violated the schema: {}", problems.join("; "))]
    SchemaViolation { stage: Stage, problems: Vec<String> },
}

/// Failure of a single completion attempt, before retries are accounted for.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct CompletionError(pub String);
