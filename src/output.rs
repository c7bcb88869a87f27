//! What an audit hands back to its caller.

use crate::bill::{AuditResult, QuickReview, StructuredBill};
use crate::error::StageError;
use crate::pipeline::Stage;
use crate::prompts::PromptVersion;
use serde::{Deserialize, Serialize};

/// Outcome of a full audit.
///
/// Serialises with a `status` tag: `"success"` carries the [`AuditReport`]
/// fields inline, `"failed"` carries only `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum AuditResponse {
    Success(Box<AuditReport>),
    /// The document had no extractable text; no model was called.
    Failed { error: String },
}

impl AuditResponse {
    pub fn is_success(&self) -> bool {
        matches!(self, AuditResponse::Success(_))
    }

    pub fn report(&self) -> Option<&AuditReport> {
        match self {
            AuditResponse::Success(report) => Some(report),
            AuditResponse::Failed { .. } => None,
        }
    }
}

/// Everything the pipeline produced for one bill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    pub extracted_bill: StructuredBill,
    pub analysis: AuditResult,
    /// Present only when the analysis asked for one and listed issues.
    pub dispute_letter: Option<String>,
    /// Characters of extracted text, before truncation.
    pub raw_text_length: usize,
    pub prompt_version: PromptVersion,
    pub stats: AuditStats,
}

/// Timing and token accounting for an audit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditStats {
    pub pages: usize,
    /// Whether the text sent to the model was cut at `max_text_chars`.
    pub truncated: bool,
    pub stages: Vec<StageReport>,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_duration_ms: u64,
}

impl AuditStats {
    pub fn push(&mut self, report: StageReport) {
        self.total_input_tokens += report.input_tokens;
        self.total_output_tokens += report.output_tokens;
        self.stages.push(report);
    }

    /// Stages whose reply had to be replaced by a fallback.
    pub fn degraded_stages(&self) -> Vec<Stage> {
        self.stages
            .iter()
            .filter(|s| s.degraded.is_some())
            .map(|s| s.stage)
            .collect()
    }
}

/// One model call as it actually ran.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: Stage,
    pub duration_ms: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub retries: u32,
    /// Why the stage's reply was replaced by a fallback, if it was.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded: Option<StageError>,
}

/// Quick review result, optionally with the text it was run on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuickReviewReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,
    #[serde(flatten)]
    pub review: QuickReview,
}
