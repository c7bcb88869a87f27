//! One function per model call.
//!
//! Every stage builds its request from a [`PromptSet`], runs it through
//! [`call_with_retry`], and decodes the reply. A reply that cannot be decoded
//! never fails the request: the stage returns the record's fallback and notes
//! the [`StageError`] in its [`StageReport`]. Only transport failures (after
//! retries) propagate as [`AuditError`].

use crate::bill::{AuditResult, QuickReview, StructuredBill};
use crate::config::AuditConfig;
use crate::error::{AuditError, StageError};
use crate::output::StageReport;
use crate::pipeline::llm::{call_with_retry, CallOutcome, CompletionClient, CompletionRequest};
use crate::pipeline::parse::parse_reply;
use crate::pipeline::Stage;
use crate::prompts::{
    analysis_user_message, extraction_user_message, letter_user_message,
    quick_review_user_message, PromptSet,
};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

/// Stage 2: bill text (already truncated) → [`StructuredBill`].
pub async fn extract_structure(
    client: &dyn CompletionClient,
    text: &str,
    prompts: &PromptSet,
    config: &AuditConfig,
) -> Result<(StructuredBill, StageReport), AuditError> {
    let request = CompletionRequest {
        stage: Stage::Extraction,
        system: prompts.extraction_system.clone(),
        user: extraction_user_message(text),
        json: true,
    };
    let outcome = call_with_retry(client, &request, config).await?;

    match decode_bill(&outcome.completion.content) {
        Ok(bill) => {
            info!(
                "Extracted {} line items, total ${:.2}",
                bill.line_items.len(),
                bill.total_bill
            );
            Ok((bill, report(Stage::Extraction, &outcome, None)))
        }
        Err(e) => {
            warn!("Falling back to empty bill: {}", e);
            let bill = StructuredBill::fallback(e.to_string());
            Ok((bill, report(Stage::Extraction, &outcome, Some(e))))
        }
    }
}

/// Stage 3: [`StructuredBill`] (+ caller context) → [`AuditResult`].
pub async fn analyse(
    client: &dyn CompletionClient,
    bill: &StructuredBill,
    user_context: &Map<String, Value>,
    prompts: &PromptSet,
    config: &AuditConfig,
) -> Result<(AuditResult, StageReport), AuditError> {
    let request = CompletionRequest {
        stage: Stage::Analysis,
        system: prompts.analysis_system.clone(),
        user: analysis_user_message(&to_pretty_json(bill)?, user_context),
        json: true,
    };
    let outcome = call_with_retry(client, &request, config).await?;
    let raw = &outcome.completion.content;

    match decode_analysis(raw) {
        Ok(result) => {
            info!(
                "Analysis: risk {} ({:?}), {} issues",
                result.risk_score,
                result.risk_level,
                result.issues.len()
            );
            Ok((result, report(Stage::Analysis, &outcome, None)))
        }
        Err(e) => {
            warn!("Falling back to unparsed analysis: {}", e);
            let result = AuditResult::fallback(raw, e.to_string());
            Ok((result, report(Stage::Analysis, &outcome, Some(e))))
        }
    }
}

/// Stage 4: draft the dispute letter. Callers check
/// [`AuditResult::wants_letter`] first.
pub async fn draft_letter(
    client: &dyn CompletionClient,
    bill: &StructuredBill,
    analysis: &AuditResult,
    prompts: &PromptSet,
    config: &AuditConfig,
) -> Result<(String, StageReport), AuditError> {
    let request = CompletionRequest {
        stage: Stage::Letter,
        system: prompts.letter_system.clone(),
        user: letter_user_message(
            bill.provider_or_default(),
            bill.total_bill,
            &to_pretty_json(&analysis.issues)?,
        ),
        json: false,
    };
    let outcome = call_with_retry(client, &request, config).await?;
    let letter = outcome.completion.content.clone();
    info!("Dispute letter drafted ({} chars)", letter.chars().count());
    Ok((letter, report(Stage::Letter, &outcome, None)))
}

/// Single-call review of bill text (already truncated).
pub async fn quick_review(
    client: &dyn CompletionClient,
    text: &str,
    user_context: &Map<String, Value>,
    prompts: &PromptSet,
    config: &AuditConfig,
) -> Result<(QuickReview, StageReport), AuditError> {
    let request = CompletionRequest {
        stage: Stage::QuickReview,
        system: prompts.quick_review_system.clone(),
        user: quick_review_user_message(text, user_context),
        json: true,
    };
    let outcome = call_with_retry(client, &request, config).await?;
    let raw = &outcome.completion.content;

    match parse_reply::<QuickReview>(Stage::QuickReview, raw) {
        Ok(review) => Ok((review, report(Stage::QuickReview, &outcome, None))),
        Err(e) => {
            warn!("Falling back to unparsed review: {}", e);
            Ok((
                QuickReview::fallback(raw),
                report(Stage::QuickReview, &outcome, Some(e)),
            ))
        }
    }
}

// ── Decoding ─────────────────────────────────────────────────────────────

fn decode_bill(raw: &str) -> Result<StructuredBill, StageError> {
    let mut bill: StructuredBill = parse_reply(Stage::Extraction, raw)?;
    bill.extraction_error = None;
    bill.validate()
        .map_err(|problems| StageError::SchemaViolation {
            stage: Stage::Extraction,
            problems,
        })?;
    Ok(bill)
}

fn decode_analysis(raw: &str) -> Result<AuditResult, StageError> {
    let mut result: AuditResult = parse_reply(Stage::Analysis, raw)?;
    result.normalize();
    result
        .validate()
        .map_err(|problems| StageError::SchemaViolation {
            stage: Stage::Analysis,
            problems,
        })?;
    Ok(result)
}

fn to_pretty_json<T: Serialize + ?Sized>(value: &T) -> Result<String, AuditError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| AuditError::Internal(format!("serialising prompt input: {e}")))
}

fn report(stage: Stage, outcome: &CallOutcome, degraded: Option<StageError>) -> StageReport {
    StageReport {
        stage,
        duration_ms: outcome.duration_ms,
        input_tokens: outcome.completion.input_tokens,
        output_tokens: outcome.completion.output_tokens,
        retries: outcome.retries,
        degraded,
    }
}
