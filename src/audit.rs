//! Audit entry points.
//!
//! [`BillAuditor`] owns the two injected collaborators (a
//! [`CompletionClient`] and a [`TextExtractor`]) plus the [`AuditConfig`], and
//! runs the stages strictly in order:
//!
//! ```text
//! bytes ─ extract ─┬─ no text ─────────────────────────► Failed
//!                  └─ text ─ structure ─ analyse ─┬─ letter? ─► Success
//!                                                 └─ skip ────► Success
//! ```
//!
//! The auditor holds no per-request state, so one instance is shared across
//! every request behind an `Arc`.

use crate::config::{AuditConfig, DEFAULT_MODEL};
use crate::error::AuditError;
use crate::output::{AuditReport, AuditResponse, AuditStats, QuickReviewReport};
use crate::pipeline::extract::{
    extract_document, join_pages, ExtractedText, Extraction, PdfiumExtractor, TextExtractor,
    EXTRACTION_FAILED_MESSAGE,
};
use crate::pipeline::llm::{CompletionClient, ProviderClient};
use crate::pipeline::{stages, Stage};
use crate::progress::ProgressCallback;
use crate::prompts::PromptSet;
use edgequake_llm::{LLMProvider, ProviderFactory};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Runs audits against one completion client and one text extractor.
pub struct BillAuditor {
    client: Arc<dyn CompletionClient>,
    extractor: Arc<dyn TextExtractor>,
    config: AuditConfig,
    prompts: PromptSet,
}

impl BillAuditor {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        extractor: Arc<dyn TextExtractor>,
        config: AuditConfig,
    ) -> Self {
        let prompts = config.prompt_set();
        Self {
            client,
            extractor,
            config,
            prompts,
        }
    }

    /// Build the production auditor: an `edgequake-llm` provider resolved
    /// from `config` and the environment, and pdfium for text extraction.
    ///
    /// # Errors
    /// [`AuditError::ProviderNotConfigured`] when no provider can be found.
    pub async fn from_config(config: AuditConfig) -> Result<Self, AuditError> {
        let provider = resolve_provider(&config).await?;
        info!(
            "LLM provider resolved (model: {})",
            config.model.as_deref().unwrap_or(DEFAULT_MODEL)
        );
        let client = Arc::new(ProviderClient::new(provider, &config));
        let extractor = Arc::new(PdfiumExtractor::new(config.pdfium_library.clone()));
        Ok(Self::new(client, extractor, config))
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    /// Full audit of a PDF (or UTF-8 text) payload.
    ///
    /// # Returns
    /// `Ok(AuditResponse::Failed)` when the document has no extractable text;
    /// no model is called in that case.
    ///
    /// # Errors
    /// Payload problems, pdfium failures and LLM transport failures after
    /// retries. Unparseable model replies are not errors.
    pub async fn audit_document(
        &self,
        bytes: Vec<u8>,
        user_context: &Map<String, Value>,
    ) -> Result<AuditResponse, AuditError> {
        info!("Starting audit of {} byte payload", bytes.len());
        let result = match extract_document(Arc::clone(&self.extractor), bytes).await {
            Ok(extraction) => self.run(extraction, user_context).await,
            Err(e) => Err(e),
        };
        self.notify_failure(result)
    }

    /// Full audit of bill text that is already in hand.
    pub async fn audit_text(
        &self,
        text: &str,
        user_context: &Map<String, Value>,
    ) -> Result<AuditResponse, AuditError> {
        let result = self
            .run(join_pages(vec![Some(text.to_string())]), user_context)
            .await;
        self.notify_failure(result)
    }

    /// Single-call review of bill text.
    ///
    /// # Errors
    /// [`AuditError::EmptyPayload`] for blank text.
    pub async fn quick_review_text(
        &self,
        text: &str,
        user_context: &Map<String, Value>,
    ) -> Result<QuickReviewReport, AuditError> {
        let result = if text.trim().is_empty() {
            Err(AuditError::EmptyPayload)
        } else {
            self.review(&ExtractedText::from_plain(text), user_context)
                .await
        };
        self.notify_failure(result)
    }

    /// Extract a document's text, then review it in a single call.
    ///
    /// The extracted text is returned alongside the review.
    ///
    /// # Errors
    /// [`AuditError::NoExtractableText`] for image-only documents, plus the
    /// errors of [`BillAuditor::audit_document`].
    pub async fn quick_review_document(
        &self,
        bytes: Vec<u8>,
        user_context: &Map<String, Value>,
    ) -> Result<QuickReviewReport, AuditError> {
        let result = match extract_document(Arc::clone(&self.extractor), bytes).await {
            Ok(Extraction::Text(extracted)) => {
                self.review(&extracted, user_context)
                    .await
                    .map(|mut report| {
                        report.extracted_text = Some(extracted.text);
                        report
                    })
            }
            Ok(Extraction::Empty { pages }) => {
                info!("Quick review stopped: no text in {} page(s)", pages);
                Err(AuditError::NoExtractableText)
            }
            Err(e) => Err(e),
        };
        self.notify_failure(result)
    }

    async fn review(
        &self,
        extracted: &ExtractedText,
        user_context: &Map<String, Value>,
    ) -> Result<QuickReviewReport, AuditError> {
        let progress = self.config.progress_callback.as_ref();
        if let Some(cb) = progress {
            cb.on_text_extracted(extracted.pages, extracted.char_len());
        }

        notify_start(progress, Stage::QuickReview);
        let (review, report) = stages::quick_review(
            self.client.as_ref(),
            extracted.truncated(self.config.max_text_chars),
            user_context,
            &self.prompts,
            &self.config,
        )
        .await?;
        notify_complete(progress, Stage::QuickReview, report.duration_ms);
        debug!(
            "Quick review tokens: {} in / {} out",
            report.input_tokens, report.output_tokens
        );
        if let Some(cb) = progress {
            cb.on_audit_complete(true);
        }

        Ok(QuickReviewReport {
            extracted_text: None,
            review,
        })
    }

    /// Tell the progress callback about a fatal error, then pass it on.
    fn notify_failure<T>(&self, result: Result<T, AuditError>) -> Result<T, AuditError> {
        if let (Err(e), Some(cb)) = (&result, self.config.progress_callback.as_ref()) {
            cb.on_audit_failed(e);
        }
        result
    }

    // ── Pipeline ─────────────────────────────────────────────────────────

    async fn run(
        &self,
        extraction: Extraction,
        user_context: &Map<String, Value>,
    ) -> Result<AuditResponse, AuditError> {
        let total_start = Instant::now();
        let progress = self.config.progress_callback.as_ref();

        let extracted = match extraction {
            Extraction::Text(extracted) => extracted,
            Extraction::Empty { pages } => {
                info!("Audit stopped: no text in {} page(s)", pages);
                if let Some(cb) = progress {
                    cb.on_audit_complete(false);
                }
                return Ok(AuditResponse::Failed {
                    error: EXTRACTION_FAILED_MESSAGE.to_string(),
                });
            }
        };

        let raw_text_length = extracted.char_len();
        let text = extracted.truncated(self.config.max_text_chars);
        let mut stats = AuditStats {
            pages: extracted.pages,
            truncated: text.len() < extracted.text.len(),
            ..Default::default()
        };
        info!(
            "Extracted {} chars from {} page(s){}",
            raw_text_length,
            extracted.pages,
            if stats.truncated { ", truncated" } else { "" }
        );
        if let Some(cb) = progress {
            cb.on_text_extracted(extracted.pages, raw_text_length);
        }

        // ── Stage 2: structure ───────────────────────────────────────────
        notify_start(progress, Stage::Extraction);
        let (bill, report) =
            stages::extract_structure(self.client.as_ref(), text, &self.prompts, &self.config)
                .await?;
        notify_complete(progress, Stage::Extraction, report.duration_ms);
        stats.push(report);

        // ── Stage 3: analyse ─────────────────────────────────────────────
        notify_start(progress, Stage::Analysis);
        let (analysis, report) = stages::analyse(
            self.client.as_ref(),
            &bill,
            user_context,
            &self.prompts,
            &self.config,
        )
        .await?;
        notify_complete(progress, Stage::Analysis, report.duration_ms);
        stats.push(report);

        // ── Stage 4: letter ──────────────────────────────────────────────
        let dispute_letter = if analysis.wants_letter() {
            notify_start(progress, Stage::Letter);
            let (letter, report) = stages::draft_letter(
                self.client.as_ref(),
                &bill,
                &analysis,
                &self.prompts,
                &self.config,
            )
            .await?;
            notify_complete(progress, Stage::Letter, report.duration_ms);
            stats.push(report);
            Some(letter)
        } else {
            debug!("No dispute letter needed");
            if let Some(cb) = progress {
                cb.on_stage_skipped(Stage::Letter);
            }
            None
        };

        stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
        info!(
            "Audit complete in {}ms: risk {:?}, {} issues, letter: {}, tokens {} in / {} out",
            stats.total_duration_ms,
            analysis.risk_level,
            analysis.issues.len(),
            dispute_letter.is_some(),
            stats.total_input_tokens,
            stats.total_output_tokens
        );
        if let Some(cb) = progress {
            cb.on_audit_complete(true);
        }

        Ok(AuditResponse::Success(Box::new(AuditReport {
            extracted_bill: bill,
            analysis,
            dispute_letter,
            raw_text_length,
            prompt_version: self.prompts.version,
            stats,
        })))
    }
}

impl std::fmt::Debug for BillAuditor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BillAuditor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn notify_start(progress: Option<&ProgressCallback>, stage: Stage) {
    if let Some(cb) = progress {
        cb.on_stage_start(stage);
    }
}

fn notify_complete(progress: Option<&ProgressCallback>, stage: Stage, duration_ms: u64) {
    if let Some(cb) = progress {
        cb.on_stage_complete(stage, duration_ms);
    }
}

// ── Provider resolution ──────────────────────────────────────────────────

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, AuditError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        AuditError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`); the API key comes
///    from the provider's usual environment variable.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **OpenAI** when `OPENAI_API_KEY` is set.
/// 5. **Auto-detect** via [`ProviderFactory::from_env`].
async fn resolve_provider(config: &AuditConfig) -> Result<Arc<dyn LLMProvider>, AuditError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);

    if let Some(ref name) = config.provider_name {
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create_provider(&prov, &env_model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| AuditError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
