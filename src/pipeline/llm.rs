//! LLM interaction: the completion seam and the retry loop around it.
//!
//! Stages never talk to a provider directly. They build a
//! [`CompletionRequest`] and hand it to [`call_with_retry`], which drives any
//! [`CompletionClient`]: the production [`ProviderClient`] over
//! `edgequake-llm`, or the [`ScriptedClient`] used in tests.
//!
//! ## Retry Strategy
//!
//! Exponential backoff (`retry_backoff_ms * 2^(attempt-1)`): with 500 ms base
//! and 3 retries the wait sequence is 500 ms → 1 s → 2 s. Each attempt is
//! additionally bounded by `api_timeout_secs`.

use crate::config::AuditConfig;
use crate::error::{AuditError, CompletionError};
use crate::pipeline::Stage;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// One chat completion: a system instruction and a single user turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub stage: Stage,
    pub system: String,
    pub user: String,
    /// Ask the provider for a JSON object instead of free text.
    pub json: bool,
}

/// The model's reply text plus token accounting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Anything that can answer a [`CompletionRequest`].
///
/// Implementations make exactly one attempt; retries belong to
/// [`call_with_retry`].
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, CompletionError>;
}

// ── Production client ────────────────────────────────────────────────────

/// [`CompletionClient`] backed by an `edgequake-llm` provider.
pub struct ProviderClient {
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    max_tokens: usize,
}

impl ProviderClient {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &AuditConfig) -> Self {
        Self {
            provider,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    /// Build `CompletionOptions` for one request.
    fn options(&self, request: &CompletionRequest) -> CompletionOptions {
        let base = if request.json {
            CompletionOptions::json_mode()
        } else {
            CompletionOptions::default()
        };
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..base
        }
    }
}

#[async_trait]
impl CompletionClient for ProviderClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, CompletionError> {
        let messages = vec![
            ChatMessage::system(request.system.as_str()),
            ChatMessage::user(request.user.as_str()),
        ];
        let options = self.options(request);
        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| CompletionError(format!("{}", e)))?;

        Ok(Completion {
            content: response.content,
            input_tokens: response.prompt_tokens as u64,
            output_tokens: response.completion_tokens as u64,
        })
    }
}

// ── Retry loop ───────────────────────────────────────────────────────────

/// A successful call and what it cost.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub completion: Completion,
    pub retries: u32,
    pub duration_ms: u64,
}

/// Drive `client` until it answers or `config.max_retries` is exhausted.
///
/// # Errors
/// [`AuditError::LlmApiError`] carrying the last attempt's failure.
pub async fn call_with_retry(
    client: &dyn CompletionClient,
    request: &CompletionRequest,
    config: &AuditConfig,
) -> Result<CallOutcome, AuditError> {
    let start = Instant::now();
    let per_call = Duration::from_secs(config.api_timeout_secs);
    let mut last_err: Option<String> = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = config.retry_backoff_ms * 2u64.pow(attempt - 1);
            warn!(
                "{}: retry {}/{} after {}ms",
                request.stage, attempt, config.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match timeout(per_call, client.complete(request)).await {
            Ok(Ok(completion)) => {
                let duration = start.elapsed();
                debug!(
                    "{}: {} input tokens, {} output tokens, {:?}",
                    request.stage, completion.input_tokens, completion.output_tokens, duration
                );
                return Ok(CallOutcome {
                    completion,
                    retries: attempt,
                    duration_ms: duration.as_millis() as u64,
                });
            }
            Ok(Err(e)) => {
                warn!("{}: attempt {} failed: {}", request.stage, attempt + 1, e);
                last_err = Some(e.to_string());
            }
            Err(_) => {
                warn!(
                    "{}: attempt {} timed out after {}s",
                    request.stage,
                    attempt + 1,
                    config.api_timeout_secs
                );
                last_err = Some(format!("timed out after {}s", config.api_timeout_secs));
            }
        }
    }

    Err(AuditError::LlmApiError {
        stage: request.stage,
        retries: config.max_retries,
        message: last_err.unwrap_or_else(|| "Unknown error".to_string()),
    })
}

// ── Scripted client ──────────────────────────────────────────────────────

/// A [`CompletionClient`] that replays queued replies and records every call.
///
/// Cloning shares the queue and the call log.
#[derive(Clone, Default)]
pub struct ScriptedClient {
    replies: Arc<Mutex<VecDeque<Result<String, String>>>>,
    calls: Arc<Mutex<Vec<CompletionRequest>>>,
    delay: Option<Duration>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long before every reply.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_reply(&self, content: impl Into<String>) -> &Self {
        lock(&self.replies).push_back(Ok(content.into()));
        self
    }

    pub fn push_failure(&self, message: impl Into<String>) -> &Self {
        lock(&self.replies).push_back(Err(message.into()));
        self
    }

    /// Every request received so far, in order.
    pub fn calls(&self) -> Vec<CompletionRequest> {
        lock(&self.calls).clone()
    }

    /// The stage of every request received so far, in order.
    pub fn stages(&self) -> Vec<Stage> {
        lock(&self.calls).iter().map(|r| r.stage).collect()
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, CompletionError> {
        lock(&self.calls).push(request.clone());
        if let Some(delay) = self.delay {
            sleep(delay).await;
        }
        let next = lock(&self.replies).pop_front();
        match next {
            Some(Ok(content)) => Ok(Completion {
                input_tokens: (request.system.len() + request.user.len()) as u64 / 4,
                output_tokens: content.len() as u64 / 4,
                content,
            }),
            Some(Err(message)) => Err(CompletionError(message)),
            None => Err(CompletionError("no scripted reply left".to_string())),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
