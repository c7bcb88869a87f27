//! Configuration types for bill audits and the HTTP service.
//!
//! All pipeline behaviour is controlled through [`AuditConfig`], built via its
//! [`AuditConfigBuilder`]. Service-level knobs (bind address, upload cap,
//! request ceiling, memory store) live in [`ServerConfig`] so the library can
//! be used without ever starting a server.

use crate::error::AuditError;
use crate::progress::ProgressCallback;
use crate::prompts::{PromptSet, PromptVersion};
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Default cap on the characters of bill text sent to any model call.
pub const DEFAULT_MAX_TEXT_CHARS: usize = 12_000;

/// Default model when a provider is named without one.
pub const DEFAULT_MODEL: &str = "gpt-4.1";

/// Configuration for a bill audit.
///
/// Built via [`AuditConfig::builder()`] or using [`AuditConfig::default()`].
///
/// # Example
/// ```rust
/// use oversight_ai::{AuditConfig, PromptVersion};
///
/// let config = AuditConfig::builder()
///     .model("gpt-4.1-mini")
///     .max_text_chars(8_000)
///     .prompt_version(PromptVersion::V1)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct AuditConfig {
    /// LLM model identifier, e.g. "gpt-4.1", "claude-sonnet-4-20250514".
    /// If None, uses [`DEFAULT_MODEL`].
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `provider`, the provider is detected from the environment.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for every completion. Default: 0.2.
    pub temperature: f32,

    /// Maximum tokens the LLM may generate per call. Default: 4096.
    ///
    /// The analysis reply for a long itemised bill (one issue per line item
    /// plus benchmarks) is the largest output; 4 096 covers it.
    pub max_tokens: usize,

    /// Characters of extracted text forwarded to the model. Default: 12 000.
    ///
    /// Excess text is cut, never summarised or re-chunked.
    pub max_text_chars: usize,

    /// Maximum retry attempts on a failed LLM call. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    ///
    /// Doubles after each attempt: 500 ms → 1 s → 2 s.
    pub retry_backoff_ms: u64,

    /// Per-LLM-call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Which prompt/schema revision to use. Default: [`PromptVersion::V2`].
    pub prompt_version: PromptVersion,

    /// Explicit prompts. If None, uses the catalogue entry for `prompt_version`.
    pub prompts: Option<PromptSet>,

    /// Path to a pdfium shared library. If None, `PDFIUM_LIB_PATH`, the
    /// working directory and the system library are tried in that order.
    pub pdfium_library: Option<PathBuf>,

    /// Receives stage events as the pipeline runs.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.2,
            max_tokens: 4096,
            max_text_chars: DEFAULT_MAX_TEXT_CHARS,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 120,
            prompt_version: PromptVersion::default(),
            prompts: None,
            pdfium_library: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for AuditConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_text_chars", &self.max_text_chars)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("prompt_version", &self.prompt_version)
            .field("custom_prompts", &self.prompts.is_some())
            .field("pdfium_library", &self.pdfium_library)
            .finish()
    }
}

impl AuditConfig {
    /// Create a new builder for `AuditConfig`.
    pub fn builder() -> AuditConfigBuilder {
        AuditConfigBuilder {
            config: Self::default(),
        }
    }

    /// The prompts this config resolves to.
    pub fn prompt_set(&self) -> PromptSet {
        self.prompts
            .clone()
            .unwrap_or_else(|| PromptSet::for_version(self.prompt_version))
    }
}

/// Builder for [`AuditConfig`].
#[derive(Debug)]
pub struct AuditConfigBuilder {
    config: AuditConfig,
}

impl AuditConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_text_chars(mut self, n: usize) -> Self {
        self.config.max_text_chars = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn prompt_version(mut self, version: PromptVersion) -> Self {
        self.config.prompt_version = version;
        self
    }

    pub fn prompts(mut self, prompts: PromptSet) -> Self {
        self.config.prompts = Some(prompts);
        self
    }

    pub fn pdfium_library(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library = Some(path.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<AuditConfig, AuditError> {
        let c = &self.config;
        if c.max_text_chars == 0 {
            return Err(AuditError::InvalidConfig(
                "max_text_chars must be ≥ 1".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(AuditError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        if c.api_timeout_secs == 0 {
            return Err(AuditError::InvalidConfig(
                "api_timeout_secs must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Service configuration ────────────────────────────────────────────────

/// Default upload cap, matching the web front-end's 10 MB limit.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Default memory store endpoint.
pub const DEFAULT_MEMORY_ENDPOINT: &str = "https://api.supermemory.ai/memories";

/// Settings for the HTTP boundary.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind, e.g. "0.0.0.0:8000". Default: "0.0.0.0:8000".
    pub bind: String,

    /// Largest accepted request body in bytes. Default: 10 MiB.
    ///
    /// Hex envelopes double the size of the document, so the JSON route
    /// accepts twice this many bytes on the wire.
    pub max_upload_bytes: usize,

    /// Whole-request ceiling in seconds. Default: 300.
    pub request_timeout_secs: u64,

    /// Best-effort memory store. None disables it.
    pub memory: Option<MemoryConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            request_timeout_secs: 300,
            memory: None,
        }
    }
}

/// Where and how to post audit summaries for longitudinal tracking.
#[derive(Clone)]
pub struct MemoryConfig {
    pub endpoint: String,
    pub api_key: String,
    /// Default: 10.
    pub timeout_secs: u64,
}

impl MemoryConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_MEMORY_ENDPOINT.to_string(),
            api_key: api_key.into(),
            timeout_secs: 10,
        }
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

impl fmt::Debug for MemoryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}
