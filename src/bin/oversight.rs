//! CLI binary for oversight-ai.
//!
//! A thin shim over the library crate: `serve` runs the HTTP service, `audit`
//! and `quick` run the pipeline once on a local file and print JSON.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use oversight_ai::{
    serve, AppState, AuditConfig, AuditError, AuditProgressCallback, AuditResponse, BillAuditor,
    MemoryConfig, ProgressCallback, PromptVersion, ServerConfig, Stage,
};
use serde_json::{Map, Value};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner with one log line per finished stage.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Extracting");
        bar.set_message("Reading bill…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl AuditProgressCallback for CliProgressCallback {
    fn on_text_extracted(&self, pages: usize, chars: usize) {
        self.bar.println(format!(
            "  {} Text extracted  {}",
            green("✓"),
            dim(&format!("{pages} page(s), {chars} chars"))
        ));
    }

    fn on_stage_start(&self, stage: Stage) {
        self.bar.set_prefix("Auditing");
        self.bar.set_message(format!("{stage}…"));
    }

    fn on_stage_complete(&self, stage: Stage, duration_ms: u64) {
        self.bar.println(format!(
            "  {} {:<16} {}",
            green("✓"),
            stage.to_string(),
            dim(&format!("{:.1}s", duration_ms as f64 / 1000.0)),
        ));
    }

    fn on_stage_skipped(&self, stage: Stage) {
        self.bar
            .println(format!("  {} {:<16} {}", dim("–"), stage.to_string(), dim("not needed")));
    }

    fn on_audit_complete(&self, success: bool) {
        self.bar.finish_and_clear();
        if success {
            eprintln!("{} Audit complete", green("✔"));
        } else {
            eprintln!("{} No extractable text", red("✘"));
        }
    }

    fn on_audit_failed(&self, _error: &AuditError) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the HTTP service on :8000
  oversight serve

  # Audit a bill and print the full JSON result
  oversight audit bill.pdf

  # Add patient context for the analysis
  oversight audit bill.pdf --context insurance="Aetna PPO" --context deductible_met=true

  # Single-call review
  oversight quick bill.pdf

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium
  SUPERMEMORY_KEY         Enables the memory store for requests with a user_id
"#;

/// Audit medical bills for overcharges with LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "oversight",
    version,
    about = "Audit medical bills for overcharges with LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    audit: AuditArgs,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "OVERSIGHT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "OVERSIGHT_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service.
    Serve(ServeArgs),

    /// Run the full pipeline on a local PDF or text file.
    Audit {
        file: PathBuf,

        /// Extra context for the analysis, as key=value. Repeatable.
        #[arg(long = "context", value_name = "KEY=VALUE")]
        context: Vec<String>,

        /// Store the result in memory under this user (needs SUPERMEMORY_KEY).
        #[arg(long)]
        user_id: Option<String>,

        /// Print only the dispute letter, if one was drafted.
        #[arg(long)]
        letter_only: bool,
    },

    /// Single-call review of a local PDF or text file.
    Quick { file: PathBuf },
}

#[derive(Args, Debug)]
struct AuditArgs {
    /// LLM model ID (default: gpt-4.1).
    #[arg(long, global = true, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, global = true, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Retries per LLM call.
    #[arg(long, global = true, env = "OVERSIGHT_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Per-call LLM timeout in seconds.
    #[arg(long, global = true, env = "OVERSIGHT_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Characters of bill text sent to the model.
    #[arg(long, global = true, env = "OVERSIGHT_MAX_TEXT_CHARS", default_value_t = 12_000)]
    max_text_chars: usize,

    /// Analysis prompt/schema version.
    #[arg(long, global = true, env = "OVERSIGHT_PROMPT_VERSION", value_enum, default_value = "v2")]
    prompt_version: PromptVersionArg,

    /// Path to libpdfium.
    #[arg(long, global = true, env = "PDFIUM_LIB_PATH")]
    pdfium: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Address to listen on.
    #[arg(long, env = "OVERSIGHT_BIND", default_value = "0.0.0.0:8000")]
    bind: String,

    /// Largest accepted document in bytes.
    #[arg(long, env = "OVERSIGHT_MAX_UPLOAD_BYTES", default_value_t = 10 * 1024 * 1024)]
    max_upload_bytes: usize,

    /// Whole-request timeout in seconds.
    #[arg(long, env = "OVERSIGHT_REQUEST_TIMEOUT", default_value_t = 300)]
    request_timeout: u64,

    /// Memory store API key; enables the memory store.
    #[arg(long, env = "SUPERMEMORY_KEY", hide_env_values = true)]
    memory_key: Option<String>,

    /// Memory store endpoint.
    #[arg(long, env = "SUPERMEMORY_ENDPOINT")]
    memory_endpoint: Option<String>,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum PromptVersionArg {
    V1,
    V2,
}

impl From<PromptVersionArg> for PromptVersion {
    fn from(v: PromptVersionArg) -> Self {
        match v {
            PromptVersionArg::V1 => PromptVersion::V1,
            PromptVersionArg::V2 => PromptVersion::V2,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner replaces INFO logs for one-shot commands.
    let serving = matches!(cli.command, Command::Serve(_));
    let show_progress = !cli.quiet && !serving;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress_cb: Option<ProgressCallback> = if show_progress && !cli.verbose {
        Some(CliProgressCallback::new() as Arc<dyn AuditProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli.audit, progress_cb)?;
    let auditor = BillAuditor::from_config(config)
        .await
        .context("Failed to set up the LLM provider")?;

    match cli.command {
        Command::Serve(args) => {
            let state = AppState::new(Arc::new(auditor), server_config(args));
            serve(state).await.context("Server failed")?;
        }
        Command::Audit {
            file,
            context,
            user_id,
            letter_only,
        } => {
            let user_context = parse_context(&context)?;
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let response = auditor
                .audit_document(bytes, &user_context)
                .await
                .context("Audit failed")?;

            if let (Some(user_id), AuditResponse::Success(report)) = (&user_id, &response) {
                store_memory(report, user_id).await;
            }

            if letter_only {
                match response.report().and_then(|r| r.dispute_letter.as_deref()) {
                    Some(letter) => println!("{letter}"),
                    None => eprintln!("No dispute letter was needed."),
                }
            } else {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&response).context("Failed to serialise result")?
                );
            }

            if let Some(report) = response.report() {
                if !cli.quiet {
                    eprintln!(
                        "   risk {} ({:.0}/100)  {} issues  {} tokens in  /  {} tokens out  ·  {}ms total",
                        bold(&report.analysis.risk_level.to_string()),
                        report.analysis.risk_score,
                        report.analysis.issues.len(),
                        dim(&report.stats.total_input_tokens.to_string()),
                        dim(&report.stats.total_output_tokens.to_string()),
                        report.stats.total_duration_ms,
                    );
                }
            } else {
                std::process::exit(2);
            }
        }
        Command::Quick { file } => {
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let report = auditor
                .quick_review_document(bytes, &Map::new())
                .await
                .context("Quick review failed")?;
            println!(
                "{}",
                serde_json::to_string_pretty(&report.review).context("Failed to serialise result")?
            );
        }
    }

    Ok(())
}

/// Map CLI args to `AuditConfig`.
fn build_config(args: &AuditArgs, progress: Option<ProgressCallback>) -> Result<AuditConfig> {
    let mut builder = AuditConfig::builder()
        .max_retries(args.max_retries)
        .api_timeout_secs(args.api_timeout)
        .max_text_chars(args.max_text_chars)
        .prompt_version(args.prompt_version.into());

    if let Some(ref model) = args.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = args.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref path) = args.pdfium {
        builder = builder.pdfium_library(path);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn server_config(args: ServeArgs) -> ServerConfig {
    let memory = args.memory_key.filter(|k| !k.is_empty()).map(|key| {
        let config = MemoryConfig::new(key);
        match args.memory_endpoint {
            Some(endpoint) => config.endpoint(endpoint),
            None => config,
        }
    });
    ServerConfig {
        bind: args.bind,
        max_upload_bytes: args.max_upload_bytes,
        request_timeout_secs: args.request_timeout,
        memory,
    }
}

/// `key=value` pairs → JSON object. Values that parse as JSON keep their type.
fn parse_context(pairs: &[String]) -> Result<Map<String, Value>> {
    let mut map = Map::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("--context expects KEY=VALUE, got {pair:?}");
        };
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.into()));
        map.insert(key.trim().to_string(), value);
    }
    Ok(map)
}

async fn store_memory(report: &oversight_ai::AuditReport, user_id: &str) {
    let Ok(key) = std::env::var("SUPERMEMORY_KEY") else {
        eprintln!("SUPERMEMORY_KEY not set; skipping memory store");
        return;
    };
    match oversight_ai::MemoryStore::new(MemoryConfig::new(key)) {
        Ok(store) => {
            if let Err(e) = store.store(report, user_id).await {
                tracing::warn!("[memory] {}", e);
            }
        }
        Err(e) => tracing::warn!("[memory] {}", e),
    }
}
