//! Best-effort memory store for longitudinal tracking.
//!
//! After a successful audit for a known user, a short plain-text summary is
//! POSTed to the memory endpoint. The request runs detached from the HTTP
//! response; failures are logged and go nowhere else.

use crate::config::MemoryConfig;
use crate::output::AuditReport;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Why a memory write did not land.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("memory client could not be built: {0}")]
    Client(String),

    #[error("memory request failed: {0}")]
    Transport(String),

    #[error("memory endpoint answered HTTP {0}")]
    Status(u16),
}

#[derive(Debug, Serialize)]
struct MemoryRecord<'a> {
    content: String,
    metadata: MemoryMetadata<'a>,
}

#[derive(Debug, Serialize)]
struct MemoryMetadata<'a> {
    user_id: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    provider: Option<&'a str>,
    risk_score: f64,
    timestamp: String,
}

/// Client for the memory endpoint.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    http: reqwest::Client,
    config: MemoryConfig,
}

impl MemoryStore {
    pub fn new(config: MemoryConfig) -> Result<Self, MemoryError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| MemoryError::Client(e.to_string()))?;
        Ok(Self { http, config })
    }

    /// Post one audit summary. Only HTTP 200 counts as stored.
    pub async fn store(&self, report: &AuditReport, user_id: &str) -> Result<(), MemoryError> {
        let record = MemoryRecord {
            content: memory_content(report),
            metadata: MemoryMetadata {
                user_id,
                kind: "medical_bill_analysis",
                provider: report.extracted_bill.provider.as_deref(),
                risk_score: report.analysis.risk_score,
                timestamp: chrono::Utc::now().to_rfc3339(),
            },
        };

        let response = self
            .http
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&record)
            .send()
            .await
            .map_err(|e| MemoryError::Transport(e.to_string()))?;

        match response.status().as_u16() {
            200 => {
                debug!("Stored audit summary for user {}", user_id);
                Ok(())
            }
            code => Err(MemoryError::Status(code)),
        }
    }

    /// Fire-and-forget [`MemoryStore::store`].
    pub fn spawn_store(self: &Arc<Self>, report: AuditReport, user_id: String) {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = store.store(&report, &user_id).await {
                warn!("[memory] Failed to store audit for {}: {}", user_id, e);
            }
        });
    }
}

/// The plain-text summary written to memory.
pub fn memory_content(report: &AuditReport) -> String {
    let bill = &report.extracted_bill;
    let analysis = &report.analysis;
    let issues = analysis
        .issues
        .iter()
        .map(|i| i.issue_type.to_string())
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "Medical Bill Analysis:\n\
         Provider: {}\n\
         Date: {}\n\
         Total Bill: ${:.2}\n\
         Risk Level: {} (Score: {}/100)\n\
         Estimated Overcharge: ${:.2}\n\
         Issues Found: {}\n\
         Summary: {}",
        bill.provider.as_deref().unwrap_or("Unknown"),
        bill.date_of_service.as_deref().unwrap_or("Unknown"),
        bill.total_bill,
        analysis.risk_level,
        analysis.risk_score,
        analysis.estimated_overcharge,
        issues,
        analysis.summary,
    )
}
