//! Prompts and reply schemas for every model call.
//!
//! The service went through several revisions, each asking the model for a
//! slightly richer verdict. Rather than keeping one copy of the pipeline per
//! revision, every revision is a [`PromptSet`] selected by [`PromptVersion`];
//! the pipeline code is shared and the typed records in [`crate::bill`]
//! tolerate the fields older schemas do not ask for.
//!
//! Callers can override any prompt via [`crate::config::AuditConfigBuilder::prompts`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Prompt/schema revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptVersion {
    /// Risk score, issues, dispute flag and summary only.
    V1,
    /// Adds savings, per-service benchmarks and next steps. (default)
    #[default]
    V2,
}

impl fmt::Display for PromptVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptVersion::V1 => f.write_str("v1"),
            PromptVersion::V2 => f.write_str("v2"),
        }
    }
}

/// The system prompts for one revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSet {
    pub version: PromptVersion,
    pub extraction_system: String,
    pub analysis_system: String,
    pub letter_system: String,
    pub quick_review_system: String,
}

impl PromptSet {
    pub fn for_version(version: PromptVersion) -> Self {
        let analysis = match version {
            PromptVersion::V1 => ANALYSIS_SYSTEM_V1,
            PromptVersion::V2 => ANALYSIS_SYSTEM_V2,
        };
        Self {
            version,
            extraction_system: EXTRACTION_SYSTEM.to_string(),
            analysis_system: analysis.to_string(),
            letter_system: LETTER_SYSTEM.to_string(),
            quick_review_system: QUICK_REVIEW_SYSTEM.to_string(),
        }
    }
}

impl Default for PromptSet {
    fn default() -> Self {
        Self::for_version(PromptVersion::default())
    }
}

/// Structured extraction: bill text → Structured Bill JSON.
pub const EXTRACTION_SYSTEM: &str = r#"You are a medical billing extraction AI.

Extract ALL billing information into this STRICT JSON format:

{
  "provider": "Hospital/Clinic name",
  "patient_name": "if visible",
  "date_of_service": "YYYY-MM-DD or null",
  "facility_type": "Emergency Room | Urgent Care | Hospital | Outpatient | Clinic | Lab | Other",
  "total_bill": 0.00,
  "insurance_paid": 0.00,
  "patient_responsibility": 0.00,
  "line_items": [
    {
      "cpt_code": "12345 or null",
      "description": "service description",
      "quantity": 1,
      "unit_price": 0.00,
      "total_price": 0.00,
      "category": "Facility Fee | Professional Fee | Lab | Imaging | Medication | Procedure | Other"
    }
  ]
}

Return ONLY valid JSON. No markdown. No explanation."#;

/// First analysis schema: no benchmarks, savings or next steps.
pub const ANALYSIS_SYSTEM_V1: &str = r#"You are a medical billing advocate who detects overcharges.

Analyze this structured medical bill and return STRICT JSON:

{
  "risk_score": 0-100,
  "risk_level": "Low | Medium | High | Critical",
  "estimated_overcharge": 0.00,
  "issues": [
    {
      "type": "Upcoding | Duplicate Charge | Above Benchmark | Network Error | Unbundling | Phantom Charge | Other",
      "severity": "Low | Medium | High | Critical",
      "line_item_description": "which charge",
      "billed_amount": 0.00,
      "benchmark_amount": 0.00,
      "overcharge_amount": 0.00,
      "explanation": "clear patient-friendly explanation of the issue",
      "action": "what the patient should do"
    }
  ],
  "dispute_letter_needed": true,
  "summary": "2-3 sentence plain English summary for the patient"
}

Return ONLY valid JSON. No markdown."#;

/// Current analysis schema.
pub const ANALYSIS_SYSTEM_V2: &str = r#"You are a senior medical billing advocate with 20 years of experience detecting overcharges.

Analyze this structured medical bill and return STRICT JSON:

{
  "risk_score": 0-100,
  "risk_level": "Low | Medium | High | Critical",
  "estimated_overcharge": 0.00,
  "estimated_savings": 0.00,
  "issues": [
    {
      "type": "Upcoding | Duplicate Charge | Above Benchmark | Network Error | Unbundling | Phantom Charge | Other",
      "severity": "Low | Medium | High | Critical",
      "line_item_description": "which charge",
      "billed_amount": 0.00,
      "benchmark_amount": 0.00,
      "overcharge_amount": 0.00,
      "explanation": "clear patient-friendly explanation of the issue",
      "action": "what the patient should do"
    }
  ],
  "benchmarks": [
    {
      "service": "service name",
      "billed": 0.00,
      "national_avg": 0.00,
      "regional_avg": 0.00,
      "percentile": "what percentile this charge falls in"
    }
  ],
  "dispute_letter_needed": true,
  "summary": "2-3 sentence plain English summary for the patient",
  "next_steps": ["step 1", "step 2", "step 3"]
}

Be aggressive in finding issues. Medical bills have errors in 80% of cases.
Return ONLY valid JSON. No markdown."#;

/// Dispute letter: free text, returned verbatim.
pub const LETTER_SYSTEM: &str =
    "You are a professional medical billing advocate. Write a formal dispute letter.";

/// Single-call review used by the lightweight endpoints.
pub const QUICK_REVIEW_SYSTEM: &str = r#"You are a medical billing advocate. Review this medical bill for likely billing problems (overpriced services, duplicate fees, charges for services not rendered).

Return STRICT JSON:

{
  "issues": ["short description of each likely problem"],
  "summary": "one or two sentence plain English summary"
}

Return an empty issues list if nothing looks wrong.
Return ONLY valid JSON. No markdown."#;

/// Heading that introduces caller-supplied context in the analysis prompt.
pub const CONTEXT_HEADING: &str = "Additional patient context";

/// User message for the extraction stage. `text` is already truncated.
pub fn extraction_user_message(text: &str) -> String {
    format!("Medical bill text:\n\n{}", text)
}

/// User message for the analysis stage.
///
/// The context section is appended only when `user_context` has entries.
pub fn analysis_user_message(bill_json: &str, user_context: &Map<String, Value>) -> String {
    let mut message = format!("Structured bill:\n{}", bill_json);
    append_context(&mut message, user_context);
    message
}

/// User message for the dispute-letter stage.
pub fn letter_user_message(provider: &str, total_bill: f64, issues_json: &str) -> String {
    format!(
        r#"Write a formal medical bill dispute letter based on this analysis.

Provider: {provider}
Total Bill: ${total_bill:.2}
Issues Found: {issues_json}

Format as a professional letter with:
- Date placeholder [DATE]
- Patient name placeholder [PATIENT NAME]
- Patient address placeholder [ADDRESS]
- Clear itemized dispute for each issue
- Request for itemized bill review
- 30-day response deadline
- Professional closing

Keep it firm but professional."#
    )
}

/// User message for the quick review. `text` is already truncated.
pub fn quick_review_user_message(text: &str, user_context: &Map<String, Value>) -> String {
    let mut message = format!("Medical bill text:\n\n{}", text);
    append_context(&mut message, user_context);
    message
}

fn append_context(message: &mut String, user_context: &Map<String, Value>) {
    if !user_context.is_empty() {
        // Map<String, Value> always serialises.
        let context = serde_json::to_string(user_context).unwrap_or_default();
        message.push_str(&format!("\n\n{}: {}", CONTEXT_HEADING, context));
    }
}
