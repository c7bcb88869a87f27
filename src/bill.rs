//! Structured bill and audit records exchanged with the model.
//!
//! The model is asked for JSON in a fixed shape; these types are that shape.
//! Deserialisation is deliberately forgiving where models are sloppy (money
//! as `"$1,200.00"`, `null` amounts or lists, unknown enum labels) and strict where a
//! missing value would make the record meaningless (`total_bill`,
//! `line_items`, `risk_score`, ...). Anything serde accepts is then checked by
//! `validate()`, which reports every problem at once.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

// ── Structured Bill ──────────────────────────────────────────────────────

/// A medical bill as extracted by the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredBill {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub patient_name: Option<String>,
    /// `YYYY-MM-DD` when the model could read it.
    #[serde(default)]
    pub date_of_service: Option<String>,
    #[serde(default)]
    pub facility_type: FacilityType,
    #[serde(deserialize_with = "amount")]
    pub total_bill: f64,
    #[serde(default, deserialize_with = "amount")]
    pub insurance_paid: f64,
    #[serde(default, deserialize_with = "amount")]
    pub patient_responsibility: f64,
    #[serde(deserialize_with = "list")]
    pub line_items: Vec<LineItem>,
    /// Set only on the fallback record produced when the reply was unusable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_error: Option<String>,
}

impl StructuredBill {
    /// The empty record returned when extraction could not be parsed.
    pub fn fallback(error: impl Into<String>) -> Self {
        Self {
            extraction_error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.extraction_error.is_some()
    }

    /// Provider name for the dispute letter.
    pub fn provider_or_default(&self) -> &str {
        self.provider
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or("Healthcare Provider")
    }

    /// Validate constraints serde cannot express.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();
        check_finite(&mut problems, "total_bill", self.total_bill);
        check_finite(&mut problems, "insurance_paid", self.insurance_paid);
        check_finite(
            &mut problems,
            "patient_responsibility",
            self.patient_responsibility,
        );
        for (idx, item) in self.line_items.iter().enumerate() {
            if !item.quantity.is_finite() || item.quantity < 0.0 {
                problems.push(format!(
                    "line_items[{idx}].quantity must be a non-negative number"
                ));
            }
            check_finite(
                &mut problems,
                &format!("line_items[{idx}].unit_price"),
                item.unit_price,
            );
            check_finite(
                &mut problems,
                &format!("line_items[{idx}].total_price"),
                item.total_price,
            );
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

/// One charge on the bill.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    #[serde(default)]
    pub cpt_code: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default = "one", deserialize_with = "amount")]
    pub quantity: f64,
    #[serde(default, deserialize_with = "amount")]
    pub unit_price: f64,
    #[serde(default, deserialize_with = "amount")]
    pub total_price: f64,
    #[serde(default)]
    pub category: LineItemCategory,
}

fn one() -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FacilityType {
    #[serde(rename = "Emergency Room")]
    EmergencyRoom,
    #[serde(rename = "Urgent Care")]
    UrgentCare,
    Hospital,
    Outpatient,
    Clinic,
    Lab,
    #[default]
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LineItemCategory {
    #[serde(rename = "Facility Fee")]
    FacilityFee,
    #[serde(rename = "Professional Fee")]
    ProfessionalFee,
    Lab,
    Imaging,
    Medication,
    Procedure,
    #[default]
    #[serde(other)]
    Other,
}

// ── Audit Result ─────────────────────────────────────────────────────────

/// The model's verdict on a structured bill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditResult {
    pub risk_score: f64,
    pub risk_level: Severity,
    #[serde(default, deserialize_with = "amount")]
    pub estimated_overcharge: f64,
    #[serde(default, deserialize_with = "amount")]
    pub estimated_savings: f64,
    #[serde(deserialize_with = "list")]
    pub issues: Vec<Issue>,
    #[serde(default, deserialize_with = "list")]
    pub benchmarks: Vec<Benchmark>,
    pub dispute_letter_needed: bool,
    pub summary: String,
    #[serde(default, deserialize_with = "list")]
    pub next_steps: Vec<String>,
}

impl AuditResult {
    /// The degraded record returned when analysis could not be parsed.
    ///
    /// `raw_reply` becomes the summary so nothing the model said is lost, and
    /// a single [`IssueType::UnparsedResponse`] issue marks the record.
    pub fn fallback(raw_reply: &str, error: impl Into<String>) -> Self {
        Self {
            risk_score: 0.0,
            risk_level: Severity::Low,
            estimated_overcharge: 0.0,
            estimated_savings: 0.0,
            issues: vec![Issue {
                issue_type: IssueType::UnparsedResponse,
                severity: Severity::Low,
                line_item_description: "Entire bill".to_string(),
                billed_amount: 0.0,
                benchmark_amount: 0.0,
                overcharge_amount: 0.0,
                explanation: error.into(),
                action: "Retry the analysis or review the bill manually.".to_string(),
            }],
            benchmarks: Vec::new(),
            dispute_letter_needed: false,
            summary: raw_reply.trim().to_string(),
            next_steps: Vec::new(),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.issues
            .iter()
            .any(|i| i.issue_type == IssueType::UnparsedResponse)
    }

    /// Whether the dispute-letter stage should run.
    pub fn wants_letter(&self) -> bool {
        self.dispute_letter_needed && !self.issues.is_empty()
    }

    /// Replace unrecognised severity labels.
    ///
    /// The risk level is derived from the score; issue severities fall back
    /// to [`Severity::Medium`].
    pub fn normalize(&mut self) {
        if self.risk_level == Severity::Unknown {
            self.risk_level = Severity::from_score(self.risk_score);
        }
        for issue in &mut self.issues {
            if issue.severity == Severity::Unknown {
                issue.severity = Severity::Medium;
            }
        }
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();
        if !(0.0..=100.0).contains(&self.risk_score) {
            problems.push(format!(
                "risk_score must be within 0-100, got {}",
                self.risk_score
            ));
        }
        check_finite(&mut problems, "estimated_overcharge", self.estimated_overcharge);
        check_finite(&mut problems, "estimated_savings", self.estimated_savings);
        for (idx, issue) in self.issues.iter().enumerate() {
            check_finite(
                &mut problems,
                &format!("issues[{idx}].billed_amount"),
                issue.billed_amount,
            );
            check_finite(
                &mut problems,
                &format!("issues[{idx}].benchmark_amount"),
                issue.benchmark_amount,
            );
            check_finite(
                &mut problems,
                &format!("issues[{idx}].overcharge_amount"),
                issue.overcharge_amount,
            );
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

/// One flagged problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(rename = "type", default)]
    pub issue_type: IssueType,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub line_item_description: String,
    #[serde(default, deserialize_with = "amount")]
    pub billed_amount: f64,
    #[serde(default, deserialize_with = "amount")]
    pub benchmark_amount: f64,
    #[serde(default, deserialize_with = "amount")]
    pub overcharge_amount: f64,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub action: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IssueType {
    Upcoding,
    #[serde(rename = "Duplicate Charge")]
    DuplicateCharge,
    #[serde(rename = "Above Benchmark")]
    AboveBenchmark,
    #[serde(rename = "Network Error")]
    NetworkError,
    Unbundling,
    #[serde(rename = "Phantom Charge")]
    PhantomCharge,
    /// Marker for a fallback record; never requested from the model.
    #[serde(rename = "Unparsed Response")]
    UnparsedResponse,
    #[default]
    #[serde(other)]
    Other,
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            IssueType::Upcoding => "Upcoding",
            IssueType::DuplicateCharge => "Duplicate Charge",
            IssueType::AboveBenchmark => "Above Benchmark",
            IssueType::NetworkError => "Network Error",
            IssueType::Unbundling => "Unbundling",
            IssueType::PhantomCharge => "Phantom Charge",
            IssueType::UnparsedResponse => "Unparsed Response",
            IssueType::Other => "Other",
        };
        f.write_str(label)
    }
}

/// Low/Medium/High/Critical, used for both the overall risk level and
/// per-issue severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
    /// Label the model invented; replaced by [`AuditResult::normalize`].
    #[default]
    #[serde(other)]
    Unknown,
}

impl Severity {
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s >= 75.0 => Severity::Critical,
            s if s >= 50.0 => Severity::High,
            s if s >= 25.0 => Severity::Medium,
            _ => Severity::Low,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Billed amount compared to typical prices for one service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Benchmark {
    #[serde(default)]
    pub service: String,
    #[serde(default, deserialize_with = "amount")]
    pub billed: f64,
    #[serde(default, deserialize_with = "amount")]
    pub national_avg: f64,
    #[serde(default, deserialize_with = "amount")]
    pub regional_avg: f64,
    #[serde(default)]
    pub percentile: String,
}

// ── Quick review ─────────────────────────────────────────────────────────

/// Verdict of the single-call review.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuickReview {
    pub issues: Vec<String>,
    pub summary: String,
}

/// Issue text carried by a quick-review fallback.
pub const UNPARSED_REVIEW_ISSUE: &str = "Unparsed model response";

impl QuickReview {
    pub fn fallback(raw_reply: &str) -> Self {
        Self {
            issues: vec![UNPARSED_REVIEW_ISSUE.to_string()],
            summary: raw_reply.trim().to_string(),
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn check_finite(problems: &mut Vec<String>, field: &str, value: f64) {
    if !value.is_finite() {
        problems.push(format!("{field} must be a finite number"));
    }
}

/// Deserialise a money-like value: number, numeric string or null.
///
/// `"$1,250.00"` → 1250.0, `null` → 0.0.
fn amount<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
        Null(()),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Null(()) => Ok(0.0),
        Raw::Text(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| !matches!(c, '$' | ',' | ' '))
                .collect();
            if cleaned.is_empty() {
                return Ok(0.0);
            }
            cleaned
                .parse::<f64>()
                .map_err(|_| serde::de::Error::custom(format!("not an amount: {s:?}")))
        }
    }
}

/// A list the model may send as `null` when there is nothing to list.
fn list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
