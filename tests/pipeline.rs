//! Pipeline tests driven by a scripted model and a static extractor.
//!
//! No network and no pdfium: every test wires a `BillAuditor` to a
//! `ScriptedClient` (queued replies, recorded requests) and a
//! `StaticExtractor` (fixed page text).

use oversight_ai::{
    AuditConfig, AuditError, AuditResponse, BillAuditor, IssueType, ScriptedClient, Severity,
    Stage, StaticExtractor,
};
use serde_json::{json, Map, Value};
use std::sync::Arc;

const PDF: &[u8] = b"%PDF-1.7\n%\xe2\xe3\xcf\xd3\n1 0 obj\n<<>>\nendobj\n";

// ── Test helpers ─────────────────────────────────────────────────────────────

fn config() -> AuditConfig {
    AuditConfig::builder()
        .retry_backoff_ms(1)
        .build()
        .expect("valid config")
}

fn auditor(client: &ScriptedClient, extractor: StaticExtractor) -> (BillAuditor, Arc<StaticExtractor>) {
    let extractor = Arc::new(extractor);
    let auditor = BillAuditor::new(Arc::new(client.clone()), extractor.clone(), config());
    (auditor, extractor)
}

fn bill_reply() -> String {
    json!({
        "provider": "Mercy General Hospital",
        "patient_name": "Jane Doe",
        "date_of_service": "2024-03-18",
        "facility_type": "Hospital",
        "total_bill": 500,
        "insurance_paid": 0,
        "patient_responsibility": 500,
        "line_items": [
            {"cpt_code": "70551", "description": "MRI brain w/o contrast", "quantity": 1,
             "unit_price": 300, "total_price": 300, "category": "Imaging"},
            {"cpt_code": "80053", "description": "Comprehensive metabolic panel", "quantity": 1,
             "unit_price": 200, "total_price": 200, "category": "Lab"}
        ]
    })
    .to_string()
}

fn analysis_reply(letter_needed: bool, issues: Value) -> String {
    json!({
        "risk_score": 68,
        "risk_level": "High",
        "estimated_overcharge": 140,
        "estimated_savings": 140,
        "issues": issues,
        "benchmarks": [
            {"service": "MRI brain", "billed": 300, "national_avg": 250, "regional_avg": 240,
             "percentile": "80th"}
        ],
        "dispute_letter_needed": letter_needed,
        "summary": "The lab panel is priced well above benchmark.",
        "next_steps": ["Request an itemized bill"]
    })
    .to_string()
}

fn one_issue() -> Value {
    json!([{
        "type": "Above Benchmark",
        "severity": "High",
        "line_item_description": "Comprehensive metabolic panel",
        "billed_amount": 200,
        "benchmark_amount": 60,
        "overcharge_amount": 140,
        "explanation": "CMP typically costs around $60.",
        "confidence": 0.8
    }])
}

fn analysis_prompt(client: &ScriptedClient) -> String {
    client
        .calls()
        .into_iter()
        .find(|c| c.stage == Stage::Analysis)
        .map(|c| c.user)
        .expect("analysis was called")
}

// ── Extraction outcomes ──────────────────────────────────────────────────────

#[tokio::test]
async fn whitespace_only_pdf_fails_without_model_calls() {
    let client = ScriptedClient::new();
    let (auditor, extractor) = auditor(
        &client,
        StaticExtractor::with_text(["   \n\t", "", "\n\n"]),
    );

    let response = auditor.audit_document(PDF.to_vec(), &Map::new()).await.unwrap();

    assert_eq!(extractor.calls(), 1);
    assert!(client.calls().is_empty());
    assert_eq!(
        serde_json::to_value(&response).unwrap(),
        json!({
            "status": "failed",
            "error": "Could not extract text from PDF. Please ensure the PDF is not scanned/image-only."
        })
    );
}

#[tokio::test]
async fn image_only_pdf_with_unreadable_pages_fails() {
    let client = ScriptedClient::new();
    let (auditor, _) = auditor(&client, StaticExtractor::new(vec![None, None]));

    let response = auditor.audit_document(PDF.to_vec(), &Map::new()).await.unwrap();

    assert!(matches!(response, AuditResponse::Failed { .. }));
    assert!(client.calls().is_empty());
}

#[tokio::test]
async fn empty_payload_is_an_error() {
    let client = ScriptedClient::new();
    let (auditor, extractor) = auditor(&client, StaticExtractor::default());

    let err = auditor.audit_document(Vec::new(), &Map::new()).await.unwrap_err();

    assert!(matches!(err, AuditError::EmptyPayload));
    assert_eq!(extractor.calls(), 0);
}

#[tokio::test]
async fn binary_non_pdf_payload_is_rejected() {
    let client = ScriptedClient::new();
    let (auditor, _) = auditor(&client, StaticExtractor::default());

    let err = auditor
        .audit_document(vec![0x89, b'P', b'N', b'G', 0xff, 0x00], &Map::new())
        .await
        .unwrap_err();

    assert!(matches!(err, AuditError::UnsupportedDocument { .. }));
    assert!(err.is_client_error());
}

// ── Stage ordering ───────────────────────────────────────────────────────────

#[tokio::test]
async fn two_page_bill_runs_extraction_then_analysis() {
    let client = ScriptedClient::new();
    client
        .push_reply(bill_reply())
        .push_reply(analysis_reply(false, json!([])));
    let (auditor, _) = auditor(
        &client,
        StaticExtractor::with_text(["Total: $500, MRI $300", "Lab $200"]),
    );

    let response = auditor.audit_document(PDF.to_vec(), &Map::new()).await.unwrap();

    assert_eq!(client.stages(), vec![Stage::Extraction, Stage::Analysis]);
    assert_eq!(
        client.calls()[0].user,
        "Medical bill text:\n\nTotal: $500, MRI $300\nLab $200"
    );

    let report = response.report().expect("success");
    assert_eq!(report.raw_text_length, "Total: $500, MRI $300\nLab $200".len());
    assert_eq!(report.stats.pages, 2);
    assert!(!report.stats.truncated);
    assert_eq!(report.extracted_bill.line_items.len(), 2);
    assert_eq!(report.analysis.risk_level, Severity::High);
    assert!(report.dispute_letter.is_none());
    assert_eq!(report.stats.stages.len(), 2);
}

#[tokio::test]
async fn analysis_receives_the_structured_bill() {
    let client = ScriptedClient::new();
    client
        .push_reply(bill_reply())
        .push_reply(analysis_reply(false, json!([])));
    let (auditor, _) = auditor(&client, StaticExtractor::with_text(["Total: $500"]));

    auditor.audit_document(PDF.to_vec(), &Map::new()).await.unwrap();

    let prompt = analysis_prompt(&client);
    assert!(prompt.contains("Mercy General Hospital"));
    assert!(prompt.contains("\"cpt_code\": \"70551\""));
}

// ── Dispute letter ───────────────────────────────────────────────────────────

#[tokio::test]
async fn letter_drafted_when_needed_and_issues_exist() {
    let client = ScriptedClient::new();
    client
        .push_reply(bill_reply())
        .push_reply(analysis_reply(true, one_issue()))
        .push_reply("[DATE]\n\n[PATIENT NAME]\n[ADDRESS]\n\nDear Billing Department,");
    let (auditor, _) = auditor(&client, StaticExtractor::with_text(["Total: $500"]));

    let response = auditor.audit_document(PDF.to_vec(), &Map::new()).await.unwrap();

    assert_eq!(
        client.stages(),
        vec![Stage::Extraction, Stage::Analysis, Stage::Letter]
    );
    let report = response.report().unwrap();
    assert!(report
        .dispute_letter
        .as_deref()
        .unwrap()
        .starts_with("[DATE]"));
    assert_eq!(report.analysis.issues[0].issue_type, IssueType::AboveBenchmark);

    let letter_prompt = &client.calls()[2].user;
    assert!(letter_prompt.contains("Provider: Mercy General Hospital"));
    assert!(letter_prompt.contains("Total Bill: $500.00"));
    assert!(letter_prompt.contains("Comprehensive metabolic panel"));
}

#[tokio::test]
async fn only_the_letter_is_requested_as_free_text() {
    let client = ScriptedClient::new();
    client
        .push_reply(bill_reply())
        .push_reply(analysis_reply(true, one_issue()))
        .push_reply("[DATE]\nDear Billing Department,");
    let (auditor, _) = auditor(&client, StaticExtractor::with_text(["Total: $500"]));

    auditor.audit_document(PDF.to_vec(), &Map::new()).await.unwrap();

    let modes: Vec<(Stage, bool)> = client.calls().iter().map(|c| (c.stage, c.json)).collect();
    assert_eq!(
        modes,
        vec![
            (Stage::Extraction, true),
            (Stage::Analysis, true),
            (Stage::Letter, false),
        ]
    );
}

#[tokio::test]
async fn no_letter_when_flag_set_but_no_issues() {
    let client = ScriptedClient::new();
    client
        .push_reply(bill_reply())
        .push_reply(analysis_reply(true, json!([])));
    let (auditor, _) = auditor(&client, StaticExtractor::with_text(["Total: $500"]));

    let response = auditor.audit_document(PDF.to_vec(), &Map::new()).await.unwrap();

    assert_eq!(client.stages(), vec![Stage::Extraction, Stage::Analysis]);
    let v = serde_json::to_value(&response).unwrap();
    assert!(v["dispute_letter"].is_null());
}

#[tokio::test]
async fn no_letter_when_issues_but_flag_unset() {
    let client = ScriptedClient::new();
    client
        .push_reply(bill_reply())
        .push_reply(analysis_reply(false, one_issue()));
    let (auditor, _) = auditor(&client, StaticExtractor::with_text(["Total: $500"]));

    let response = auditor.audit_document(PDF.to_vec(), &Map::new()).await.unwrap();

    assert_eq!(client.stages(), vec![Stage::Extraction, Stage::Analysis]);
    assert!(response.report().unwrap().dispute_letter.is_none());
}

// ── Truncation and context ───────────────────────────────────────────────────

#[tokio::test]
async fn long_text_is_cut_to_exactly_the_cap() {
    let client = ScriptedClient::new();
    client
        .push_reply(bill_reply())
        .push_reply(analysis_reply(false, json!([])));
    let page = "x".repeat(30_000);
    let (auditor, _) = auditor(&client, StaticExtractor::with_text([page]));

    let response = auditor.audit_document(PDF.to_vec(), &Map::new()).await.unwrap();

    let sent = client.calls()[0]
        .user
        .strip_prefix("Medical bill text:\n\n")
        .unwrap()
        .to_string();
    assert_eq!(sent.chars().count(), 12_000);
    let report = response.report().unwrap();
    assert_eq!(report.raw_text_length, 30_000);
    assert!(report.stats.truncated);
}

#[tokio::test]
async fn empty_context_omits_the_context_section() {
    let client = ScriptedClient::new();
    client
        .push_reply(bill_reply())
        .push_reply(analysis_reply(false, json!([])));
    let (auditor, _) = auditor(&client, StaticExtractor::with_text(["Total: $500"]));

    auditor.audit_document(PDF.to_vec(), &Map::new()).await.unwrap();

    assert!(!analysis_prompt(&client).contains("Additional patient context"));
}

#[tokio::test]
async fn context_is_forwarded_to_analysis() {
    let client = ScriptedClient::new();
    client
        .push_reply(bill_reply())
        .push_reply(analysis_reply(false, json!([])));
    let (auditor, _) = auditor(&client, StaticExtractor::with_text(["Total: $500"]));
    let mut ctx = Map::new();
    ctx.insert("insurance".into(), json!("Aetna PPO"));

    auditor.audit_document(PDF.to_vec(), &ctx).await.unwrap();

    let prompt = analysis_prompt(&client);
    assert!(prompt.ends_with("Additional patient context: {\"insurance\":\"Aetna PPO\"}"));
}

// ── Degraded replies ─────────────────────────────────────────────────────────

#[tokio::test]
async fn fenced_replies_are_accepted() {
    let client = ScriptedClient::new();
    client
        .push_reply(format!("```json\n{}\n```", bill_reply()))
        .push_reply(format!("Here is the audit:\n{}", analysis_reply(false, json!([]))));
    let (auditor, _) = auditor(&client, StaticExtractor::with_text(["Total: $500"]));

    let response = auditor.audit_document(PDF.to_vec(), &Map::new()).await.unwrap();

    let report = response.report().unwrap();
    assert!(!report.extracted_bill.is_fallback());
    assert!(!report.analysis.is_fallback());
    assert!(report.stats.degraded_stages().is_empty());
}

#[tokio::test]
async fn malformed_replies_degrade_to_fallbacks() {
    let client = ScriptedClient::new();
    client
        .push_reply("I could not read this bill.")
        .push_reply("The bill looks fine to me.");
    let (auditor, _) = auditor(&client, StaticExtractor::with_text(["Total: $500"]));

    let response = auditor.audit_document(PDF.to_vec(), &Map::new()).await.unwrap();

    // Analysis still runs on the fallback bill.
    assert_eq!(client.stages(), vec![Stage::Extraction, Stage::Analysis]);
    let report = response.report().unwrap();
    assert!(report.extracted_bill.is_fallback());
    assert!(report.analysis.is_fallback());
    assert_eq!(report.analysis.summary, "The bill looks fine to me.");
    assert!(report.dispute_letter.is_none());
    assert_eq!(
        report.stats.degraded_stages(),
        vec![Stage::Extraction, Stage::Analysis]
    );
}

// ── Transport failures ───────────────────────────────────────────────────────

#[tokio::test]
async fn transient_failure_is_retried() {
    let client = ScriptedClient::new();
    client
        .push_failure("503 Service Unavailable")
        .push_reply(bill_reply())
        .push_reply(analysis_reply(false, json!([])));
    let (auditor, _) = auditor(&client, StaticExtractor::with_text(["Total: $500"]));

    let response = auditor.audit_document(PDF.to_vec(), &Map::new()).await.unwrap();

    let report = response.report().unwrap();
    assert_eq!(report.stats.stages[0].retries, 1);
    assert_eq!(
        client.stages(),
        vec![Stage::Extraction, Stage::Extraction, Stage::Analysis]
    );
}

#[tokio::test]
async fn exhausted_retries_fail_the_request() {
    let client = ScriptedClient::new();
    client.push_reply(bill_reply());
    for _ in 0..4 {
        client.push_failure("connection reset");
    }
    let (auditor, _) = auditor(&client, StaticExtractor::with_text(["Total: $500"]));

    let err = auditor
        .audit_document(PDF.to_vec(), &Map::new())
        .await
        .unwrap_err();

    match err {
        AuditError::LlmApiError { stage, message, .. } => {
            assert_eq!(stage, Stage::Analysis);
            assert!(message.contains("connection reset"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

// ── Quick review ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn quick_review_of_document_returns_text_and_verdict() {
    let client = ScriptedClient::new();
    client.push_reply(r#"{"issues": ["MRI scan overpriced", "Duplicate lab fee"], "summary": "Potential billing issues detected."}"#);
    let (auditor, _) = auditor(&client, StaticExtractor::with_text(["MRI $3000", "Lab $200 Lab $200"]));

    let report = auditor
        .quick_review_document(PDF.to_vec(), &Map::new())
        .await
        .unwrap();

    assert_eq!(client.stages(), vec![Stage::QuickReview]);
    assert!(client.calls()[0].json);
    assert_eq!(
        serde_json::to_value(&report).unwrap(),
        json!({
            "extracted_text": "MRI $3000\nLab $200 Lab $200",
            "issues": ["MRI scan overpriced", "Duplicate lab fee"],
            "summary": "Potential billing issues detected."
        })
    );
}

#[tokio::test]
async fn quick_review_of_image_only_document_is_an_error() {
    let client = ScriptedClient::new();
    let (auditor, _) = auditor(&client, StaticExtractor::with_text([" "]));

    let err = auditor
        .quick_review_document(PDF.to_vec(), &Map::new())
        .await
        .unwrap_err();

    assert!(matches!(err, AuditError::NoExtractableText));
    assert!(client.calls().is_empty());
}
