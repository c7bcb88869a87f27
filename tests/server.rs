//! HTTP boundary tests: the router driven in-process with `oneshot`.

use axum::body::{to_bytes, Body};
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::routing::post as post_route;
use axum::{Json, Router};
use oversight_ai::{
    router, AppState, AuditConfig, BillAuditor, MemoryConfig, ScriptedClient, ServerConfig,
    Stage, StaticExtractor,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tower::ServiceExt;

const PDF: &[u8] = b"%PDF-1.4\nbill\n";

const BILL: &str = r#"{"provider": "Mercy General", "total_bill": 500,
    "line_items": [{"description": "MRI", "unit_price": 300, "total_price": 300, "category": "Imaging"}]}"#;
const CLEAN: &str = r#"{"risk_score": 12, "risk_level": "Low", "issues": [],
    "dispute_letter_needed": false, "summary": "Nothing unusual."}"#;

// ── Test helpers ─────────────────────────────────────────────────────────────

fn app_with(client: &ScriptedClient, extractor: StaticExtractor, server: ServerConfig) -> Router {
    let config = AuditConfig::builder()
        .retry_backoff_ms(1)
        .build()
        .expect("valid config");
    let auditor = BillAuditor::new(Arc::new(client.clone()), Arc::new(extractor), config);
    router(AppState::new(Arc::new(auditor), server))
}

fn app(client: &ScriptedClient, pages: &[&str]) -> Router {
    app_with(
        client,
        StaticExtractor::with_text(pages.iter().copied()),
        ServerConfig::default(),
    )
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.expect("router is infallible");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn post(uri: &str, content_type: &str, body: impl Into<Body>) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, content_type)
        .body(body.into())
        .unwrap()
}

fn multipart(parts: &[(&str, Option<&str>, &[u8])]) -> (String, Vec<u8>) {
    let boundary = "----oversight-test-boundary";
    let mut body = Vec::new();
    for (name, file_name, data) in parts {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        match file_name {
            Some(f) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{f}\"\r\n\
                     Content-Type: application/pdf\r\n\r\n"
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            ),
        }
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={boundary}"), body)
}

/// A local memory endpoint that records every POST and answers 500.
async fn failing_memory_sink() -> (MemoryConfig, mpsc::UnboundedReceiver<(Option<String>, Value)>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sink = Router::new().route(
        "/memories",
        post_route(move |headers: HeaderMap, Json(body): Json<Value>| {
            let tx = tx.clone();
            async move {
                let auth = headers
                    .get(header::AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let _ = tx.send((auth, body));
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, sink).await;
    });
    let config = MemoryConfig {
        endpoint: format!("http://{addr}/memories"),
        ..MemoryConfig::new("test-key")
    };
    (config, rx)
}

// ── /health ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_reports_service() {
    let client = ScriptedClient::new();
    let request = Request::get("/health").body(Body::empty()).unwrap();

    let (status, body) = send(app(&client, &[]), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok", "service": "oversight-ai"}));
}

// ── /analyze ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn raw_pdf_body_is_audited() {
    let client = ScriptedClient::new();
    client.push_reply(BILL).push_reply(CLEAN);

    let (status, body) = send(
        app(&client, &["Total: $500, MRI $300"]),
        post("/analyze", "application/pdf", PDF.to_vec()),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["extracted_bill"]["provider"], "Mercy General");
    assert_eq!(body["analysis"]["risk_level"], "Low");
    assert!(body["dispute_letter"].is_null());
    assert_eq!(body["raw_text_length"], 21);
}

#[tokio::test]
async fn hex_envelope_is_decoded() {
    let client = ScriptedClient::new();
    client.push_reply(BILL).push_reply(CLEAN);
    let envelope = json!({
        "pdf_hex": hex::encode(PDF),
        "user_context": {"insurance": "Aetna PPO"},
    });

    let (status, body) = send(
        app(&client, &["Total: $500"]),
        post("/analyze", "application/json", envelope.to_string()),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    let analysis = &client.calls()[1];
    assert_eq!(analysis.stage, Stage::Analysis);
    assert!(analysis.user.contains("\"insurance\":\"Aetna PPO\""));
}

#[tokio::test]
async fn empty_body_is_rejected() {
    let client = ScriptedClient::new();

    let (status, body) = send(
        app(&client, &[]),
        post("/analyze", "application/pdf", Vec::new()),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"status": "error", "message": "No PDF data received"}));
    assert!(client.calls().is_empty());
}

#[tokio::test]
async fn empty_hex_is_rejected() {
    let client = ScriptedClient::new();

    let (status, body) = send(
        app(&client, &[]),
        post("/analyze", "application/json", r#"{"pdf_hex": ""}"#),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "No PDF data received");
}

#[tokio::test]
async fn bad_hex_is_rejected() {
    let client = ScriptedClient::new();

    let (status, body) = send(
        app(&client, &[]),
        post("/analyze", "application/json", r#"{"pdf_hex": "zz"}"#),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
    assert!(body["message"].as_str().unwrap().contains("pdf_hex"));
}

#[tokio::test]
async fn image_only_pdf_is_unprocessable() {
    let client = ScriptedClient::new();

    let (status, body) = send(
        app(&client, &["  ", "\n"]),
        post("/analyze", "application/pdf", PDF.to_vec()),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["status"], "failed");
    assert_eq!(
        body["error"],
        "Could not extract text from PDF. Please ensure the PDF is not scanned/image-only."
    );
    assert!(client.calls().is_empty());
}

#[tokio::test]
async fn oversized_document_is_rejected() {
    let client = ScriptedClient::new();
    let server = ServerConfig {
        max_upload_bytes: 8,
        ..Default::default()
    };

    let (status, body) = send(
        app_with(&client, StaticExtractor::with_text(["x"]), server),
        post("/analyze", "application/pdf", PDF.to_vec()),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("too large"));
}

#[tokio::test]
async fn llm_outage_is_a_bad_gateway() {
    let client = ScriptedClient::new();
    for _ in 0..4 {
        client.push_failure("503 Service Unavailable");
    }

    let (status, body) = send(
        app(&client, &["Total: $500"]),
        post("/analyze", "application/pdf", PDF.to_vec()),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["status"], "error");
}

#[tokio::test(start_paused = true)]
async fn slow_pipeline_times_out() {
    let client = ScriptedClient::new().with_delay(Duration::from_secs(60));
    client.push_reply(BILL).push_reply(CLEAN);
    let server = ServerConfig {
        request_timeout_secs: 5,
        ..Default::default()
    };

    let (status, body) = send(
        app_with(&client, StaticExtractor::with_text(["Total: $500"]), server),
        post("/analyze", "text/plain", "Total: $500"),
    )
    .await;

    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["status"], "error");
    assert!(body["message"].as_str().unwrap().contains("5s"));
}

// ── Memory store ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn memory_store_failure_leaves_audit_untouched() {
    let client = ScriptedClient::new();
    client.push_reply(BILL).push_reply(CLEAN);
    let (memory, mut posts) = failing_memory_sink().await;
    let server = ServerConfig {
        memory: Some(memory),
        ..Default::default()
    };
    let envelope = json!({"pdf_hex": hex::encode(PDF), "user_id": "patient-42"});

    let (status, body) = send(
        app_with(&client, StaticExtractor::with_text(["Total: $500"]), server),
        post("/analyze", "application/json", envelope.to_string()),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["extracted_bill"]["provider"], "Mercy General");

    let (auth, record) = tokio::time::timeout(Duration::from_secs(5), posts.recv())
        .await
        .expect("memory store was called")
        .unwrap();
    assert_eq!(auth.as_deref(), Some("Bearer test-key"));
    assert_eq!(record["metadata"]["user_id"], "patient-42");
    assert_eq!(record["metadata"]["type"], "medical_bill_analysis");
    assert!(record["content"]
        .as_str()
        .unwrap()
        .contains("Provider: Mercy General"));
}

#[tokio::test]
async fn memory_store_skipped_without_user_id() {
    let client = ScriptedClient::new();
    client.push_reply(BILL).push_reply(CLEAN);
    let (memory, mut posts) = failing_memory_sink().await;
    let server = ServerConfig {
        memory: Some(memory),
        ..Default::default()
    };

    let (status, body) = send(
        app_with(&client, StaticExtractor::with_text(["Total: $500"]), server),
        post("/analyze", "application/pdf", PDF.to_vec()),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(posts.try_recv().is_err());
}

// ── /analyze_bill ────────────────────────────────────────────────────────────

#[tokio::test]
async fn bill_text_gets_quick_review() {
    let client = ScriptedClient::new();
    client.push_reply(r#"{"issues": ["MRI scan overpriced"], "summary": "One likely issue."}"#);

    let (status, body) = send(
        app(&client, &[]),
        post(
            "/analyze_bill",
            "application/json",
            json!({"bill_text": "MRI $3000"}).to_string(),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"issues": ["MRI scan overpriced"], "summary": "One likely issue."})
    );
    assert_eq!(client.stages(), vec![Stage::QuickReview]);
}

#[tokio::test]
async fn blank_bill_text_is_rejected() {
    let client = ScriptedClient::new();

    let (status, body) = send(
        app(&client, &[]),
        post("/analyze_bill", "application/json", r#"{"bill_text": "  "}"#),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
}

// ── /analyze_pdf ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn multipart_upload_gets_quick_review_with_text() {
    let client = ScriptedClient::new();
    client.push_reply(r#"{"issues": [], "summary": "No issues."}"#);
    let (content_type, body) = multipart(&[
        ("file", Some("bill.pdf"), PDF),
        ("user_context", None, &br#"{"plan": "HMO"}"#[..]),
    ]);

    let (status, body) = send(
        app(&client, &["Office visit $150"]),
        post("/analyze_pdf", &content_type, body),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"extracted_text": "Office visit $150", "issues": [], "summary": "No issues."})
    );
    assert!(client.calls()[0].user.contains("\"plan\":\"HMO\""));
}

#[tokio::test]
async fn multipart_rejects_non_pdf_names() {
    let client = ScriptedClient::new();
    let (content_type, body) = multipart(&[("file", Some("bill.png"), PDF)]);

    let (status, body) = send(
        app(&client, &["x"]),
        post("/analyze_pdf", &content_type, body),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid request payload: Only PDF files are supported");
}

#[tokio::test]
async fn multipart_without_file_is_empty() {
    let client = ScriptedClient::new();
    let (content_type, body) = multipart(&[("user_context", None, &b"{}"[..])]);

    let (status, body) = send(
        app(&client, &["x"]),
        post("/analyze_pdf", &content_type, body),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "No PDF data received");
}

#[tokio::test]
async fn multipart_image_only_pdf_is_unprocessable() {
    let client = ScriptedClient::new();
    let (content_type, body) = multipart(&[("file", Some("scan.pdf"), PDF)]);

    let (status, body) = send(
        app(&client, &[" "]),
        post("/analyze_pdf", &content_type, body),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["status"], "failed");
}
