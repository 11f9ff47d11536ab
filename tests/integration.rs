//! End-to-end tests: the real router on an ephemeral port, a fake upstream
//! chat API serving canned event streams, and recording mailers.

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use futures::StreamExt;
use pulse_relay::config::UpstreamConfig;
use pulse_relay::ingest::DocumentIngestor;
use pulse_relay::mail::{MailBody, Mailer, OutgoingMail};
use pulse_relay::relay::{ChatRelay, DOCUMENT_END_MARKER, DOCUMENT_START_MARKER};
use pulse_relay::server::{serve, AppState};
use pulse_relay::store::{DocumentStore, InMemoryDocumentStore};
use reqwest::multipart::{Form, Part};
use serde_json::{json, Value};
use tempfile::TempDir;

// ─── Fake upstream ──────────────────────────────────────────────────

#[derive(Clone)]
enum Scenario {
    /// 200 with these body chunks, each sent after a short pause.
    Chunks(Vec<&'static str>),
    /// 200, sends these chunks, then breaks the connection.
    ChunksThenAbort(Vec<&'static str>),
    /// Non-success status with a body.
    Status(u16, &'static str),
    /// 200 headers, then nothing.
    Hang,
    /// Numbered deltas forever; the flag is set once the body is dropped.
    Endless(Arc<AtomicBool>),
}

/// Sets its flag when the upstream body stream is dropped.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[derive(Clone)]
struct FakeUpstream {
    scenario: Scenario,
    requests: Arc<Mutex<Vec<(Option<String>, Value)>>>,
}

impl FakeUpstream {
    fn requests(&self) -> Vec<(Option<String>, Value)> {
        self.requests.lock().unwrap().clone()
    }
}

fn delayed(chunk: &'static str) -> impl std::future::Future<Output = Bytes> {
    async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Bytes::from_static(chunk.as_bytes())
    }
}

async fn fake_completions(
    State(upstream): State<FakeUpstream>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    upstream.requests.lock().unwrap().push((auth, body));

    match upstream.scenario {
        Scenario::Chunks(chunks) => {
            let stream = futures::stream::iter(chunks)
                .then(delayed)
                .map(Ok::<_, Infallible>);
            event_stream(Body::from_stream(stream))
        }
        Scenario::ChunksThenAbort(chunks) => {
            let stream = futures::stream::iter(chunks)
                .then(delayed)
                .map(Ok::<_, std::io::Error>)
                .chain(futures::stream::once(async {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Err(std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        "upstream went away",
                    ))
                }));
            event_stream(Body::from_stream(stream))
        }
        Scenario::Status(code, body) => {
            (StatusCode::from_u16(code).unwrap(), body.to_string()).into_response()
        }
        Scenario::Hang => event_stream(Body::from_stream(
            futures::stream::pending::<Result<Bytes, Infallible>>(),
        )),
        Scenario::Endless(dropped) => {
            let stream =
                futures::stream::unfold((DropFlag(dropped), 0u64), |(flag, i)| async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    let line = sse(&format!("x{}", i));
                    Some((Ok::<_, Infallible>(Bytes::from(line)), (flag, i + 1)))
                });
            event_stream(Body::from_stream(stream))
        }
    }
}

fn event_stream(body: Body) -> Response {
    ([("content-type", "text/event-stream")], body).into_response()
}

async fn start_upstream(scenario: Scenario) -> (String, FakeUpstream) {
    let upstream = FakeUpstream {
        scenario,
        requests: Arc::new(Mutex::new(Vec::new())),
    };
    let app = Router::new()
        .route("/v1/chat/completions", post(fake_completions))
        .with_state(upstream.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    (format!("http://{}/v1/chat/completions", addr), upstream)
}

// ─── Recording mailer ───────────────────────────────────────────────

#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<OutgoingMail>>,
    fail: bool,
}

impl RecordingMailer {
    fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    fn sent(&self) -> Vec<OutgoingMail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, mail: OutgoingMail) -> Result<()> {
        self.sent.lock().unwrap().push(mail);
        if self.fail {
            anyhow::bail!("smtp connection refused");
        }
        Ok(())
    }
}

// ─── Harness ────────────────────────────────────────────────────────

struct Harness {
    base: String,
    client: reqwest::Client,
    upstream: FakeUpstream,
    store: Arc<dyn DocumentStore>,
    inquiry: Arc<RecordingMailer>,
    human: Arc<RecordingMailer>,
    tmp: TempDir,
}

impl Harness {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn staged_files(&self) -> usize {
        std::fs::read_dir(self.tmp.path().join("uploads"))
            .map(|d| d.count())
            .unwrap_or(0)
    }

    async fn upload(&self, bytes: Vec<u8>, filename: &str, mime: &str) -> reqwest::Response {
        let part = Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(mime)
            .unwrap();
        self.client
            .post(self.url("/api/upload"))
            .multipart(Form::new().part("document", part))
            .send()
            .await
            .unwrap()
    }

    async fn chat(&self, body: Value) -> reqwest::Response {
        self.client
            .post(self.url("/api/message"))
            .json(&body)
            .send()
            .await
            .unwrap()
    }
}

struct Options {
    scenario: Scenario,
    max_upload_bytes: u64,
    idle_timeout_secs: u64,
    inquiry: RecordingMailer,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            scenario: Scenario::Chunks(vec![]),
            max_upload_bytes: 10 * 1024 * 1024,
            idle_timeout_secs: 5,
            inquiry: RecordingMailer::default(),
        }
    }
}

async fn start(opts: Options) -> Harness {
    let (endpoint, upstream) = start_upstream(opts.scenario).await;
    let tmp = TempDir::new().unwrap();
    let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());

    let ingestor = DocumentIngestor::new(
        store.clone(),
        tmp.path().join("uploads"),
        opts.max_upload_bytes,
    );
    let relay = ChatRelay::new(
        UpstreamConfig {
            endpoint,
            model: "test/model".to_string(),
            idle_timeout_secs: opts.idle_timeout_secs,
            ..UpstreamConfig::default()
        },
        "test-key".to_string(),
        store.clone(),
    )
    .unwrap();
    let inquiry = Arc::new(opts.inquiry);
    let human = Arc::new(RecordingMailer::default());

    let state = AppState {
        ingestor: Arc::new(ingestor),
        relay: Arc::new(relay),
        inquiry_mailer: inquiry.clone(),
        human_response_mailer: human.clone(),
    };
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        serve(listener, state).await.ok();
    });

    Harness {
        base: format!("http://{}", addr),
        client: reqwest::Client::new(),
        upstream,
        store,
        inquiry,
        human,
        tmp,
    }
}

fn sse(content: &str) -> String {
    format!(
        "data: {}\n",
        json!({ "choices": [{ "delta": { "content": content } }] })
    )
}

fn leak(s: String) -> &'static str {
    Box::leak(s.into_boxed_str())
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn health_reports_version() {
    let h = start(Options::default()).await;
    let body: Value = h
        .client
        .get(h.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn chat_streams_plain_text_across_split_chunks() {
    let h = start(Options {
        scenario: Scenario::Chunks(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\ndata: [DONE]\n",
        ]),
        ..Options::default()
    })
    .await;

    let resp = h.chat(json!({ "message": "Say hello" })).await;
    assert_eq!(resp.status(), 200);
    let content_type = resp.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/plain"));
    assert_eq!(resp.headers()["cache-control"], "no-cache");
    assert_eq!(resp.text().await.unwrap(), "Hello");

    let requests = h.upstream.requests();
    assert_eq!(requests.len(), 1);
    let (auth, body) = &requests[0];
    assert_eq!(auth.as_deref(), Some("Bearer test-key"));
    assert_eq!(body["model"], "test/model");
    assert_eq!(body["stream"], true);
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "system");
    assert_eq!(messages[1]["role"], "user");
    assert_eq!(messages[1]["content"], "Say hello");
    assert!(!messages[0]["content"]
        .as_str()
        .unwrap()
        .contains(DOCUMENT_START_MARKER));
}

#[tokio::test]
async fn chat_skips_malformed_lines_and_partial_json() {
    let h = start(Options {
        scenario: Scenario::Chunks(vec![
            "data: {broken\n",
            leak(sse("one ")),
            "data: {\"choices\":[{\"delta\":{\"con",
            "tent\":\"two\"}}]}\n",
            ": keep-alive comment\n",
        ]),
        ..Options::default()
    })
    .await;

    let resp = h.chat(json!({ "message": "count" })).await;
    assert_eq!(resp.status(), 200);
    // No [DONE]: upstream end closes the stream normally.
    assert_eq!(resp.text().await.unwrap(), "one two");
}

#[tokio::test]
async fn chat_with_document_sends_text_between_markers() {
    let h = start(Options {
        scenario: Scenario::Chunks(vec![leak(sse("ok")), "data: [DONE]\n"]),
        ..Options::default()
    })
    .await;

    let text = "Invoice 7731\nTotal due: 1,250.00 EUR";
    let upload: Value = h
        .upload(text.as_bytes().to_vec(), "invoice.txt", "text/plain")
        .await
        .json()
        .await
        .unwrap();
    let id = upload["fileId"].as_str().unwrap().to_string();

    let resp = h
        .chat(json!({ "message": "What is due?", "documentId": id }))
        .await;
    assert_eq!(resp.text().await.unwrap(), "ok");

    let resp = h
        .chat(json!({ "message": "And now?", "documentId": "no-such-document" }))
        .await;
    assert_eq!(resp.text().await.unwrap(), "ok");

    let requests = h.upstream.requests();
    assert_eq!(requests.len(), 2);

    let with_doc = requests[0].1["messages"][0]["content"].as_str().unwrap();
    let expected = format!("{}\n{}\n{}", DOCUMENT_START_MARKER, text, DOCUMENT_END_MARKER);
    assert!(
        with_doc.contains(&expected),
        "system message should embed the document: {}",
        with_doc
    );

    let unresolved = requests[1].1["messages"][0]["content"].as_str().unwrap();
    assert!(!unresolved.contains(DOCUMENT_START_MARKER));
    assert!(!unresolved.contains(DOCUMENT_END_MARKER));
}

#[tokio::test]
async fn invalid_chat_requests_never_reach_upstream() {
    let h = start(Options::default()).await;

    for body in [
        json!({}),
        json!({ "message": "" }),
        json!({ "message": "   " }),
        json!({ "message": 42 }),
        json!({ "message": null }),
    ] {
        let resp = h.chat(body.clone()).await;
        assert_eq!(resp.status(), 400, "body {} should be rejected", body);
        let err: Value = resp.json().await.unwrap();
        assert_eq!(err["error"], "Invalid or missing message");
    }

    let resp = h
        .client
        .post(h.url("/api/message"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    assert!(h.upstream.requests().is_empty());
}

#[tokio::test]
async fn upstream_error_status_becomes_500_json() {
    let h = start(Options {
        scenario: Scenario::Status(429, "{\"error\":\"rate limited\"}"),
        ..Options::default()
    })
    .await;

    let resp = h.chat(json!({ "message": "hi" })).await;
    assert_eq!(resp.status(), 500);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["code"], "upstream_failed");
    assert!(err["error"].as_str().unwrap().len() > 0);
}

#[tokio::test]
async fn failure_before_first_byte_is_500_json() {
    let h = start(Options {
        scenario: Scenario::ChunksThenAbort(vec![": processing\n"]),
        ..Options::default()
    })
    .await;

    let resp = h.chat(json!({ "message": "hi" })).await;
    assert_eq!(resp.status(), 500);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["code"], "upstream_failed");
}

#[tokio::test]
async fn failure_after_first_byte_truncates_stream() {
    let h = start(Options {
        scenario: Scenario::ChunksThenAbort(vec![leak(sse("partial "))]),
        ..Options::default()
    })
    .await;

    let resp = h.chat(json!({ "message": "hi" })).await;
    assert_eq!(resp.status(), 200);
    match resp.bytes().await {
        // Truncated body: either the read fails or it ends after the first delta.
        Ok(bytes) => assert_eq!(bytes, "partial "),
        Err(_) => {}
    }
}

#[tokio::test]
async fn client_disconnect_releases_upstream() {
    let dropped = Arc::new(AtomicBool::new(false));
    let h = start(Options {
        scenario: Scenario::Endless(dropped.clone()),
        ..Options::default()
    })
    .await;

    let mut resp = h.chat(json!({ "message": "keep talking" })).await;
    assert_eq!(resp.status(), 200);
    let first = resp.chunk().await.unwrap().unwrap();
    assert!(first.starts_with(b"x0"), "first chunk: {:?}", first);
    assert!(!dropped.load(Ordering::SeqCst));
    drop(resp);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !dropped.load(Ordering::SeqCst) {
        assert!(
            tokio::time::Instant::now() < deadline,
            "upstream body still open after client disconnect"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn idle_upstream_times_out_with_500() {
    let h = start(Options {
        scenario: Scenario::Hang,
        idle_timeout_secs: 1,
        ..Options::default()
    })
    .await;

    let resp = h.chat(json!({ "message": "hi" })).await;
    assert_eq!(resp.status(), 500);
}

#[tokio::test]
async fn upload_metadata_and_delete_round_trip() {
    let h = start(Options::default()).await;

    let resp = h
        .upload(b"hello world".to_vec(), "greeting.txt", "text/plain")
        .await;
    assert_eq!(resp.status(), 200);
    let receipt: Value = resp.json().await.unwrap();
    assert_eq!(receipt["success"], true);
    assert_eq!(receipt["filename"], "greeting.txt");
    assert_eq!(receipt["size"], 11);
    let id = receipt["fileId"].as_str().unwrap().to_string();
    assert_eq!(h.store.get(&id).unwrap().text, "hello world");
    assert_eq!(h.staged_files(), 0);

    let meta: Value = h
        .client
        .get(h.url(&format!("/api/document/{}", id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(meta["fileId"], id.as_str());
    assert_eq!(meta["filename"], "greeting.txt");
    assert_eq!(meta["size"], 11);
    assert_eq!(meta["mimetype"], "text/plain");
    assert!(meta["uploadDate"].is_string());
    assert!(meta.get("text").is_none());

    let del = h
        .client
        .delete(h.url(&format!("/api/document/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(del.status(), 200);
    let del: Value = del.json().await.unwrap();
    assert_eq!(del["success"], true);

    let again = h
        .client
        .delete(h.url(&format!("/api/document/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), 404);
    let err: Value = again.json().await.unwrap();
    assert_eq!(err["error"], "Document not found");

    let gone = h
        .client
        .get(h.url(&format!("/api/document/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(gone.status(), 404);
}

#[tokio::test]
async fn legacy_word_upload_is_rejected_without_entry() {
    let h = start(Options::default()).await;
    let resp = h
        .upload(
            vec![0xd0, 0xcf, 0x11, 0xe0, 0xa1, 0xb1, 0x1a, 0xe1],
            "old.doc",
            "application/msword",
        )
        .await;
    assert_eq!(resp.status(), 400);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["code"], "unsupported_media_type");
    assert!(err["error"].as_str().unwrap().contains(".docx"));
    assert!(h.store.is_empty());
    assert_eq!(h.staged_files(), 0);
}

#[tokio::test]
async fn disallowed_type_and_missing_file_are_400() {
    let h = start(Options::default()).await;

    let resp = h.upload(vec![0x89, b'P', b'N', b'G'], "cat.png", "image/png").await;
    assert_eq!(resp.status(), 400);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["code"], "unsupported_media_type");

    let resp = h
        .client
        .post(h.url("/api/upload"))
        .multipart(Form::new().text("note", "no file here"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["error"], "No file uploaded");
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn oversized_upload_is_rejected_and_cleaned_up() {
    let h = start(Options {
        max_upload_bytes: 1024,
        ..Options::default()
    })
    .await;

    let resp = h.upload(vec![b'a'; 4096], "big.txt", "text/plain").await;
    assert_eq!(resp.status(), 400);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["code"], "payload_too_large");
    assert!(h.store.is_empty());
    assert_eq!(h.staged_files(), 0);
}

#[tokio::test]
async fn corrupt_docx_is_500_and_cleaned_up() {
    let h = start(Options::default()).await;
    let resp = h
        .upload(
            b"PK but not really a zip".to_vec(),
            "broken.docx",
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        )
        .await;
    assert_eq!(resp.status(), 500);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["code"], "extraction_failed");
    assert!(h.store.is_empty());
    assert_eq!(h.staged_files(), 0);
}

#[tokio::test]
async fn concurrent_uploads_are_isolated() {
    let h = Arc::new(start(Options::default()).await);
    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let h = h.clone();
            tokio::spawn(async move {
                let text = format!("contents of file {}", i);
                let receipt: Value = h
                    .upload(text.clone().into_bytes(), "same-name.txt", "text/plain")
                    .await
                    .json()
                    .await
                    .unwrap();
                (receipt["fileId"].as_str().unwrap().to_string(), text)
            })
        })
        .collect();

    let mut ids = std::collections::HashSet::new();
    for task in tasks {
        let (id, text) = task.await.unwrap();
        assert_eq!(h.store.get(&id).unwrap().text, text);
        ids.insert(id);
    }
    assert_eq!(ids.len(), 8);
}

#[tokio::test]
async fn inquiry_missing_email_is_400_without_send() {
    let h = start(Options::default()).await;
    let resp = h
        .client
        .post(h.url("/api/inquiry-email"))
        .json(&json!({ "name": "Ada", "message": "Pricing?" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["error"], "Name, email, and message are required.");
    assert!(h.inquiry.sent().is_empty());

    let resp = h
        .client
        .post(h.url("/api/inquiry-email"))
        .json(&json!({ "name": "Ada", "email": "ada-at-example", "message": "Pricing?" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["error"], "Invalid email format.");
    assert!(h.inquiry.sent().is_empty());
}

#[tokio::test]
async fn inquiry_with_undeliverable_address_is_400() {
    let h = start(Options::default()).await;
    let resp = h
        .client
        .post(h.url("/api/inquiry-email"))
        .json(&json!({ "name": "Ada", "email": "a<b@c.de", "message": "Pricing?" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["error"], "Invalid email format.");
    assert!(h.inquiry.sent().is_empty());
}

#[tokio::test]
async fn inquiry_is_sent() {
    let h = start(Options::default()).await;
    let resp = h
        .client
        .post(h.url("/api/inquiry-email"))
        .json(&json!({
            "name": "Ada",
            "email": "ada@example.com",
            "company": "Engines Ltd",
            "type": "Sales",
            "message": "Pricing?"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Email sent successfully!");

    let sent = h.inquiry.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "New Inquiry from Ada");
    assert_eq!(sent[0].reply_to.as_deref(), Some("ada@example.com"));
    let MailBody::Html(html) = &sent[0].body else {
        panic!("expected HTML body");
    };
    assert!(html.contains("Engines Ltd"));
    assert!(h.human.sent().is_empty());
}

#[tokio::test]
async fn inquiry_send_failure_is_500() {
    let h = start(Options {
        inquiry: RecordingMailer::failing(),
        ..Options::default()
    })
    .await;
    let resp = h
        .client
        .post(h.url("/api/inquiry-email"))
        .json(&json!({ "name": "Ada", "email": "ada@example.com", "message": "Hi" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["code"], "send_failed");
}

#[tokio::test]
async fn human_response_with_attachment() {
    let h = start(Options::default()).await;
    let form = Form::new()
        .text("name", "Grace")
        .text("email", "grace@example.com")
        .text("phone", "555-0100")
        .text("message", "Please review the attached brief")
        .part(
            "file",
            Part::bytes(b"brief contents".to_vec())
                .file_name("brief.txt")
                .mime_str("text/plain")
                .unwrap(),
        );
    let resp = h
        .client
        .post(h.url("/send-email"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Submitted successfully!");

    let sent = h.human.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0].body,
        MailBody::Text(
            "Name: Grace\nEmail: grace@example.com\nPhone: 555-0100\nMessage: Please review the attached brief"
                .to_string()
        )
    );
    let attachment = sent[0].attachment.as_ref().unwrap();
    assert_eq!(attachment.filename, "brief.txt");
    assert_eq!(attachment.content_type, "text/plain");
    assert_eq!(attachment.bytes, b"brief contents");
}

#[tokio::test]
async fn human_response_missing_field_is_400_without_send() {
    let h = start(Options::default()).await;
    let form = Form::new()
        .text("name", "Grace")
        .text("email", "grace@example.com");
    let resp = h
        .client
        .post(h.url("/send-email"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["error"], "Name, Email, and Message are required fields.");
    assert!(h.human.sent().is_empty());
}
