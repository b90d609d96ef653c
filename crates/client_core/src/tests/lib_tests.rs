use super::*;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tokio::{net::TcpListener, sync::Mutex};

#[derive(Clone, Default)]
struct FakeWorker {
    titles: Arc<Mutex<Vec<String>>>,
    questions: Arc<Mutex<Vec<String>>>,
}

async fn handle_start() -> Json<serde_json::Value> {
    Json(json!({"status": "started"}))
}

async fn handle_stop() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "audio device busy"})),
    )
}

async fn handle_status() -> Json<serde_json::Value> {
    Json(json!({"is_listening": true, "cheat_sheet_size": 2}))
}

async fn handle_cheat_sheet() -> &'static str {
    "definitely not json"
}

async fn handle_set_title(
    State(state): State<FakeWorker>,
    Json(body): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    let title = body["title"].as_str().unwrap_or_default().to_string();
    state.titles.lock().await.push(title.clone());
    Json(json!({"status": "title set", "title": title}))
}

async fn handle_ask(
    State(state): State<FakeWorker>,
    Json(body): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    let question = body["question"].as_str().unwrap_or_default().to_string();
    state.questions.lock().await.push(question);
    Json(json!({"answer": "Arthur is the king of Camelot."}))
}

async fn spawn_worker_server() -> (String, FakeWorker) {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let state = FakeWorker::default();
    let app = Router::new()
        .route("/start", post(handle_start))
        .route("/stop", post(handle_stop))
        .route("/status", get(handle_status))
        .route("/cheat_sheet", get(handle_cheat_sheet))
        .route("/set_title", post(handle_set_title))
        .route("/ask_llm", post(handle_ask))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), state)
}

async fn unreachable_base_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    format!("http://{addr}")
}

fn client_for(base_url: &str) -> HttpControlClient {
    HttpControlClient::with_base_url(base_url, Duration::from_secs(2)).expect("client")
}

#[tokio::test]
async fn start_decodes_status_payload() {
    let (base_url, _) = spawn_worker_server().await;
    let ack = client_for(&base_url).start().await.expect("start");
    assert_eq!(ack.status, "started");
}

#[tokio::test]
async fn non_success_status_carries_code_and_body() {
    let (base_url, _) = spawn_worker_server().await;
    let err = client_for(&base_url).stop().await.expect_err("must fail");
    match &err {
        ControlError::Status { status, body } => {
            assert_eq!(*status, 500);
            assert!(body.contains("audio device busy"), "unexpected body: {body}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(
        err.api_error().map(|api| api.message),
        Some("audio device busy".to_string())
    );
}

#[tokio::test]
async fn connection_refused_is_a_transport_failure() {
    let base_url = unreachable_base_url().await;
    let err = client_for(&base_url).start().await.expect_err("must fail");
    assert!(err.is_transport(), "unexpected error: {err:?}");
}

#[tokio::test]
async fn slow_activation_times_out() {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let app = Router::new().route(
        "/start",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Json(json!({"status": "started"}))
        }),
    );
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let client =
        HttpControlClient::with_base_url(format!("http://{addr}"), Duration::from_millis(100))
            .expect("client");
    let err = client.start().await.expect_err("must time out");
    assert_eq!(err, ControlError::Timeout);
}

#[tokio::test]
async fn status_reads_listening_flag() {
    let (base_url, _) = spawn_worker_server().await;
    let status = client_for(&base_url).status().await;
    assert!(status.is_listening);
    assert_eq!(status.cheat_sheet_size, Some(2));
    assert!(!status.is_degraded());
}

#[tokio::test]
async fn status_degrades_to_not_listening_when_unreachable() {
    let base_url = unreachable_base_url().await;
    let status = client_for(&base_url).status().await;
    assert!(!status.is_listening);
    assert!(status.is_degraded());
}

#[tokio::test]
async fn malformed_cheat_sheet_degrades_to_empty() {
    let (base_url, _) = spawn_worker_server().await;
    let entities = client_for(&base_url).fetch_entities().await;
    assert!(entities.is_empty());
}

#[tokio::test]
async fn set_title_posts_trimmed_title() {
    let (base_url, state) = spawn_worker_server().await;
    let ack = client_for(&base_url)
        .set_title("  The Once and Future King  ")
        .await
        .expect("set title");
    assert!(ack.success);
    assert_eq!(ack.title.as_deref(), Some("The Once and Future King"));
    assert_eq!(
        state.titles.lock().await.as_slice(),
        ["The Once and Future King".to_string()]
    );
}

#[tokio::test]
async fn empty_title_is_rejected_locally() {
    let (base_url, state) = spawn_worker_server().await;
    let err = client_for(&base_url)
        .set_title("   ")
        .await
        .expect_err("must reject");
    assert!(matches!(err, ControlError::Rejected(_)));
    assert!(state.titles.lock().await.is_empty());
}

#[tokio::test]
async fn ask_returns_answer() {
    let (base_url, state) = spawn_worker_server().await;
    let answer = client_for(&base_url)
        .ask("Who is Arthur?")
        .await
        .expect("ask");
    assert_eq!(answer, "Arthur is the king of Camelot.");
    assert_eq!(state.questions.lock().await.len(), 1);
}

#[test]
fn title_ack_honours_explicit_success_flag() {
    let ack = title_ack_from_reply(&json!({"success": false})).expect("ack");
    assert!(!ack.success);

    let err = title_ack_from_reply(&json!(["not", "an", "object"])).expect_err("malformed");
    assert!(matches!(err, ControlError::Malformed(_)));
}
