//! End-to-end relay behavior over the HTTP router

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;
use url::form_urlencoded;

use handshake_core::{
    Config, ManualClock, MessageLog, PresenceTable, RelayConfig, SessionState, StorageBackend,
};
use handshake_relay::{router, AppState, MemoryStore, StorageError, Store};

const T0: u64 = 1_700_000_000;

fn memory_app() -> (Router, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(T0));
    let state = AppState::new(
        Arc::new(MemoryStore::<MessageLog>::default()),
        Arc::new(MemoryStore::<PresenceTable>::default()),
        Arc::new(MemoryStore::<SessionState>::default()),
        clock.clone(),
        RelayConfig::default(),
    );
    (router(state), clock)
}

/// Message store whose writes fail while `failing` is set
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore<MessageLog>,
    failing: AtomicBool,
}

impl Store<MessageLog> for FlakyStore {
    fn read(&self) -> Result<MessageLog, StorageError> {
        self.inner.read()
    }

    fn update(&self, f: &mut dyn FnMut(&mut MessageLog)) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Io(io::Error::new(io::ErrorKind::Other, "disk full")));
        }
        self.inner.update(f)
    }

    fn is_writable(&self) -> bool {
        !self.failing.load(Ordering::SeqCst)
    }

    fn describe(&self) -> String {
        "flaky".into()
    }
}

fn form(pairs: &[(&str, &str)]) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

fn post(uri: &str, pairs: &[(&str, &str)]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form(pairs)))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

async fn send(app: &Router, from: &str, to: &str, kind: &str, data: &str) -> Value {
    let (status, body) = call(
        app,
        post(
            "/signaling",
            &[("action", "send"), ("from", from), ("to", to), ("type", kind), ("data", data)],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    body
}

async fn receive(app: &Router, to: &str) -> Vec<Value> {
    let (status, body) = call(app, get(&format!("/signaling?action=receive&to={}", to))).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    body["data"]["messages"].as_array().unwrap().clone()
}

#[tokio::test]
async fn test_send_receive_delivers_once() {
    let (app, _clock) = memory_app();

    let sent = send(&app, "alice", "bob", "offer", r#"{"sdp":"x"}"#).await;
    assert_eq!(sent["success"], true);
    assert_eq!(sent["message"], "Message sent successfully");
    assert_eq!(sent["data"]["message_count"], 1);
    assert!(sent["data"]["message_id"].as_str().unwrap().starts_with("msg_"));
    assert_eq!(sent["timestamp"], T0);

    let messages = receive(&app, "bob").await;
    assert_eq!(messages.len(), 1);
    let msg = &messages[0];
    assert_eq!(msg["type"], "offer");
    assert_eq!(msg["from"], "alice");
    assert_eq!(msg["to"], "bob");
    assert_eq!(msg["id"], sent["data"]["message_id"]);
    let data: Value = serde_json::from_str(msg["data"].as_str().unwrap()).unwrap();
    assert_eq!(data, json!({"sdp": "x"}));
    assert!(msg.get("origin").is_none());
    assert!(msg.get("created_at").is_none());

    assert!(receive(&app, "bob").await.is_empty());
}

#[tokio::test]
async fn test_pairwise_offer_answer_reset() {
    let (app, _clock) = memory_app();

    let (status, body) = call(&app, post("/signal", &[("type", "offer"), ("data", r#"{"sdp":"o"}"#)])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true}));

    call(&app, post("/signal", &[("type", "answer"), ("data", r#"{"sdp":"a"}"#)])).await;

    let (_, poll) = call(&app, get("/signal")).await;
    assert_eq!(poll["offer"], json!({"sdp": "o"}));
    assert_eq!(poll["answer"], json!({"sdp": "a"}));

    let (status, body) = call(&app, post("/signal", &[("type", "reset")])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true, "message": "Reset successful"}));

    let (_, poll) = call(&app, get("/signal")).await;
    assert_eq!(poll, json!({"offer": null, "answer": null, "candidate": null}));
}

#[tokio::test]
async fn test_pairwise_candidates() {
    let (app, _clock) = memory_app();

    for c in ["c1", "c2", "c3"] {
        let data = json!({ "candidate": c }).to_string();
        call(&app, post("/signal", &[("type", "candidate"), ("data", &data)])).await;
    }

    let (_, poll) = call(&app, get("/signal")).await;
    assert_eq!(poll["candidate"], json!({"candidate": "c3"}));
    assert!(poll.get("candidates").is_none());

    let (_, poll) = call(&app, get("/signal?since=1")).await;
    assert_eq!(poll["candidates"], json!([{"candidate": "c2"}, {"candidate": "c3"}]));
    assert_eq!(poll["next"], 3);

    let (status, body) = call(&app, get("/signal?since=-1")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("since"));
}

#[tokio::test]
async fn test_pairwise_errors() {
    let (app, _clock) = memory_app();

    let (status, body) = call(&app, post("/signal", &[("data", "{}")])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"error": "Missing type"}));

    let (status, _) = call(&app, post("/signal", &[("type", "offer")])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&app, post("/signal", &[("type", "hangup"), ("data", "{}")])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let req = Request::builder().method("DELETE").uri("/signal").body(Body::empty()).unwrap();
    let (status, body) = call(&app, req).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body, json!({"error": "Method not allowed"}));
}

#[tokio::test]
async fn test_size_cap_over_http() {
    let (app, _clock) = memory_app();

    for i in 0..1001 {
        send(&app, "alice", &format!("peer{}", i), "offer", "{}").await;
    }

    let (_, status) = call(&app, get("/signaling?action=status")).await;
    assert_eq!(status["data"]["message_count"], 1000);

    assert!(receive(&app, "peer0").await.is_empty());
    assert_eq!(receive(&app, "peer1000").await.len(), 1);
}

#[tokio::test]
async fn test_presence_expires_after_ttl() {
    let (app, clock) = memory_app();

    let (status, body) = call(&app, post("/signaling", &[("action", "register"), ("userId", "carol")])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!({"userId": "carol", "registered": true}));

    clock.set(T0 + 59);
    let (_, status) = call(&app, get("/signaling?action=status")).await;
    assert_eq!(status["data"]["active_users"], 1);
    let (_, users) = call(&app, get("/signaling?action=users")).await;
    assert_eq!(users["data"]["users"], json!([{"id": "carol", "last_seen": T0}]));

    clock.set(T0 + 61);
    let (_, status) = call(&app, get("/signaling?action=status")).await;
    assert_eq!(status["data"]["active_users"], 0);
    let (_, users) = call(&app, get("/signaling?action=users")).await;
    assert_eq!(users["data"]["count"], 0);
}

#[tokio::test]
async fn test_cleanup_and_clear() {
    let (app, clock) = memory_app();
    send(&app, "alice", "bob", "offer", "{}").await;

    clock.advance(300);
    let (_, body) = call(&app, post("/signaling", &[("action", "cleanup")])).await;
    assert_eq!(
        body["data"],
        json!({
            "messages_removed": 1,
            "users_removed": 1,
            "messages_remaining": 0,
            "users_remaining": 0
        })
    );

    send(&app, "alice", "bob", "offer", "{}").await;
    let (_, body) = call(&app, post("/signaling", &[("action", "clear")])).await;
    assert_eq!(body["message"], "All data cleared");
    assert!(receive(&app, "bob").await.is_empty());
}

#[tokio::test]
async fn test_addressed_errors() {
    let (app, _clock) = memory_app();

    let (status, body) = call(&app, get("/signaling?action=dance")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Invalid or missing action parameter");
    assert!(body["data"]["valid_actions"]["receive"].is_string());

    let (status, body) = call(&app, get("/signaling")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["data"]["valid_actions"].is_object());

    let (status, body) = call(
        &app,
        post(
            "/signaling",
            &[("action", "send"), ("from", "alice"), ("to", "bob"), ("type", "offer"), ("data", "{x")],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid JSON format in data field");

    let (status, body) = call(&app, get("/signaling?action=receive")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Field 'to' is required");

    let req = Request::builder().method("PUT").uri("/signaling").body(Body::empty()).unwrap();
    let (status, body) = call(&app, req).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_json_request_body() {
    let (app, _clock) = memory_app();

    let req = Request::builder()
        .method("POST")
        .uri("/signaling?action=send")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({"from": "alice", "to": "bob", "type": "candidate", "data": {"c": 1}}).to_string(),
        ))
        .unwrap();
    let (status, _) = call(&app, req).await;
    assert_eq!(status, StatusCode::OK);

    let messages = receive(&app, "bob").await;
    assert_eq!(messages[0]["data"], r#"{"c":1}"#);
}

#[tokio::test]
async fn test_options_and_headers() {
    let (app, _clock) = memory_app();

    let req = Request::builder().method("OPTIONS").uri("/signaling").body(Body::empty()).unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    assert!(bytes.is_empty());

    let resp = app.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(header::CACHE_CONTROL).unwrap(),
        "no-cache, must-revalidate"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_json_backend_concurrent_sends() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.storage.backend = StorageBackend::Json;
    config.storage.dir = dir.path().join("storage");

    let state = AppState::from_config(&config, Arc::new(handshake_core::SystemClock)).unwrap();
    let app = router(state);

    let tasks: Vec<_> = (0..40)
        .map(|i| {
            let app = app.clone();
            tokio::spawn(async move {
                let data = json!({ "n": i }).to_string();
                send(&app, &format!("sender{}", i), "bob", "candidate", &data).await;
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    // A second relay over the same files sees every message
    let state = AppState::from_config(&config, Arc::new(handshake_core::SystemClock)).unwrap();
    let app = router(state);
    assert_eq!(receive(&app, "bob").await.len(), 40);
    assert!(dir.path().join("storage").join("active_users.json").exists());
}

#[tokio::test]
async fn test_sqlite_backend() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.storage.backend = StorageBackend::Sqlite;
    config.storage.dir = dir.path().to_path_buf();

    let state = AppState::from_config(&config, Arc::new(handshake_core::SystemClock)).unwrap();
    let app = router(state);

    send(&app, "alice", "bob", "offer", "{}").await;
    call(&app, post("/signal", &[("type", "offer"), ("data", "{}")])).await;

    let (_, status) = call(&app, get("/signaling?action=status")).await;
    assert_eq!(status["data"]["storage_writable"], true);
    assert_eq!(receive(&app, "bob").await.len(), 1);
    assert!(dir.path().join("relay.db").exists());
}

#[tokio::test]
async fn test_store_failure_returns_500_envelope() {
    let messages = Arc::new(FlakyStore::default());
    let state = AppState::new(
        messages.clone(),
        Arc::new(MemoryStore::<PresenceTable>::default()),
        Arc::new(MemoryStore::<SessionState>::default()),
        Arc::new(ManualClock::new(T0)),
        RelayConfig::default(),
    );
    let app = router(state);

    send(&app, "alice", "bob", "offer", "{}").await;

    messages.failing.store(true, Ordering::SeqCst);
    let (status, body) = call(
        &app,
        post(
            "/signaling",
            &[("action", "send"), ("from", "alice"), ("to", "bob"), ("type", "answer"), ("data", "{}")],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Failed to save message");
    assert_eq!(body["data"], json!({}));
    assert!(!body.to_string().contains("disk full"));

    messages.failing.store(false, Ordering::SeqCst);
    let (status, body) = call(&app, get("/signaling?action=status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["message_count"], 1);

    let delivered = receive(&app, "bob").await;
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0]["type"], "offer");
}

#[tokio::test]
async fn test_undecodable_query_still_gets_envelope() {
    let (app, _clock) = memory_app();

    let (status, body) = call(&app, get("/signaling?action=status&junk=%ff%fe&flag")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Server status OK");

    let (status, body) = call(&app, get("/signal?since=0&junk=%ff")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["candidates"], json!([]));
}

#[tokio::test]
async fn test_pairwise_null_payload_rejected() {
    let (app, _clock) = memory_app();

    let (status, body) = call(&app, post("/signal", &[("type", "offer"), ("data", "null")])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"error": "Field 'data' is required"}));

    let (_, poll) = call(&app, get("/signal")).await;
    assert_eq!(poll, json!({"offer": null, "answer": null, "candidate": null}));
}
