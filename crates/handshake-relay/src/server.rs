//! HTTP transport for the relay
//!
//! Endpoints:
//! - `/signaling` - addressed relay; `action` plus fields from query and/or body
//! - `/signal` - pairwise relay; POST `type` + `data`, GET polls
//! - `/health` - liveness probe
//!
//! Store access is blocking, so each request's relay work runs on the
//! blocking pool. Requests share nothing but the stores.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{ConnectInfo, RawQuery, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};
use url::form_urlencoded;

use handshake_core::{
    Action, Clock, Config, Envelope, MessageLog, PresenceTable, RelayConfig, SessionState,
    StorageBackend, ValidationError,
};

use crate::error::RelayError;
use crate::mailbox::{AddressedRelay, Params};
use crate::pairwise::PairwiseRelay;
use crate::storage::{JsonFileStore, MemoryStore, SqliteDatabase, StorageError, Store};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub addressed: Arc<AddressedRelay>,
    pub pairwise: Arc<PairwiseRelay>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(
        messages: Arc<dyn Store<MessageLog>>,
        presence: Arc<dyn Store<PresenceTable>>,
        session: Arc<dyn Store<SessionState>>,
        clock: Arc<dyn Clock>,
        config: RelayConfig,
    ) -> Self {
        let pairwise = PairwiseRelay::new(session, config.max_data_bytes);
        let addressed = AddressedRelay::new(messages, presence, clock.clone(), config);
        Self {
            addressed: Arc::new(addressed),
            pairwise: Arc::new(pairwise),
            clock,
        }
    }

    /// Open the configured backend and wire up both relays
    pub fn from_config(config: &Config, clock: Arc<dyn Clock>) -> Result<Self, StorageError> {
        let storage = &config.storage;

        let messages: Arc<dyn Store<MessageLog>>;
        let presence: Arc<dyn Store<PresenceTable>>;
        let session: Arc<dyn Store<SessionState>>;

        match storage.backend {
            StorageBackend::Memory => {
                messages = Arc::new(MemoryStore::<MessageLog>::default());
                presence = Arc::new(MemoryStore::<PresenceTable>::default());
                session = Arc::new(MemoryStore::<SessionState>::default());
            }
            StorageBackend::Json => {
                let dir = &storage.dir;
                messages = Arc::new(JsonFileStore::<MessageLog>::open(
                    dir.join(&storage.messages_file),
                )?);
                presence = Arc::new(JsonFileStore::<PresenceTable>::open(
                    dir.join(&storage.users_file),
                )?);
                session = Arc::new(JsonFileStore::<SessionState>::open(
                    dir.join(&storage.session_file),
                )?);
            }
            StorageBackend::Sqlite => {
                let db = SqliteDatabase::open(storage.dir.join(&storage.database_file))?;
                messages = Arc::new(db.document::<MessageLog>("messages"));
                presence = Arc::new(db.document::<PresenceTable>("active_users"));
                session = Arc::new(db.document::<SessionState>("signal"));
            }
        }

        info!("Using {} storage in {:?}", storage.backend, storage.dir);
        Ok(Self::new(messages, presence, session, clock, config.relay.clone()))
    }
}

/// Build the router with all endpoints
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/signaling", any(signaling_handler))
        .route("/signal", any(signal_handler))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(SetResponseHeaderLayer::overriding(
                    header::CACHE_CONTROL,
                    HeaderValue::from_static("no-cache, must-revalidate"),
                )),
        )
}

/// Relay HTTP server
pub struct RelayServer {
    state: AppState,
}

impl RelayServer {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Serve until Ctrl-C
    pub async fn serve(&self, addr: SocketAddr) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(addr).await?;
        info!("Signal relay listening on {}", addr);

        axum::serve(
            listener,
            self.router().into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested"),
        Err(e) => {
            warn!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

/// Addressed relay endpoint
async fn signaling_handler(
    State(state): State<AppState>,
    method: Method,
    connect: Option<ConnectInfo<SocketAddr>>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if method == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }
    if method != Method::GET && method != Method::POST {
        let envelope = Envelope::error("Method not allowed", json!({}), state.clock.now_secs());
        return (StatusCode::METHOD_NOT_ALLOWED, Json(envelope)).into_response();
    }

    let params = decode_params(decode_query(query.as_deref()), &headers, &body);
    let origin = origin_of(connect);

    let action = params.get("action").map(String::as_str).unwrap_or_default();
    let result = match action.parse::<Action>() {
        Ok(action) => {
            debug!("{} from {}", action, origin);
            let relay = state.addressed.clone();
            run_blocking(move || relay.dispatch(action, &params, &origin)).await
        }
        Err(e) => Err(e.into()),
    };

    let now = state.clock.now_secs();
    match result {
        Ok(reply) => Json(Envelope::ok(reply.message, reply.data, now)).into_response(),
        Err(e) => {
            log_failure(&e);
            let envelope = Envelope::error(e.to_string(), e.details(), now);
            (e.status(), Json(envelope)).into_response()
        }
    }
}

/// Pairwise relay endpoint
async fn signal_handler(
    State(state): State<AppState>,
    method: Method,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let relay = state.pairwise.clone();
    let query = decode_query(query.as_deref());

    if method == Method::OPTIONS {
        StatusCode::OK.into_response()
    } else if method == Method::POST {
        let params = decode_params(query, &headers, &body);
        let kind = params.get("type").cloned();
        let data = params.get("data").cloned();

        match run_blocking(move || relay.submit(kind.as_deref(), data.as_deref())).await {
            Ok(reply) => Json(reply).into_response(),
            Err(e) => bare_error(e),
        }
    } else if method == Method::GET {
        let since = match query.get("since").map(|s| s.trim().parse::<usize>()) {
            None => None,
            Some(Ok(since)) => Some(since),
            Some(Err(_)) => {
                return bare_error(ValidationError::NotAnIndex { field: "since" }.into())
            }
        };

        match run_blocking(move || relay.poll(since)).await {
            Ok(reply) => Json(reply).into_response(),
            Err(e) => bare_error(e),
        }
    } else {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            Json(json!({ "error": "Method not allowed" })),
        )
            .into_response()
    }
}

fn bare_error(e: RelayError) -> Response {
    log_failure(&e);
    (e.status(), Json(json!({ "error": e.to_string() }))).into_response()
}

fn log_failure(e: &RelayError) {
    match e {
        RelayError::Storage { source, .. } => error!("{}: {}", e, source),
        RelayError::Worker => error!("{}", e),
        _ => debug!("Rejected request: {}", e),
    }
}

/// Run relay work on the blocking pool
async fn run_blocking<T, F>(f: F) -> Result<T, RelayError>
where
    F: FnOnce() -> Result<T, RelayError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.unwrap_or_else(|e| {
        error!("Relay worker panicked: {}", e);
        Err(RelayError::Worker)
    })
}

/// Decode a raw query string; undecodable bytes are replaced, never rejected
fn decode_query(raw: Option<&str>) -> Params {
    raw.map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}

/// Query parameters overlaid with body fields (form-urlencoded or JSON object)
fn decode_params(query: HashMap<String, String>, headers: &HeaderMap, body: &[u8]) -> Params {
    let mut params = query;
    if body.is_empty() {
        return params;
    }

    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map_or(false, |ct| ct.starts_with("application/json"));

    if is_json {
        match serde_json::from_slice::<serde_json::Map<String, Value>>(body) {
            Ok(map) => {
                for (key, value) in map {
                    let value = match value {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    params.insert(key, value);
                }
            }
            Err(e) => debug!("Ignoring malformed JSON body: {}", e),
        }
    } else {
        params.extend(form_urlencoded::parse(body).into_owned());
    }

    params
}

fn origin_of(connect: Option<ConnectInfo<SocketAddr>>) -> String {
    connect
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".into())
}
