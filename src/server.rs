//! Web server module for Hermes.
//!
//! Provides the ingestion endpoint, tag queries and the WebSocket used for
//! streaming log queries.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{
        DefaultBodyLimit, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderValue, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

use crate::config::QueryConfig;
use crate::ingest::Ingestor;
use crate::storage::{
    BatchMessage, DriverRegistry, Envelope, LogLevel, QueryOption, StorageError, TagHistory,
    batch_channel, code,
};

// =============================================================================
// Constants
// =============================================================================

/// Value of the `Server` response header.
pub const SERVER_HEADER: &str = concat!("hermes/", env!("CARGO_PKG_VERSION"));

/// Largest accepted WebSocket message.
pub const WS_READ_LIMIT: usize = 32 * 1024;

/// A WebSocket that sends nothing for this long is closed.
pub const WS_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Outbound frames buffered per WebSocket.
pub const WS_SEND_CAPACITY: usize = 256;

const TOPIC_PING: &str = "ping";
const TOPIC_QUERY: &str = "query";
const TOPIC_LOGS: &str = "logs";

// =============================================================================
// State
// =============================================================================

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<DriverRegistry>,
    pub ingestor: Ingestor,
    pub query: QueryConfig,
}

impl AppState {
    pub fn new(registry: Arc<DriverRegistry>, ingestor: Ingestor, query: QueryConfig) -> Self {
        Self {
            registry,
            ingestor,
            query,
        }
    }
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    storage: Option<String>,
}

/// Query parameters carrying a tag.
#[derive(Debug, Deserialize)]
pub struct TagParams {
    pub tag: Option<String>,
}

impl TagParams {
    fn tag(&self) -> Option<&str> {
        self.tag.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }
}

// =============================================================================
// Router
// =============================================================================

/// Create the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    let app_state = Arc::new(state);

    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .route(
            "/api/logs",
            post(collect_handler).layer(DefaultBodyLimit::disable()),
        )
        .route("/api/tags", get(tags_handler))
        .route("/api/tags/history", get(tag_history_handler))
        .route("/ws", get(ws_handler))
        .layer(middleware::map_response(server_header))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

async fn server_header(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(header::SERVER, HeaderValue::from_static(SERVER_HEADER));
    response
}

/// Liveness probe.
async fn healthz_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        storage: None,
    })
}

/// Readiness probe that checks the main storage.
async fn readyz_handler(State(state): State<Arc<AppState>>) -> Response {
    let main = state.registry.main();
    match main.find_all_tags().await {
        Ok(_) => Json(HealthResponse {
            status: "ok".to_string(),
            storage: Some(main.name().to_string()),
        })
        .into_response(),
        Err(err) => {
            tracing::error!(error = %err, driver = %main.name(), "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "not_ready".to_string(),
                    storage: Some(err.to_string()),
                }),
            )
                .into_response()
        }
    }
}

/// Log ingestion endpoint. Acknowledges before the body is processed.
async fn collect_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TagParams>,
    body: Bytes,
) -> &'static str {
    if let Some(tag) = params.tag().map(str::to_string) {
        let ingestor = state.ingestor.clone();
        let body = String::from_utf8_lossy(&body).into_owned();
        tokio::spawn(async move {
            ingestor.ingest(&tag, &body).await;
        });
    }
    "OK"
}

/// All tags known to the main storage.
async fn tags_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.registry.main().find_all_tags().await {
        Ok(tags) => Json(Envelope::ok(tags)).into_response(),
        Err(e) => error_response(e),
    }
}

/// Days holding logs for a tag, newest first.
async fn tag_history_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TagParams>,
) -> Response {
    let Some(tag) = params.tag() else {
        return error_response(StorageError::MissingTag);
    };
    match state.registry.main().find_tag_history(tag).await {
        Ok(history) => Json(Envelope::ok(history)).into_response(),
        Err(e) => error_response(e),
    }
}

fn error_response(err: StorageError) -> Response {
    let code = match &err {
        StorageError::MissingTag | StorageError::InvalidData(_) => code::BAD_REQUEST,
        _ => code::INTERNAL_ERROR,
    };
    if code == code::INTERNAL_ERROR {
        tracing::error!(error = %err, "Storage request failed");
    }
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(Envelope::<TagHistory>::error(code, err.to_string()))).into_response()
}

// =============================================================================
// WebSocket
// =============================================================================

/// Text frame exchanged over `/ws`. `data` is itself JSON text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WsEnvelope {
    pub topic: String,
    #[serde(default)]
    pub data: String,
}

/// Body of a `query` frame.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WsQuery {
    tag: String,
    /// Ordinal or level name.
    level: Option<serde_json::Value>,
    time: WsTimeRange,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WsTimeRange {
    start: Option<i64>,
    end: Option<i64>,
}

/// Parse the `data` of a `query` frame.
///
/// `start` defaults to 0 and `end` to now.
///
/// # Errors
/// `StorageError::Json` for malformed data, `StorageError::MissingTag` for a
/// blank tag.
pub fn parse_query(data: &str, config: &QueryConfig) -> Result<QueryOption, StorageError> {
    let raw: WsQuery = serde_json::from_str(data)?;
    if raw.tag.trim().is_empty() {
        return Err(StorageError::MissingTag);
    }

    let level = match raw.level {
        Some(serde_json::Value::Number(n)) => {
            LogLevel::from_ordinal(n.as_i64().and_then(|v| i32::try_from(v).ok()).unwrap_or(0))
        }
        Some(serde_json::Value::String(name)) => LogLevel::parse_lenient(Some(name.as_str())),
        _ => LogLevel::Trace,
    };
    let start = raw.time.start.unwrap_or(0);
    let end = raw
        .time
        .end
        .filter(|&e| e > 0)
        .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());

    Ok(QueryOption::new(raw.tag.trim())
        .with_level(level)
        .with_range(start, end)
        .with_batch_size(config.batch_size))
}

/// Wrap a batch message in a `logs` frame.
pub fn encode_logs_frame(message: &BatchMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(&WsEnvelope {
        topic: TOPIC_LOGS.to_string(),
        data: serde_json::to_string(message)?,
    })
}

async fn ws_handler(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    ws.max_message_size(WS_READ_LIMIT)
        .max_frame_size(WS_READ_LIMIT)
        .on_upgrade(move |socket| ws_session(socket, state))
}

/// One WebSocket connection: a reader loop here, a writer task, and a
/// producer/forwarder pair per query. Everything stops when the socket does.
async fn ws_session(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(WS_SEND_CAPACITY);
    let cancel = CancellationToken::new();
    tracing::debug!("WebSocket connection opened");

    let writer = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    frame = rx.recv() => match frame {
                        Some(text) => {
                            if sender.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
            let _ = sender.close().await;
        }
    });

    loop {
        let frame = match tokio::time::timeout(WS_IDLE_TIMEOUT, receiver.next()).await {
            Err(_) => {
                tracing::debug!("WebSocket idle timeout");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                tracing::debug!(error = %e, "WebSocket read failed");
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        let text = match frame {
            Message::Text(text) => text.as_str().to_owned(),
            Message::Close(_) => break,
            _ => continue,
        };

        let envelope: WsEnvelope = match serde_json::from_str(&text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, "Unparsable WebSocket frame, closing connection");
                break;
            }
        };

        match envelope.topic.as_str() {
            TOPIC_PING => {
                if tx.send(text).await.is_err() {
                    break;
                }
            }
            TOPIC_QUERY => match parse_query(&envelope.data, &state.query) {
                Ok(query) => spawn_query(&state, query, tx.clone(), cancel.child_token()),
                Err(e) => tracing::warn!(error = %e, "Dropping invalid query"),
            },
            other => tracing::debug!(topic = other, "Ignoring unknown topic"),
        }
    }

    cancel.cancel();
    let _ = writer.await;
    tracing::debug!("WebSocket connection closed");
}

/// Run `query` against the main storage, forwarding frames to `out`.
///
/// Forwarding stops after the first non-200 message, which is still sent.
pub fn spawn_query(
    state: &AppState,
    query: QueryOption,
    out: mpsc::Sender<String>,
    cancel: CancellationToken,
) {
    let (sink, mut stream) = batch_channel(state.query.channel_capacity, cancel);
    let driver = Arc::clone(state.registry.main());

    tokio::spawn(async move {
        if let Err(e) = driver.fetch_log(&query, &sink).await {
            tracing::warn!(error = %e, tag = %query.tag, "Streaming query failed");
        }
    });

    tokio::spawn(async move {
        while let Some(message) = stream.recv().await {
            let last = !message.is_ok();
            match encode_logs_frame(&message) {
                Ok(frame) => {
                    if out.send(frame).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Cannot encode log batch"),
            }
            if last {
                break;
            }
        }
        // Stops the producer if it is still scanning.
        stream.cancel();
    });
}
