use crate::dispatch::McpService;
use crate::endpoint::McpEndpoint;
use crate::transport::session::{decode, ReplyFilter};
use crate::{EndpointError, Result};
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use futures::channel::mpsc as reply_channel;
use futures::future;
use futures::stream::{self, Stream, StreamExt};
use rmcp::model::{ClientJsonRpcMessage, ServerJsonRpcMessage};
use rmcp::ServiceExt;
use serde::Deserialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

const SESSION_BUFFER: usize = 64;

#[derive(Clone)]
struct Session {
    inbound: mpsc::Sender<ClientJsonRpcMessage>,
    filter: ReplyFilter,
}

type Sessions = Arc<Mutex<HashMap<String, Session>>>;

#[derive(Clone)]
struct SseState {
    endpoint: Arc<McpEndpoint>,
    sessions: Sessions,
    /// Prefix for the message URL announced to clients.
    base_url: String,
    cancel: CancellationToken,
}

impl SseState {
    fn session(&self, id: &str) -> Option<Session> {
        self.sessions.lock().ok()?.get(id).cloned()
    }
}

// Removes the session and stops its rmcp service when the event stream is
// dropped.
struct SessionGuard {
    id: String,
    sessions: Sessions,
    _stop: DropGuard,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(&self.id);
        }
        debug!(session = %self.id, "sse session closed");
    }
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: String,
}

/// Routes: `GET /sse` opens a session, `POST /message?sessionId=` submits a
/// message whose reply arrives on the session stream, `GET /metrics`.
pub fn router(endpoint: Arc<McpEndpoint>, base_url: &str, cancel: CancellationToken) -> Router {
    let state = SseState {
        endpoint,
        sessions: Arc::new(Mutex::new(HashMap::new())),
        base_url: base_url.trim_end_matches('/').to_string(),
        cancel,
    };

    Router::new()
        .route("/sse", get(open_session))
        .route("/message", post(post_message))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the SSE transport on `addr` until `cancel` fires.
pub async fn serve_sse(
    endpoint: Arc<McpEndpoint>,
    addr: SocketAddr,
    base_url: &str,
    cancel: CancellationToken,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| EndpointError::Bind {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;
    let local = listener.local_addr()?;
    info!(addr = %local, "serving on sse");

    let app = router(endpoint, base_url, cancel.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    info!("sse transport stopped");
    Ok(())
}

async fn open_session(
    State(state): State<SseState>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let id = uuid::Uuid::new_v4().to_string();
    let (inbound_tx, inbound_rx) = mpsc::channel(SESSION_BUFFER);
    let (reply_tx, reply_rx) = reply_channel::channel::<ServerJsonRpcMessage>(SESSION_BUFFER);
    let filter = ReplyFilter::default();
    if let Ok(mut sessions) = state.sessions.lock() {
        sessions.insert(
            id.clone(),
            Session {
                inbound: inbound_tx,
                filter: filter.clone(),
            },
        );
    }

    let stop = state.cancel.child_token();
    let service = McpService::new(Arc::clone(&state.endpoint));
    let session_id = id.clone();
    let session_stop = stop.clone();
    tokio::spawn(async move {
        let transport = (reply_tx, ReceiverStream::new(inbound_rx));
        match service.serve_with_ct(transport, session_stop).await {
            Ok(running) => match running.waiting().await {
                Ok(reason) => debug!(session = %session_id, reason = ?reason, "sse session ended"),
                Err(err) => warn!(session = %session_id, error = %err, "sse session task failed"),
            },
            Err(err) => debug!(session = %session_id, error = %err, "sse session never initialized"),
        }
    });
    debug!(session = %id, "sse session opened");

    let endpoint_event = Event::default()
        .event("endpoint")
        .data(format!("{}/message?sessionId={id}", state.base_url));
    let guard = SessionGuard {
        id,
        sessions: Arc::clone(&state.sessions),
        _stop: stop.drop_guard(),
    };

    let messages = reply_rx
        .filter(move |message| future::ready(filter.admit(message)))
        .map(move |message| {
            let _session = &guard;
            let data = serde_json::to_string(&message).unwrap_or_else(|e| {
                warn!(error = %e, "failed to encode reply");
                "{}".to_string()
            });
            Event::default().event("message").data(data)
        });

    let events = stream::once(async move { endpoint_event })
        .chain(messages)
        .map(Ok::<Event, Infallible>)
        .take_until(state.cancel.cancelled_owned());

    Sse::new(events).keep_alive(KeepAlive::default())
}

async fn post_message(
    State(state): State<SseState>,
    Query(query): Query<MessageQuery>,
    body: String,
) -> Response {
    let Some(session) = state.session(&query.session_id) else {
        return (StatusCode::NOT_FOUND, "unknown session").into_response();
    };
    let Some(message) = decode(&body, &session.filter) else {
        return (StatusCode::BAD_REQUEST, "invalid JSON-RPC message").into_response();
    };
    if session.inbound.send(message).await.is_err() {
        debug!(session = %query.session_id, "session closed before the message was delivered");
        return (StatusCode::GONE, "session closed").into_response();
    }

    StatusCode::ACCEPTED.into_response()
}

async fn metrics(State(state): State<SseState>) -> Response {
    match state.endpoint.render_metrics() {
        Some(text) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
