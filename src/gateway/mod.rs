// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-ConfluenceMcp-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Confluence MCP and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! HTTP+SSE transport for MCP.
//!
//! `GET /mcp` opens an SSE stream whose first event (`endpoint`) tells the client where to POST
//! its JSON-RPC messages (`/messages?sessionId=<id>`). Messages posted there are routed to the
//! session's protocol handler, and every reply travels back down the stream as a `message`
//! event. `GET /health` is an unauthenticated liveness probe.

pub mod auth;
pub mod rate_limit;

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Bytes;
use axum::extract::{ConnectInfo, DefaultBodyLimit, Query, Request, State};
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::middleware;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::channel::mpsc;
use futures::stream::{self, BoxStream};
use futures::{SinkExt, Stream, StreamExt};
use rmcp::model::{ClientJsonRpcMessage, ServerJsonRpcMessage};
use rmcp::{ServerHandler, ServiceExt};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::{CancellationToken, DropGuard};
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{debug, error, info, warn};

use crate::session::{CloseNotifier, SessionId, SessionRegistry};

use self::auth::AuthSettings;
use self::rate_limit::{RateLimitSettings, RateLimitState, RateLimiter};

pub const STREAM_PATH: &str = "/mcp";
pub const MESSAGE_PATH: &str = "/messages";
pub const HEALTH_PATH: &str = "/health";

/// Request bodies above this size are rejected before reaching a handler.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

const INBOUND_BUFFER: usize = 64;
const OUTBOUND_BUFFER: usize = 64;

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub api_key: Option<String>,
    pub rate_limit: RateLimitSettings,
    /// Derive client addresses from `X-Forwarded-For` (deployments behind a proxy).
    pub trust_proxy: bool,
}

/// Stream handle stored in the session registry.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    inbound: mpsc::Sender<ClientJsonRpcMessage>,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

/// Everything the request handlers share. Cloning is cheap.
pub struct AppState<H> {
    handler: H,
    sessions: Arc<SessionRegistry<SessionHandle>>,
    rate_limit: RateLimitState,
    auth: AuthSettings,
    shutdown: CancellationToken,
}

impl<H: Clone> Clone for AppState<H> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
            sessions: self.sessions.clone(),
            rate_limit: self.rate_limit.clone(),
            auth: self.auth.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<H> AppState<H>
where
    H: ServerHandler + Clone + Send + Sync + 'static,
{
    /// Build the gateway context and start the session event loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(handler: H, settings: GatewaySettings) -> Self {
        let (sessions, events) = SessionRegistry::new();
        tokio::spawn(SessionRegistry::run_events(Arc::downgrade(&sessions), events));

        Self {
            handler,
            sessions,
            rate_limit: RateLimitState {
                limiter: Arc::new(RateLimiter::new(settings.rate_limit)),
                trust_proxy: settings.trust_proxy,
            },
            auth: AuthSettings {
                api_key: settings.api_key.map(Arc::from),
                trust_proxy: settings.trust_proxy,
            },
            shutdown: CancellationToken::new(),
        }
    }

    pub fn sessions(&self) -> &SessionRegistry<SessionHandle> {
        &self.sessions
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop accepting streams and close every open session. Returns the number closed.
    pub fn begin_shutdown(&self) -> usize {
        self.shutdown.cancel();
        let closed = self.sessions.drain();
        for session in &closed {
            info!(session = %session.id, "closing session");
            session.stream.close();
        }
        closed.len()
    }
}

/// Best-effort client address used for rate limiting and audit logs.
pub(crate) fn client_address(request: &Request, trust_proxy: bool) -> String {
    if trust_proxy {
        let forwarded = request
            .headers()
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_owned();
        }
    }

    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }

    "unknown".to_owned()
}

pub fn router<H>(state: AppState<H>) -> Router
where
    H: ServerHandler + Clone + Send + Sync + 'static,
{
    let protected = Router::new()
        .route(STREAM_PATH, get(open_stream::<H>))
        .route(MESSAGE_PATH, post(post_message::<H>))
        .route_layer(middleware::from_fn_with_state(state.auth.clone(), auth::require_api_key));

    Router::new()
        .merge(protected)
        .route(HEALTH_PATH, get(health))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(middleware::from_fn_with_state(state.rate_limit.clone(), rate_limit::enforce))
        .layer(security_header(header::X_CONTENT_TYPE_OPTIONS, "nosniff"))
        .layer(security_header(header::X_FRAME_OPTIONS, "DENY"))
        .layer(security_header(header::X_XSS_PROTECTION, "1; mode=block"))
        .layer(security_header(header::REFERRER_POLICY, "strict-origin-when-cross-origin"))
        .layer(security_header(header::CONTENT_SECURITY_POLICY, "default-src 'self'"))
        .with_state(state)
}

fn security_header(
    name: HeaderName,
    value: &'static str,
) -> SetResponseHeaderLayer<HeaderValue> {
    SetResponseHeaderLayer::overriding(name, HeaderValue::from_static(value))
}

/// Serve until `shutdown` resolves, then close every session and drain connections.
pub async fn serve<H, F>(listener: TcpListener, state: AppState<H>, shutdown: F) -> std::io::Result<()>
where
    H: ServerHandler + Clone + Send + Sync + 'static,
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(state.clone());
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!("shutting down server");
            let closed = state.begin_shutdown();
            info!(closed, "server shutdown complete");
        })
        .await
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn open_stream<H>(State(state): State<AppState<H>>) -> Response
where
    H: ServerHandler + Clone + Send + Sync + 'static,
{
    if state.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "Server is shutting down").into_response();
    }

    let (inbound_tx, inbound_rx) = mpsc::channel::<ClientJsonRpcMessage>(INBOUND_BUFFER);
    let (outbound_tx, outbound_rx) = mpsc::channel::<ServerJsonRpcMessage>(OUTBOUND_BUFFER);
    let cancel = state.shutdown.child_token();

    let (session_id, notifier) = state.sessions.create(SessionHandle {
        inbound: inbound_tx,
        cancel: cancel.clone(),
    });

    let handler = state.handler.clone();
    let task_session = session_id.clone();
    let task_cancel = cancel.clone();
    tokio::spawn(async move {
        match handler.serve_with_ct((outbound_tx, inbound_rx), task_cancel).await {
            Ok(running) => match running.waiting().await {
                Ok(_) => debug!(session = %task_session, "protocol handler finished"),
                Err(err) => warn!(session = %task_session, error = %err, "protocol handler panicked"),
            },
            Err(err) => {
                warn!(session = %task_session, error = %err, "protocol handler failed to initialize")
            }
        }
    });

    info!(session = %session_id, "established SSE stream");
    let stream = SessionStream::new(&session_id, outbound_rx, cancel, notifier);
    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

async fn post_message<H>(
    State(state): State<AppState<H>>,
    Query(query): Query<MessageQuery>,
    body: Bytes,
) -> Response
where
    H: ServerHandler + Clone + Send + Sync + 'static,
{
    let Some(session_id) = query.session_id.filter(|id| !id.is_empty()) else {
        warn!("message without sessionId parameter");
        return (StatusCode::BAD_REQUEST, "Missing sessionId parameter").into_response();
    };

    let Some(handle) = state.sessions.lookup(&session_id) else {
        warn!(session = %session_id, "no active session for message");
        return (StatusCode::NOT_FOUND, "Session not found").into_response();
    };

    let message = match serde_json::from_slice::<ClientJsonRpcMessage>(&body) {
        Ok(message) => message,
        Err(err) => {
            debug!(session = %session_id, error = %err, "rejecting malformed message");
            return (StatusCode::BAD_REQUEST, format!("Invalid JSON-RPC message: {err}"))
                .into_response();
        }
    };

    let mut inbound = handle.inbound;
    if inbound.send(message).await.is_err() {
        // The protocol handler is gone; the stream is about to close.
        state.sessions.remove(&session_id);
        return (StatusCode::NOT_FOUND, "Session not found").into_response();
    }

    (StatusCode::ACCEPTED, "Accepted").into_response()
}

/// SSE body for one session. Dropping it (client disconnect) cancels the protocol handler and
/// reports the session as closed.
struct SessionStream {
    events: BoxStream<'static, Result<Event, Infallible>>,
    _cancel_on_drop: DropGuard,
    _close: CloseNotifier,
}

impl SessionStream {
    fn new(
        session_id: &SessionId,
        outbound: mpsc::Receiver<ServerJsonRpcMessage>,
        cancel: CancellationToken,
        close: CloseNotifier,
    ) -> Self {
        let endpoint = Event::default()
            .event("endpoint")
            .data(format!("{MESSAGE_PATH}?sessionId={session_id}"));

        let log_session = session_id.clone();
        let messages = outbound
            .take_until(cancel.clone().cancelled_owned())
            .filter_map(move |message| {
                let event = match serde_json::to_string(&message) {
                    Ok(data) => Some(Ok(Event::default().event("message").data(data))),
                    Err(err) => {
                        error!(session = %log_session, error = %err, "cannot serialize message");
                        None
                    }
                };
                futures::future::ready(event)
            });

        Self {
            events: stream::once(futures::future::ready(Ok(endpoint))).chain(messages).boxed(),
            _cancel_on_drop: cancel.drop_guard(),
            _close: close,
        }
    }
}

impl Stream for SessionStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_next_unpin(cx)
    }
}
