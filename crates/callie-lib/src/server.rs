//! HTTP + WebSocket surface for interactive calls.
//!
//! `POST /outbound-call` answers the vendor's webhook with a relay document
//! pointing back at `GET /ws`; each socket there is one conversation.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use callie_core::speech::{relay_document, safe_voice};
use callie_core::types::{RelayInbound, RelayOutbound};
use callie_core::{CallieError, Result};

use crate::config::Config;
use crate::context::{build_system_prompt, ContextSource};
use crate::llm::Backends;
use crate::registry::SessionRegistry;
use crate::session::{ConversationSession, SessionControl, SessionSettings};

/// Shared state behind every route.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub backends: Backends,
    pub context: Arc<dyn ContextSource>,
    pub sessions: SessionRegistry,
}

impl AppState {
    pub fn new(config: Config, backends: Backends, context: Arc<dyn ContextSource>) -> Self {
        Self {
            config: Arc::new(config),
            backends,
            context,
            sessions: SessionRegistry::new(),
        }
    }

    fn settings(&self) -> SessionSettings {
        SessionSettings {
            max_tokens: self.config.llm.max_tokens,
            hangup_delay: Duration::from_millis(self.config.llm.hangup_delay_ms),
        }
    }
}

/// Build the axum router. Serve it with
/// `into_make_service_with_connect_info::<SocketAddr>()`; the relay socket
/// records the peer address.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/outbound-call", post(outbound_call))
        .route("/ws", get(relay_socket))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(state: AppState) -> Result<()> {
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let public = state.config.server.public_url.clone();

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| CallieError::config(format!("failed to bind {addr}: {e}")))?;
    info!("callie relay server listening on {addr}");
    match public {
        Some(url) => info!("webhook: {}/outbound-call", url.trim_end_matches('/')),
        None => warn!("PUBLIC_URL not set; calls cannot reach this server"),
    }

    axum::serve(listener, router(state).into_make_service_with_connect_info::<SocketAddr>())
        .await
        .map_err(|e| CallieError::config(format!("server error: {e}")))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Health {
    status: &'static str,
    service: &'static str,
    active_sessions: usize,
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        service: "callie",
        active_sessions: state.sessions.len(),
    })
}

async fn outbound_call(State(state): State<AppState>) -> Response {
    let ws_url = match state.config.relay_ws_url() {
        Ok(url) => url,
        Err(e) => {
            error!("cannot answer call: {e}");
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    };
    let call = &state.config.call;
    let doc = relay_document(
        &ws_url,
        &safe_voice(Some(&call.relay_voice)),
        &call.transcription_provider,
    );
    info!("call connected, starting relay -> {ws_url}");
    ([(header::CONTENT_TYPE, "text/xml")], doc).into_response()
}

async fn relay_socket(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| run_session(state, socket, remote))
}

async fn run_session(state: AppState, socket: WebSocket, remote: SocketAddr) {
    let id = state.sessions.register(Some(remote));
    info!(session = %id, "relay socket connected from {remote}");

    let summary = state.context.summary().await;
    let system = match build_system_prompt(&state.config, &summary, Utc::now()) {
        Ok(s) => s,
        Err(e) => {
            error!(session = %id, "cannot build system prompt: {e}");
            state.sessions.remove(&id);
            return;
        }
    };
    debug!(session = %id, "system prompt built, context loaded");

    let (sink, mut stream) = socket.split();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (close_tx, close_rx) = oneshot::channel();
    let mut writer = tokio::spawn(write_outbound(sink, out_rx, close_rx));

    let mut session = ConversationSession::new(system, state.backends.clone(), state.settings(), out_tx);
    let mut close_tx = Some(close_tx);
    let mut queued: VecDeque<RelayInbound> = VecDeque::new();
    let mut writer_done = false;

    'session: loop {
        let msg = match queued.pop_front() {
            Some(msg) => msg,
            None => {
                let frame = tokio::select! {
                    frame = stream.next() => frame,
                    _ = &mut writer => {
                        writer_done = true;
                        break;
                    }
                };
                match inbound(frame, &id) {
                    Inbound::Message(msg) => msg,
                    Inbound::Skip => continue,
                    Inbound::Closed => break,
                }
            }
        };

        // Frames keep being read while a turn streams, so `end` or a
        // disconnect cuts the reply short.
        let turn = session.handle(msg);
        tokio::pin!(turn);
        loop {
            tokio::select! {
                control = &mut turn => {
                    if control == SessionControl::Close {
                        close_socket(&mut close_tx);
                        break 'session;
                    }
                    break;
                }
                frame = stream.next() => match inbound(frame, &id) {
                    Inbound::Message(RelayInbound::End) => {
                        info!(session = %id, "end received mid-reply; dropping the rest");
                        close_socket(&mut close_tx);
                        break 'session;
                    }
                    Inbound::Message(msg) => queued.push_back(msg),
                    Inbound::Skip => {}
                    Inbound::Closed => {
                        info!(session = %id, "peer left mid-reply");
                        break 'session;
                    }
                },
                _ = &mut writer, if !writer_done => {
                    writer_done = true;
                    break 'session;
                }
            }
        }
    }

    drop(session);
    // Writer stops on its own once every sender is gone or a close was requested.
    if !writer_done {
        let _ = writer.await;
    }
    state.sessions.remove(&id);
    info!(session = %id, "relay socket closed");
}

enum Inbound {
    Message(RelayInbound),
    Skip,
    Closed,
}

fn inbound(frame: Option<std::result::Result<Message, axum::Error>>, id: &Uuid) -> Inbound {
    let text = match frame {
        Some(Ok(Message::Text(text))) => text,
        Some(Ok(Message::Close(_))) | None => return Inbound::Closed,
        Some(Ok(_)) => return Inbound::Skip,
        Some(Err(e)) => {
            warn!(session = %id, "socket error: {e}");
            return Inbound::Closed;
        }
    };
    match serde_json::from_str(text.as_str()) {
        Ok(msg) => Inbound::Message(msg),
        Err(e) => {
            debug!(session = %id, "ignoring unparseable frame: {e}");
            Inbound::Skip
        }
    }
}

fn close_socket(close_tx: &mut Option<oneshot::Sender<()>>) {
    if let Some(tx) = close_tx.take() {
        let _ = tx.send(());
    }
}

/// Serialize outbound messages onto the socket. A close request wins over
/// anything still queued.
async fn write_outbound<S>(
    mut sink: S,
    mut rx: mpsc::UnboundedReceiver<RelayOutbound>,
    mut close_rx: oneshot::Receiver<()>,
) where
    S: futures_util::Sink<Message> + Unpin,
{
    loop {
        let msg = tokio::select! {
            biased;
            _ = &mut close_rx => {
                let _ = sink.send(Message::Close(None)).await;
                return;
            }
            msg = rx.recv() => msg,
        };
        let Some(msg) = msg else {
            let _ = sink.close().await;
            return;
        };
        let json = match serde_json::to_string(&msg) {
            Ok(json) => json,
            Err(e) => {
                error!("cannot encode outbound message: {e}");
                continue;
            }
        };
        if sink.send(Message::Text(json.into())).await.is_err() {
            // Peer gone; later messages are dropped.
            return;
        }
    }
}
