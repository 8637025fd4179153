//! WebSocket gateway for terminal sessions
//!
//! One connection is one client attached to one session. The query string
//! picks the session:
//! - `list`: reply with every known identifier and close
//! - `id`: attach to that session, restoring it if it was saved
//! - `new`, or no `id`: start a fresh session in `cwd`
//!
//! Text frames that parse as a control message (resize) are handled here;
//! every other text or binary frame is forwarded to the process verbatim.

use crate::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::stream::SplitSink;
use futures::{sink::SinkExt, stream::StreamExt};
use happy_session::{expand_home, ClientHandle, Outbound, SessionError};
use happy_types::{ClientMessage, ServerMessage, TermSize};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Connection query parameters
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    pub id: Option<String>,
    pub cwd: Option<String>,
    pub new: Option<String>,
    pub list: Option<String>,
}

impl ConnectParams {
    pub fn session_id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }

    pub fn cwd(&self) -> Option<PathBuf> {
        self.cwd
            .as_deref()
            .filter(|cwd| !cwd.is_empty())
            .map(expand_home)
    }

    pub fn wants_new(&self) -> bool {
        is_set(&self.new)
    }

    pub fn wants_list(&self) -> bool {
        is_set(&self.list)
    }
}

/// A flag counts as set when present and not `0` or `false`.
fn is_set(flag: &Option<String>) -> bool {
    match flag.as_deref() {
        Some(value) => value != "0" && !value.eq_ignore_ascii_case("false"),
        None => false,
    }
}

pub async fn handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, params, state))
}

async fn handle_socket(socket: WebSocket, params: ConnectParams, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    if params.wants_list() {
        let ids = state.registry.list_ids().await;
        debug!("List request answered with {} sessions", ids.len());
        send_and_close(&mut sender, ServerMessage::List { ids }).await;
        return;
    }

    let cwd = params.cwd();
    let record = match state
        .registry
        .resolve(params.session_id(), cwd.as_deref(), params.wants_new())
        .await
    {
        Ok(record) => record,
        Err(SessionError::SessionNotFound(id)) => {
            send_and_close(&mut sender, ServerMessage::Gone { id }).await;
            return;
        }
        Err(e) => {
            warn!("Could not open session: {}", e);
            let message = e.to_string();
            send_and_close(&mut sender, ServerMessage::Error { message }).await;
            return;
        }
    };

    let (client, mut rx) = ClientHandle::new();
    let client_id = client.id().to_string();
    // Queued before attach so it precedes any output
    client.send(Outbound::Message(record.session_message()));
    if state.registry.attach(&record, client).await.is_err() {
        // Exited between resolve and attach
        let id = record.id().to_string();
        send_and_close(&mut sender, ServerMessage::Gone { id }).await;
        return;
    }
    info!("WebSocket {} attached to session {}", client_id, record.id());

    // Forward session traffic to the socket
    let mut forward_task = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let msg = match outbound {
                Outbound::Output(data) => Message::Binary(data.to_vec()),
                Outbound::Message(msg) => Message::Text(msg.to_json()),
                Outbound::Close => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            };
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    // Handle incoming frames
    loop {
        let msg = tokio::select! {
            _ = &mut forward_task => break,
            msg = receiver.next() => msg,
        };
        let result = match msg {
            Some(Ok(Message::Text(text))) => match ClientMessage::parse(&text) {
                Some(ClientMessage::Resize { cols, rows }) => {
                    record.resize(TermSize { cols, rows }).await
                }
                None => record.write_input(text.as_bytes()).await,
            },
            Some(Ok(Message::Binary(data))) => record.write_input(&data).await,
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => Ok(()),
            Some(Ok(Message::Close(_))) | None => {
                debug!("WebSocket {} closed by client", client_id);
                break;
            }
            Some(Err(e)) => {
                warn!("WebSocket {} error: {}", client_id, e);
                break;
            }
        };
        if let Err(e) = result {
            debug!("Input for session {} dropped: {}", record.id(), e);
        }
    }

    state.registry.detach(&record, &client_id).await;
    forward_task.abort();
    info!("WebSocket {} detached from session {}", client_id, record.id());
}

async fn send_and_close(sender: &mut SplitSink<WebSocket, Message>, msg: ServerMessage) {
    if sender.send(Message::Text(msg.to_json())).await.is_ok() {
        let _ = sender.send(Message::Close(None)).await;
    }
}
