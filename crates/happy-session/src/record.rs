//! One live session: its process, its clients and its transient flags

use crate::backend::ProcessHandle;
use crate::grace::GraceTimer;
use crate::wait::WaitState;
use crate::{Result, SessionError};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use happy_types::{ServerMessage, TermSize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

/// Control byte written on reconnect to make the program repaint (Ctrl-L)
pub const REDRAW_SEQUENCE: &[u8] = b"\x0c";

/// What a connection receives from its session
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Raw process output
    Output(Bytes),
    Message(ServerMessage),
    /// The session is gone; close the connection
    Close,
}

/// Sending half of one attached connection
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: String,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ClientHandle {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            id: format!("client-{}", Uuid::new_v4()),
            tx,
        };
        (handle, rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Queue a message; false once the connection has gone away.
    pub fn send(&self, msg: Outbound) -> bool {
        self.tx.send(msg).is_ok()
    }
}

pub struct SessionRecord {
    id: String,
    cwd: PathBuf,
    restored: bool,
    created_at: DateTime<Utc>,
    process: Box<dyn ProcessHandle>,
    pub(crate) state: Mutex<RecordState>,
}

#[derive(Default)]
pub(crate) struct RecordState {
    pub(crate) clients: HashMap<String, ClientHandle>,
    pub(crate) wait: WaitState,
    pub(crate) grace: Option<GraceTimer>,
    /// Bumped on every arm so a stale expiry can recognise itself
    pub(crate) grace_generation: u64,
    pub(crate) ever_attached: bool,
    /// Removed from the registry; nothing may attach any more
    pub(crate) closed: bool,
}

impl RecordState {
    pub(crate) fn broadcast(&self, msg: &Outbound) {
        for client in self.clients.values() {
            if !client.send(msg.clone()) {
                debug!("Client {} is gone, skipping", client.id());
            }
        }
    }
}

impl SessionRecord {
    pub(crate) fn new(
        id: String,
        cwd: PathBuf,
        restored: bool,
        process: Box<dyn ProcessHandle>,
    ) -> Self {
        Self {
            id,
            cwd,
            restored,
            created_at: Utc::now(),
            process,
            state: Mutex::new(RecordState::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn restored(&self) -> bool {
        self.restored
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    pub async fn client_count(&self) -> usize {
        self.state.lock().await.clients.len()
    }

    pub async fn is_waiting(&self) -> bool {
        self.state.lock().await.wait.is_waiting()
    }

    /// Message announcing a successful attach
    pub fn session_message(&self) -> ServerMessage {
        ServerMessage::Session {
            id: self.id.clone(),
            restored: self.restored,
            cwd: self.cwd.to_string_lossy().to_string(),
        }
    }

    /// Fan an output chunk out to every client, flagging the idle bell.
    pub(crate) async fn handle_output(&self, chunk: Bytes) {
        let mut state = self.state.lock().await;
        let transition = state.wait.observe_output(&chunk);
        state.broadcast(&Outbound::Output(chunk));
        if let Some(waiting) = transition {
            debug!("Session {} is waiting for input", self.id);
            state.broadcast(&Outbound::Message(ServerMessage::State { waiting }));
        }
    }

    /// Client input. Clears the wait flag before the bytes reach the process.
    ///
    /// The record lock is released before writing, so a process that stops
    /// reading its input only stalls the writer, never the record.
    pub async fn write_input(&self, data: &[u8]) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(SessionError::SessionNotFound(self.id.clone()));
            }
            if let Some(waiting) = state.wait.observe_input() {
                state.broadcast(&Outbound::Message(ServerMessage::State { waiting }));
            }
        }
        self.process.write(data).await
    }

    /// Viewport change. Never counts as input.
    pub async fn resize(&self, size: TermSize) -> Result<()> {
        self.ensure_open().await?;
        self.process.resize(size).await
    }

    async fn ensure_open(&self) -> Result<()> {
        if self.state.lock().await.closed {
            return Err(SessionError::SessionNotFound(self.id.clone()));
        }
        Ok(())
    }

    pub(crate) async fn redraw(&self) {
        if self.ensure_open().await.is_err() {
            return;
        }
        if let Err(e) = self.process.write(REDRAW_SEQUENCE).await {
            debug!("Redraw for session {} failed: {}", self.id, e);
        }
    }

    /// Detach everyone, optionally telling them why, and refuse further attaches.
    pub(crate) async fn close(&self, notice: Option<ServerMessage>) {
        let mut state = self.state.lock().await;
        state.closed = true;
        if let Some(timer) = state.grace.take() {
            timer.cancel();
        }
        if let Some(notice) = notice {
            state.broadcast(&Outbound::Message(notice));
        }
        state.broadcast(&Outbound::Close);
        state.clients.clear();
    }

    pub(crate) async fn kill(&self) {
        if let Err(e) = self.process.kill().await {
            warn!("Failed to kill process for session {}: {}", self.id, e);
        }
    }
}

impl std::fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRecord")
            .field("id", &self.id)
            .field("cwd", &self.cwd)
            .field("restored", &self.restored)
            .field("pid", &self.pid())
            .finish_non_exhaustive()
    }
}
