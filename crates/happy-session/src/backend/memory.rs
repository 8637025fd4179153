//! Scripted in-memory backend
//!
//! Nothing is spawned; every "process" is a [`MemoryProcess`] that records what
//! it was sent and lets the caller emit output or exit on demand.

use super::{ProcessHandle, SpawnRequest, SpawnedProcess, TerminalBackend, OUTPUT_CHANNEL_CAPACITY};
use crate::{Result, SessionError};
use async_trait::async_trait;
use bytes::Bytes;
use happy_types::TermSize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<BackendState>>,
}

#[derive(Default)]
struct BackendState {
    spawned: Vec<MemoryProcess>,
    next_pid: u32,
    fail_next: bool,
    echo: bool,
    stall_writes: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Processes spawned by this backend echo every write back as output.
    pub fn echoing() -> Self {
        let backend = Self::default();
        backend.lock().echo = true;
        backend
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Processes spawned from now on accept a write and then never finish it,
    /// like a program that stopped reading its input.
    pub fn stall_writes(&self) {
        self.lock().stall_writes = true;
    }

    /// Make the next spawn fail.
    pub fn fail_next_spawn(&self) {
        self.lock().fail_next = true;
    }

    pub fn spawn_count(&self) -> usize {
        self.lock().spawned.len()
    }

    /// All processes spawned so far, oldest first
    pub fn processes(&self) -> Vec<MemoryProcess> {
        self.lock().spawned.clone()
    }

    pub fn last(&self) -> Option<MemoryProcess> {
        self.lock().spawned.last().cloned()
    }
}

impl TerminalBackend for MemoryBackend {
    fn spawn(&self, request: &SpawnRequest) -> Result<SpawnedProcess> {
        let mut state = self.lock();
        if std::mem::take(&mut state.fail_next) {
            return Err(SessionError::Spawn {
                cwd: request.cwd.clone(),
                message: "scripted spawn failure".to_string(),
            });
        }

        state.next_pid += 1;
        let (output_tx, output_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let (exit_tx, exit_rx) = oneshot::channel();
        let process = MemoryProcess {
            request: request.clone(),
            pid: 1000 + state.next_pid,
            echo: state.echo,
            stall: state.stall_writes,
            shared: Arc::new(ProcessState {
                writes: Mutex::new(Vec::new()),
                resizes: Mutex::new(Vec::new()),
                killed: AtomicBool::new(false),
                output_tx,
                exit_tx: Mutex::new(Some(exit_tx)),
            }),
        };
        state.spawned.push(process.clone());

        Ok(SpawnedProcess {
            handle: Box::new(process),
            output: output_rx,
            exit: exit_rx,
        })
    }
}

/// Handle to one scripted process
#[derive(Clone)]
pub struct MemoryProcess {
    pub request: SpawnRequest,
    pub pid: u32,
    echo: bool,
    stall: bool,
    shared: Arc<ProcessState>,
}

struct ProcessState {
    writes: Mutex<Vec<Vec<u8>>>,
    resizes: Mutex<Vec<TermSize>>,
    killed: AtomicBool,
    output_tx: mpsc::Sender<Bytes>,
    exit_tx: Mutex<Option<oneshot::Sender<Option<i32>>>>,
}

impl MemoryProcess {
    /// Emit an output chunk as if the process had printed it.
    pub fn emit(&self, data: &[u8]) {
        let _ = self.shared.output_tx.try_send(Bytes::copy_from_slice(data));
    }

    /// Exit as if the process had terminated on its own.
    pub fn exit(&self, code: Option<i32>) {
        let sender = self
            .shared
            .exit_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(sender) = sender {
            let _ = sender.send(code);
        }
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.shared
            .writes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn resizes(&self) -> Vec<TermSize> {
        self.shared
            .resizes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_killed(&self) -> bool {
        self.shared.killed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessHandle for MemoryProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    async fn write(&self, data: &[u8]) -> Result<()> {
        if self.is_killed() {
            return Err(SessionError::Process("Input channel closed".to_string()));
        }
        self.shared
            .writes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(data.to_vec());
        if self.stall {
            std::future::pending::<()>().await;
        }
        if self.echo {
            self.emit(data);
        }
        Ok(())
    }

    async fn resize(&self, size: TermSize) -> Result<()> {
        self.shared
            .resizes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(size);
        Ok(())
    }

    async fn kill(&self) -> Result<()> {
        if !self.shared.killed.swap(true, Ordering::SeqCst) {
            self.exit(None);
        }
        Ok(())
    }
}
