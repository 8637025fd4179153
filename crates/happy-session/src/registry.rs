//! Session registry - central hub for all live sessions
//!
//! Owns every [`SessionRecord`] and the in-memory copy of the persisted set.
//! The registry map, the persisted set and the shutdown flag share one lock;
//! each record's mutable fields sit behind that record's own lock. Lock order
//! is always registry, then record.
//!
//! Reconciliation with the snapshot file:
//! - `persisted` holds entries loaded at startup that have not been resumed or
//!   deleted yet, plus every live session moved there by shutdown.
//! - Every write is `persisted` overlaid with the live set, so a live session
//!   that dies simply drops out of the next write.

use crate::backend::{SpawnMode, SpawnRequest, SpawnedProcess, TerminalBackend};
use crate::config::RegistryConfig;
use crate::grace::GraceTimer;
use crate::record::{ClientHandle, SessionRecord};
use crate::store::{PersistedSession, Snapshot, StateStore};
use crate::{Result, SessionError};
use happy_types::{KilledSession, ServerMessage, SessionListing, SessionStatus};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Length of minted session identifiers
const ID_LEN: usize = 8;

#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    backend: Arc<dyn TerminalBackend>,
    store: StateStore,
    config: RegistryConfig,
    state: Mutex<RegistryState>,
}

#[derive(Default)]
struct RegistryState {
    live: HashMap<String, Arc<SessionRecord>>,
    persisted: Snapshot,
    shutting_down: bool,
}

impl RegistryState {
    fn is_current(&self, record: &Arc<SessionRecord>) -> bool {
        self.live
            .get(record.id())
            .map_or(false, |live| Arc::ptr_eq(live, record))
    }

    fn snapshot(&self) -> Snapshot {
        let mut snapshot = self.persisted.clone();
        for (id, record) in &self.live {
            snapshot.insert(
                id.clone(),
                PersistedSession {
                    cwd: record.cwd().to_path_buf(),
                },
            );
        }
        snapshot
    }

    fn mint_id(&self) -> String {
        loop {
            let mut id = Uuid::new_v4().simple().to_string();
            id.truncate(ID_LEN);
            if !self.live.contains_key(&id) && !self.persisted.contains_key(&id) {
                return id;
            }
        }
    }
}

impl SessionRegistry {
    pub fn new(
        backend: Arc<dyn TerminalBackend>,
        store: StateStore,
        config: RegistryConfig,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                backend,
                store,
                config,
                state: Mutex::new(RegistryState::default()),
            }),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// Load saved sessions. Unreadable state counts as none.
    pub async fn init(&self) {
        let saved = self.inner.store.load().await;
        let mut state = self.inner.state.lock().await;
        info!(
            "Session registry ready with {} saved sessions ({:?})",
            saved.len(),
            self.inner.store.path()
        );
        state.persisted = saved;
        state.shutting_down = false;
    }

    /// Find, restore or create the session a connection asks for.
    ///
    /// Lookup and insertion happen under one lock, so two connections racing on
    /// the same identifier end up sharing one process.
    pub async fn resolve(
        &self,
        id: Option<&str>,
        cwd_hint: Option<&Path>,
        want_new: bool,
    ) -> Result<Arc<SessionRecord>> {
        let mut state = self.inner.state.lock().await;
        if state.shutting_down {
            return Err(SessionError::ShuttingDown);
        }
        let requested = id.filter(|id| !id.is_empty());

        if let (false, Some(id)) = (want_new, requested) {
            if let Some(record) = state.live.get(id) {
                debug!("Resolved live session {}", id);
                return Ok(record.clone());
            }

            let Some(saved) = state.persisted.get(id).cloned() else {
                info!("Session {} is neither live nor saved", id);
                return Err(SessionError::SessionNotFound(id.to_string()));
            };

            info!("Restoring session {} in {:?}", id, saved.cwd);
            let record = self.spawn_record(
                &mut state,
                id.to_string(),
                saved.cwd,
                SpawnMode::Continue,
            )?;
            state.persisted.remove(id);
            self.persist(&state).await;
            return Ok(record);
        }

        let id = state.mint_id();
        let cwd = cwd_hint
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.inner.config.default_cwd.clone());
        info!("Creating session {} in {:?}", id, cwd);
        let record = self.spawn_record(&mut state, id, cwd, SpawnMode::Fresh)?;
        self.persist(&state).await;
        Ok(record)
    }

    fn spawn_record(
        &self,
        state: &mut RegistryState,
        id: String,
        cwd: PathBuf,
        mode: SpawnMode,
    ) -> Result<Arc<SessionRecord>> {
        let request = SpawnRequest {
            session_id: id.clone(),
            cwd: cwd.clone(),
            mode,
            command: self.inner.config.command.clone(),
            size: self.inner.config.initial_size,
        };
        let SpawnedProcess {
            handle,
            output,
            exit,
        } = self.inner.backend.spawn(&request).map_err(|e| {
            error!("Failed to spawn session {}: {}", id, e);
            e
        })?;

        let record = Arc::new(SessionRecord::new(
            id.clone(),
            cwd,
            mode == SpawnMode::Continue,
            handle,
        ));
        state.live.insert(id, record.clone());
        self.start_pump(&record, output, exit);
        Ok(record)
    }

    /// Pump process output into the record until the process exits.
    fn start_pump(
        &self,
        record: &Arc<SessionRecord>,
        mut output: tokio::sync::mpsc::Receiver<bytes::Bytes>,
        mut exit: tokio::sync::oneshot::Receiver<Option<i32>>,
    ) {
        let registry = self.clone();
        let weak = Arc::downgrade(record);
        tokio::spawn(async move {
            let code = loop {
                tokio::select! {
                    chunk = output.recv() => match chunk {
                        Some(chunk) => {
                            let Some(record) = weak.upgrade() else { return };
                            record.handle_output(chunk).await;
                        }
                        None => break (&mut exit).await.ok().flatten(),
                    },
                    code = &mut exit => break code.ok().flatten(),
                }
            };
            if let Some(record) = weak.upgrade() {
                while let Ok(chunk) = output.try_recv() {
                    record.handle_output(chunk).await;
                }
            }
            registry.on_process_exit(&weak, code).await;
        });
    }

    async fn on_process_exit(&self, record: &Weak<SessionRecord>, code: Option<i32>) {
        let Some(record) = record.upgrade() else {
            return;
        };
        let mut state = self.inner.state.lock().await;
        if !state.is_current(&record) {
            // Killed by the registry; already removed
            return;
        }
        state.live.remove(record.id());
        info!("Session {} process exited (code: {:?})", record.id(), code);
        record
            .close(Some(ServerMessage::Exit {
                id: record.id().to_string(),
                code,
            }))
            .await;
        self.persist(&state).await;
    }

    /// Attach a connection. Disarms any pending grace timer; a reconnect also
    /// gets a delayed redraw nudge.
    pub async fn attach(&self, record: &Arc<SessionRecord>, client: ClientHandle) -> Result<()> {
        let mut state = record.state.lock().await;
        if state.closed {
            return Err(SessionError::SessionNotFound(record.id().to_string()));
        }
        if let Some(timer) = state.grace.take() {
            timer.cancel();
            info!("Client returned to session {}, grace period cancelled", record.id());
        }

        let reconnect = state.ever_attached;
        state.ever_attached = true;
        let client_id = client.id().to_string();
        state.clients.insert(client_id.clone(), client);
        info!(
            "Client {} attached to session {} ({} clients connected)",
            client_id,
            record.id(),
            state.clients.len()
        );

        if reconnect {
            let weak = Arc::downgrade(record);
            let delay = self.inner.config.redraw_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(record) = weak.upgrade() {
                    record.redraw().await;
                }
            });
        }
        Ok(())
    }

    /// Remove a connection. The last one out arms the grace timer.
    pub async fn detach(&self, record: &Arc<SessionRecord>, client_id: &str) {
        let mut state = record.state.lock().await;
        if state.clients.remove(client_id).is_none() || state.closed {
            return;
        }
        debug!(
            "Client {} detached from session {} ({} clients remaining)",
            client_id,
            record.id(),
            state.clients.len()
        );
        if !state.clients.is_empty() {
            return;
        }

        state.grace_generation += 1;
        let generation = state.grace_generation;
        let grace_period = self.inner.config.grace_period;
        let registry = self.clone();
        let weak = Arc::downgrade(record);
        state.grace = Some(GraceTimer::arm(grace_period, async move {
            registry.expire(weak, generation).await;
        }));
        info!(
            "No clients left on session {}, destroying in {:?} unless one returns",
            record.id(),
            grace_period
        );
    }

    async fn expire(&self, record: Weak<SessionRecord>, generation: u64) {
        let Some(record) = record.upgrade() else {
            return;
        };
        let mut state = self.inner.state.lock().await;
        if state.shutting_down || !state.is_current(&record) {
            return;
        }
        {
            let mut record_state = record.state.lock().await;
            if !record_state.clients.is_empty()
                || record_state.grace.is_none()
                || record_state.grace_generation != generation
            {
                debug!("Stale grace expiry for session {} ignored", record.id());
                return;
            }
            record_state.grace = None;
        }

        info!("Grace period expired for session {}, terminating", record.id());
        state.live.remove(record.id());
        record.kill().await;
        record.close(None).await;
        self.persist(&state).await;
    }

    /// Kill and forget a session, live or saved.
    pub async fn destroy(&self, id: &str) -> Result<KilledSession> {
        let mut state = self.inner.state.lock().await;
        if state.shutting_down {
            return Err(SessionError::ShuttingDown);
        }
        let record = state.live.remove(id);
        let was_saved = state.persisted.remove(id).is_some();

        let pid = match record {
            Some(record) => {
                info!("Destroying session {}", id);
                record.kill().await;
                record.close(None).await;
                record.pid()
            }
            None if was_saved => {
                info!("Deleting saved session {}", id);
                None
            }
            None => return Err(SessionError::NotFound(id.to_string())),
        };
        self.persist(&state).await;
        Ok(KilledSession {
            id: id.to_string(),
            pid,
        })
    }

    /// Administrative delete: removes a live or saved session.
    pub async fn delete_by_id(&self, id: &str) -> Result<()> {
        self.destroy(id).await.map(|_| ())
    }

    /// Destroy every live session. Saved sessions are left alone.
    pub async fn kill_all(&self) -> Vec<KilledSession> {
        let mut state = self.inner.state.lock().await;
        if state.shutting_down {
            return Vec::new();
        }
        let mut records: Vec<_> = state.live.drain().map(|(_, record)| record).collect();
        records.sort_by(|a, b| a.id().cmp(b.id()));

        let mut killed = Vec::with_capacity(records.len());
        for record in records {
            record.kill().await;
            record.close(None).await;
            killed.push(KilledSession {
                id: record.id().to_string(),
                pid: record.pid(),
            });
        }
        info!("Killed {} sessions", killed.len());
        self.persist(&state).await;
        killed
    }

    pub async fn get(&self, id: &str) -> Option<Arc<SessionRecord>> {
        self.inner.state.lock().await.live.get(id).cloned()
    }

    /// Live and saved identifiers, sorted
    pub async fn list_ids(&self) -> Vec<String> {
        let state = self.inner.state.lock().await;
        let mut ids: Vec<String> = state
            .live
            .keys()
            .chain(state.persisted.keys())
            .cloned()
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Merged listing with status tags, sorted by id
    pub async fn list_all(&self) -> Vec<SessionListing> {
        // Record locks are taken only after the registry lock is released
        let (live, saved) = {
            let state = self.inner.state.lock().await;
            let live: Vec<_> = state.live.values().cloned().collect();
            let saved: Vec<_> = state
                .persisted
                .iter()
                .filter(|(id, _)| !state.live.contains_key(*id))
                .map(|(id, saved)| (id.clone(), saved.cwd.clone()))
                .collect();
            (live, saved)
        };
        let mut listings = Vec::with_capacity(live.len() + saved.len());

        for record in &live {
            let record_state = record.state.lock().await;
            let clients = record_state.clients.len();
            listings.push(SessionListing {
                id: record.id().to_string(),
                status: if clients > 0 {
                    SessionStatus::Attached
                } else {
                    SessionStatus::Detached
                },
                cwd: record.cwd().to_string_lossy().to_string(),
                clients,
                waiting: record_state.wait.is_waiting(),
                restored: record.restored(),
                pid: record.pid(),
                created_at: Some(record.created_at()),
            });
        }
        for (id, cwd) in saved {
            listings.push(SessionListing {
                id,
                status: SessionStatus::Saved,
                cwd: cwd.to_string_lossy().to_string(),
                clients: 0,
                waiting: false,
                restored: false,
                pid: None,
                created_at: None,
            });
        }

        listings.sort_by(|a, b| a.id.cmp(&b.id));
        listings
    }

    /// Live sessions overlaid on the not-yet-resumed saved set
    pub async fn snapshot_for_persistence(&self) -> Snapshot {
        self.inner.state.lock().await.snapshot()
    }

    /// Write the current snapshot now.
    pub async fn flush(&self) {
        let state = self.inner.state.lock().await;
        self.persist(&state).await;
    }

    /// Save every live session for the next boot, then terminate them.
    /// Returns how many processes were stopped.
    ///
    /// Afterwards the saved set is frozen: resolve and destroy fail with
    /// [`SessionError::ShuttingDown`] and nothing is written again.
    pub async fn shutdown(&self) -> usize {
        let mut state = self.inner.state.lock().await;
        if state.shutting_down {
            return 0;
        }

        let records: Vec<_> = state.live.drain().map(|(_, record)| record).collect();
        for record in &records {
            state.persisted.insert(
                record.id().to_string(),
                PersistedSession {
                    cwd: record.cwd().to_path_buf(),
                },
            );
        }
        self.persist(&state).await;
        state.shutting_down = true;

        for record in &records {
            record.kill().await;
            record.close(None).await;
        }
        info!(
            "Saved and stopped {} sessions for shutdown",
            records.len()
        );
        records.len()
    }

    async fn persist(&self, state: &RegistryState) {
        if state.shutting_down {
            debug!("Registry shut down, snapshot left as saved");
            return;
        }
        let snapshot = state.snapshot();
        match self.inner.store.write(&snapshot).await {
            Ok(()) => debug!("Persisted {} sessions", snapshot.len()),
            // In-memory state stays authoritative until the next successful write
            Err(e) => warn!("{}", e),
        }
    }
}
