//! Durable snapshot of session identifiers and working directories
//!
//! The file is a single JSON object, `{ "<id>": { "cwd": "<path>" } }`, always
//! rewritten whole: serialize to a sibling temp file, then rename over the
//! previous snapshot.

use crate::{Result, SessionError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name of the snapshot file inside the state directory
pub const STATE_FILE_NAME: &str = "sessions.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSession {
    pub cwd: PathBuf,
}

pub type Snapshot = BTreeMap<String, PersistedSession>;

#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `<state_dir>/sessions.json`
    pub fn in_dir(state_dir: &Path) -> Self {
        Self::new(state_dir.join(STATE_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot. A missing file is an empty snapshot.
    pub async fn read(&self) -> Result<Snapshot> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Snapshot::new()),
            Err(e) => {
                return Err(SessionError::PersistenceRead {
                    path: self.path.clone(),
                    message: e.to_string(),
                })
            }
        };
        if content.trim().is_empty() {
            return Ok(Snapshot::new());
        }
        serde_json::from_str(&content).map_err(|e| SessionError::PersistenceRead {
            path: self.path.clone(),
            message: e.to_string(),
        })
    }

    /// Startup read: any failure is logged and treated as an empty snapshot.
    pub async fn load(&self) -> Snapshot {
        match self.read().await {
            Ok(snapshot) => {
                debug!(
                    "Loaded {} saved sessions from {:?}",
                    snapshot.len(),
                    self.path
                );
                snapshot
            }
            Err(e) => {
                warn!("{}; starting with no saved sessions", e);
                Snapshot::new()
            }
        }
    }

    /// Replace the snapshot on disk.
    pub async fn write(&self, snapshot: &Snapshot) -> Result<()> {
        let content = serde_json::to_string_pretty(snapshot)?;
        let write_err = |source: std::io::Error| SessionError::PersistenceWrite {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
            }
        }

        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, content)
            .await
            .map_err(write_err)?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(write_err)?;
        Ok(())
    }
}
