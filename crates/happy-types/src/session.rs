//! Session listing types for the administrative surface

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a listed session currently lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Live with at least one client
    Attached,
    /// Live, no clients, inside its grace period
    Detached,
    /// Only in the persisted snapshot; resumable
    Saved,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Attached => write!(f, "attached"),
            SessionStatus::Detached => write!(f, "detached"),
            SessionStatus::Saved => write!(f, "saved"),
        }
    }
}

/// One entry of the merged live + persisted listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionListing {
    pub id: String,
    pub status: SessionStatus,
    pub cwd: String,
    #[serde(default)]
    pub clients: usize,
    #[serde(default)]
    pub waiting: bool,
    #[serde(default)]
    pub restored: bool,
    pub pid: Option<u32>,
    pub created_at: Option<DateTime<Utc>>,
}

/// A session terminated by an administrative kill
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KilledSession {
    pub id: String,
    pub pid: Option<u32>,
}
