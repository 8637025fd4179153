//! Happy Session - persistent terminal sessions shared by many clients
//!
//! A session is one long-lived pseudo-terminal process. Clients attach and
//! detach freely; the process survives short disconnections for a grace
//! period, and its identifier and working directory are saved to disk so a
//! server restart can resume it.
//!
//! - [`SessionRegistry`] resolves, creates, restores and destroys sessions
//! - [`SessionRecord`] fans process output out to attached clients
//! - [`StateStore`] keeps the on-disk snapshot
//! - [`backend`] abstracts the process host

pub mod backend;
pub mod config;
pub mod error;
pub mod grace;
pub mod record;
pub mod registry;
pub mod store;
pub mod wait;

pub use backend::{PtyBackend, SpawnMode, SpawnRequest, TerminalBackend};
pub use config::{expand_home, CommandSpec, RegistryConfig};
pub use error::{Result, SessionError};
pub use record::{ClientHandle, Outbound, SessionRecord};
pub use registry::SessionRegistry;
pub use store::{PersistedSession, Snapshot, StateStore};
