//! Terminal process abstraction
//!
//! The registry never touches a PTY directly. It asks a [`TerminalBackend`] to
//! spawn, then talks to the result through [`ProcessHandle`] and two channels:
//! output chunks and a single exit notification.

use crate::config::CommandSpec;
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use happy_types::TermSize;
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};

#[cfg(any(test, feature = "test-support"))]
pub mod memory;
pub mod pty;

pub use pty::PtyBackend;

/// Capacity of the output channel between the reader and the registry
pub const OUTPUT_CHANNEL_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnMode {
    Fresh,
    /// Resume prior context in the same working directory
    Continue,
}

#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub session_id: String,
    pub cwd: PathBuf,
    pub mode: SpawnMode,
    pub command: CommandSpec,
    pub size: TermSize,
}

impl SpawnRequest {
    /// Full argument list for this spawn, continuation flags included.
    pub fn args(&self) -> Vec<String> {
        let mut args = self.command.args.clone();
        if self.mode == SpawnMode::Continue {
            args.extend(self.command.continue_args.iter().cloned());
        }
        args
    }
}

/// A freshly spawned process and its streams
pub struct SpawnedProcess {
    pub handle: Box<dyn ProcessHandle>,
    pub output: mpsc::Receiver<Bytes>,
    /// Fires once with the exit code (if known) when the process is gone
    pub exit: oneshot::Receiver<Option<i32>>,
}

/// Terminal backend for spawning sessions
pub trait TerminalBackend: Send + Sync {
    fn spawn(&self, request: &SpawnRequest) -> Result<SpawnedProcess>;
}

/// Live process owned by exactly one session record
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    fn pid(&self) -> Option<u32>;

    /// Write bytes to the process input
    async fn write(&self, data: &[u8]) -> Result<()>;

    /// Resize the process viewport
    async fn resize(&self, size: TermSize) -> Result<()>;

    /// Terminate the process. Safe to call more than once.
    async fn kill(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_continue_mode_appends_continue_args() {
        let mut request = SpawnRequest {
            session_id: "a1b2c3d4".to_string(),
            cwd: PathBuf::from("/tmp"),
            mode: SpawnMode::Fresh,
            command: CommandSpec {
                program: "claude".to_string(),
                args: vec!["--verbose".to_string()],
                continue_args: vec!["--continue".to_string()],
                env_vars: vec![],
            },
            size: TermSize::default(),
        };
        assert_eq!(request.args(), vec!["--verbose"]);

        request.mode = SpawnMode::Continue;
        assert_eq!(request.args(), vec!["--verbose", "--continue"]);
    }
}
