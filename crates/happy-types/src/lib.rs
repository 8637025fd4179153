//! Happy Types - wire definitions for the session gateway
//!
//! Pure data types with no async runtime dependencies, shared by the server
//! and anything that talks to it.

pub mod message;
pub mod session;

pub use message::*;
pub use session::*;

use serde::{Deserialize, Serialize};

/// Terminal viewport dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermSize {
    pub cols: u16,
    pub rows: u16,
}

impl Default for TermSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}
