//! "Waiting for input" inference from process output
//!
//! Interactive agents ring the terminal bell when they stop and wait on the
//! user. This is a heuristic: a bell printed for any other reason (including
//! the BEL that terminates an OSC title sequence) reads the same way.

/// Marker byte that flags the process as idle
pub const BELL: u8 = 0x07;

/// Wait flag of one session. Transitions are reported so the caller can
/// notify clients exactly once per edge.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WaitState {
    waiting: bool,
}

impl WaitState {
    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    /// Inspect an output chunk. Returns `Some(true)` only on the false -> true edge.
    pub fn observe_output(&mut self, chunk: &[u8]) -> Option<bool> {
        if !self.waiting && chunk.contains(&BELL) {
            self.waiting = true;
            return Some(true);
        }
        None
    }

    /// Input is about to be written. Returns `Some(false)` only if the flag was set.
    pub fn observe_input(&mut self) -> Option<bool> {
        if self.waiting {
            self.waiting = false;
            return Some(false);
        }
        None
    }
}
