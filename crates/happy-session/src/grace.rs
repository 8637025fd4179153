//! Deferred destruction after the last client leaves

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One armed grace period.
///
/// Owned by the record it guards; dropping it cancels it. The expiry future
/// runs only if the delay elapses first, and it must still re-check the
/// record's clients itself, because an attach may race the timer.
#[derive(Debug)]
pub struct GraceTimer {
    token: CancellationToken,
}

impl GraceTimer {
    /// Run `on_expiry` after `delay` unless cancelled first.
    pub fn arm<F>(delay: Duration, on_expiry: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep(delay) => on_expiry.await,
            }
        });
        Self { token }
    }

    /// Cancel without side effects. Safe to call any number of times.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for GraceTimer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
