//! Graceful shutdown on SIGTERM / SIGINT (Ctrl+C on Windows).
//!
//! [`SigDown`] listens for the signals on a tracked background task and
//! cancels a [`CancellationToken`] when one arrives. Clones of the token go to
//! whatever needs to stop: the HTTP server's graceful shutdown future, and
//! in-flight work that should not start new settlements.

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Shutdown coordinator.
#[allow(missing_debug_implementations)] // TaskTracker doesn't impl Debug
pub struct SigDown {
    tracker: TaskTracker,
    token: CancellationToken,
}

impl SigDown {
    /// Installs the signal handlers.
    ///
    /// # Errors
    ///
    /// Returns an [`std::io::Error`] if a handler cannot be registered.
    #[allow(clippy::unnecessary_wraps)] // only fallible on Unix
    pub fn try_new() -> Result<Self, std::io::Error> {
        let token = CancellationToken::new();
        let tracker = TaskTracker::new();
        let cancel = token.clone();

        #[cfg(unix)]
        {
            let mut sigterm = signal(SignalKind::terminate())?;
            let mut sigint = signal(SignalKind::interrupt())?;
            tracker.spawn(async move {
                tokio::select! {
                    _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down"),
                    _ = sigint.recv() => tracing::info!("Received SIGINT, shutting down"),
                    () = cancel.cancelled() => return,
                }
                cancel.cancel();
            });
        }

        #[cfg(not(unix))]
        {
            tracker.spawn(async move {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => tracing::info!("Received Ctrl-C, shutting down"),
                    () = cancel.cancelled() => return,
                }
                cancel.cancel();
            });
        }

        tracker.close();
        Ok(Self { tracker, token })
    }

    /// A token cancelled once shutdown begins.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Begins shutdown without a signal.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// Waits for shutdown to begin and for the listener task to exit.
    pub async fn recv(&self) {
        self.token.cancelled().await;
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_trigger_cancels_token_and_releases_listener() {
        let sig_down = SigDown::try_new().unwrap();
        let token = sig_down.cancellation_token();
        assert!(!token.is_cancelled());

        sig_down.trigger();
        tokio::time::timeout(Duration::from_secs(5), sig_down.recv())
            .await
            .unwrap();
        assert!(token.is_cancelled());
    }
}
