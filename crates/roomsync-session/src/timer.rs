//! Grace-period timers.
//!
//! One timer per session awaiting reconnection. The timer task races the
//! deadline against a cancel signal: a resume (or room shutdown) cancels
//! it, otherwise the `on_expire` future runs once. Waiting never blocks the
//! room; the room only hears back through whatever `on_expire` does
//! (normally posting a command to the room's own channel).

use std::future::Future;

use roomsync_protocol::SessionId;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Handle to a running grace timer.
///
/// Dropping the handle cancels the timer, same as [`GraceTimer::cancel`].
#[derive(Debug)]
pub struct GraceTimer {
    _cancel: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl GraceTimer {
    /// Spawns a timer that runs `on_expire` at `deadline` unless cancelled
    /// first.
    pub fn start<F>(session_id: SessionId, deadline: Instant, on_expire: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::debug!(%session_id, "grace timer fired");
                    on_expire.await;
                }
                // Resolves on an explicit send or when the handle is dropped.
                _ = cancel_rx => {
                    tracing::debug!(%session_id, "grace timer cancelled");
                }
            }
        });

        Self {
            _cancel: cancel_tx,
            task,
        }
    }

    /// Cancels the timer. A no-op if it already fired.
    pub fn cancel(self) {
        drop(self);
    }

    /// `true` once the timer task has completed (fired or cancelled).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
