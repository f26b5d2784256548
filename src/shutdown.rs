//! Shutdown coordination for the two session loops.
//!
//! Either loop may request termination; the other is usually parked inside a
//! blocking read at that moment, so a flag on its own is not enough. The
//! coordinator pairs a write-once atomic flag with a watch channel: the flag
//! is the session termination state, the channel is the cancellation signal
//! that `tokio::select!` races against the blocked operation.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;

/// Lifecycle of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Both loops are live.
    Running,
    /// Termination requested; loops are unwinding.
    Terminating,
    /// Both loops stopped and the channel has been closed.
    Closed,
}

/// Shared termination flag plus cancellation signal.
///
/// The flag transitions false→true at most once per session; the signal
/// fires on that transition and stays observable for late subscribers.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    terminated: AtomicBool,
    tx: watch::Sender<bool>,
}

impl ShutdownCoordinator {
    /// Create a coordinator in the `Running` state.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            terminated: AtomicBool::new(false),
            tx,
        }
    }

    /// Request termination. Idempotent: only the first call transitions the
    /// flag and fires the signal.
    pub fn trigger(&self) {
        if !self.terminated.swap(true, Ordering::SeqCst) {
            let _ = self.tx.send(true);
        }
    }

    /// Current value of the session termination state.
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Resolve once termination has been requested.
    ///
    /// Cancel-safe: intended for use as one arm of a `tokio::select!`.
    /// Resolves immediately if termination was already requested.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Observable lifecycle state. `Closed` is reported by the session
    /// driver once both loops have been joined and the channel released.
    pub fn state(&self, channel_closed: bool) -> SessionState {
        match (self.is_terminated(), channel_closed) {
            (false, _) => SessionState::Running,
            (true, false) => SessionState::Terminating,
            (true, true) => SessionState::Closed,
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn trigger_is_write_once() {
        let coordinator = ShutdownCoordinator::new();
        assert!(!coordinator.is_terminated());

        coordinator.trigger();
        assert!(coordinator.is_terminated());

        // A second trigger changes nothing.
        coordinator.trigger();
        assert!(coordinator.is_terminated());
    }

    #[tokio::test]
    async fn cancelled_resolves_after_trigger() {
        let coordinator = Arc::new(ShutdownCoordinator::new());

        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.cancelled().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        coordinator.trigger();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("cancelled() must resolve once triggered")
            .unwrap();
    }

    #[tokio::test]
    async fn cancelled_resolves_immediately_for_late_subscribers() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.trigger();

        tokio::time::timeout(Duration::from_millis(100), coordinator.cancelled())
            .await
            .expect("late subscriber must observe the signal");
    }

    #[tokio::test]
    async fn state_progression() {
        let coordinator = ShutdownCoordinator::new();
        assert_eq!(coordinator.state(false), SessionState::Running);

        coordinator.trigger();
        assert_eq!(coordinator.state(false), SessionState::Terminating);
        assert_eq!(coordinator.state(true), SessionState::Closed);
    }
}
