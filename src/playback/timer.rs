//! One-slot cancelable reconnection timer

use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::state::MAX_RECONNECT_ATTEMPTS;

struct Pending {
    generation: u64,
    cancel: CancellationToken,
}

/// Holds at most one outstanding reconnection wait plus the attempt counter.
///
/// Expiry is reported as a generation number on `due_tx`. The owner must call
/// [`take_if_current`](Self::take_if_current) before acting on it: a wait
/// that was cancelled or replaced after its sleep finished is rejected there,
/// so cancellation always wins over a racing expiry.
pub(crate) struct ReconnectTimer {
    slot: Option<Pending>,
    generation: u64,
    attempts: u32,
    due_tx: mpsc::UnboundedSender<u64>,
}

impl ReconnectTimer {
    pub fn new(due_tx: mpsc::UnboundedSender<u64>) -> Self {
        Self {
            slot: None,
            generation: 0,
            attempts: 0,
            due_tx,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_pending(&self) -> bool {
        self.slot.is_some()
    }

    /// Count one more attempt. `None` once the limit is exceeded.
    pub fn next_attempt(&mut self) -> Option<u32> {
        self.attempts = self.attempts.saturating_add(1);
        (self.attempts <= MAX_RECONNECT_ATTEMPTS).then_some(self.attempts)
    }

    /// Start a wait of `delay`, replacing any outstanding one
    pub fn schedule(&mut self, delay: Duration) -> u64 {
        self.cancel();
        self.generation += 1;
        let generation = self.generation;
        let cancel = CancellationToken::new();

        let token = cancel.clone();
        let due_tx = self.due_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = due_tx.send(generation);
                }
            }
        });

        self.slot = Some(Pending { generation, cancel });
        generation
    }

    /// Cancel the outstanding wait, keeping the attempt counter
    pub fn cancel(&mut self) {
        if let Some(pending) = self.slot.take() {
            debug!(generation = pending.generation, "Reconnect wait cancelled");
            pending.cancel.cancel();
        }
    }

    /// Cancel the outstanding wait and reset the attempt counter
    pub fn reset(&mut self) {
        self.cancel();
        self.attempts = 0;
    }

    /// Claim an expiry. False if `generation` is no longer the live wait.
    pub fn take_if_current(&mut self, generation: u64) -> bool {
        match &self.slot {
            Some(pending) if pending.generation == generation => {
                self.slot = None;
                true
            }
            _ => false,
        }
    }
}

impl Drop for ReconnectTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_limit() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut timer = ReconnectTimer::new(tx);
        for expected in 1..=MAX_RECONNECT_ATTEMPTS {
            assert_eq!(timer.next_attempt(), Some(expected));
        }
        assert_eq!(timer.next_attempt(), None);

        timer.reset();
        assert_eq!(timer.attempts(), 0);
        assert_eq!(timer.next_attempt(), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_is_delivered() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = ReconnectTimer::new(tx);

        let generation = timer.schedule(Duration::from_millis(3000));
        assert_eq!(rx.recv().await, Some(generation));
        assert!(timer.take_if_current(generation));
        assert!(!timer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_suppresses_expiry() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = ReconnectTimer::new(tx);

        timer.schedule(Duration::from_millis(3000));
        timer.cancel();

        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_wins_over_racing_expiry() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = ReconnectTimer::new(tx);

        let generation = timer.schedule(Duration::ZERO);
        // The expiry reaches the queue before the owner gets to it
        let due = rx.recv().await.unwrap();
        assert_eq!(due, generation);

        timer.cancel();
        assert!(!timer.take_if_current(due));
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_replaces_previous_wait() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = ReconnectTimer::new(tx);

        let first = timer.schedule(Duration::from_millis(1000));
        let second = timer.schedule(Duration::from_millis(2000));

        assert_eq!(rx.recv().await, Some(second));
        assert!(!timer.take_if_current(first));
        assert!(timer.take_if_current(second));
    }
}
