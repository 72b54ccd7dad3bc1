//! Per-connection idle timer and cooperative cancellation. A hand-rolled
//! `Arc<AtomicBool>` token rather than pulling in `tokio-util`'s
//! `CancellationToken` fresh, matching the watch-channel-driven shutdown
//! idiom already used in `session.rs`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

/// A cooperative cancellation flag, cloned and threaded through every
/// pipeline call for one session. Checked at stage boundaries, never inside a
/// stage (spec §5: "pipeline tasks observing cancellation abort at the next
/// checkpoint (between stages)").
#[derive(Clone)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Bail out of the current pipeline stage sequence with `None` if
    /// cancellation fired since the last checkpoint.
    pub fn checkpoint(&self) -> Option<()> {
        if self.is_cancelled() {
            None
        } else {
            Some(())
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Resettable idle timer (spec §4.10: "default 60s, resettable on any inbound
/// frame"). `touch` is cheap (a single atomic-adjacent store via
/// `parking_lot::Mutex<Instant>`) so it can be called from the session's hot
/// receive loop without contention concerns.
pub struct IdleTimer {
    last_activity: parking_lot::Mutex<Instant>,
    timeout: Duration,
}

impl IdleTimer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            last_activity: parking_lot::Mutex::new(Instant::now()),
            timeout,
        }
    }

    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    fn remaining(&self) -> Duration {
        let elapsed = self.last_activity.lock().elapsed();
        self.timeout.saturating_sub(elapsed)
    }

    /// Resolves once `timeout` has elapsed since the most recent `touch`
    /// call, re-checking after every sleep in case of an intervening touch.
    pub async fn wait_for_expiry(&self) {
        loop {
            let remaining = self.remaining();
            if remaining.is_zero() {
                return;
            }
            tokio::time::sleep(remaining).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_is_not_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert_eq!(token.checkpoint(), Some(()));
    }

    #[test]
    fn cancelling_is_visible_on_every_clone() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        assert_eq!(token.checkpoint(), None);
    }

    #[tokio::test]
    async fn idle_timer_expires_after_timeout_without_touch() {
        let timer = IdleTimer::new(Duration::from_millis(20));
        timer.wait_for_expiry().await;
        assert!(timer.remaining().is_zero());
    }

    #[tokio::test]
    async fn touching_resets_the_expiry_window() {
        let timer = IdleTimer::new(Duration::from_millis(50));
        tokio::time::sleep(Duration::from_millis(30)).await;
        timer.touch();
        assert!(!timer.remaining().is_zero());
    }

    /// P7: once a token is cancelled, a checkpoint-gated "pipeline" loop must
    /// stop before producing any further output or reaching a simulated store
    /// write.
    #[test]
    fn cancellation_quiescence_p7() {
        let token = CancellationToken::new();
        let mut emitted = Vec::new();
        let mut wrote_to_store = false;

        for stage in 0..5 {
            if token.checkpoint().is_none() {
                break;
            }
            emitted.push(stage);
            if stage == 2 {
                token.cancel();
            }
        }
        if token.checkpoint().is_some() {
            wrote_to_store = true;
        }

        assert_eq!(emitted, vec![0, 1, 2]);
        assert!(!wrote_to_store);
    }
}
