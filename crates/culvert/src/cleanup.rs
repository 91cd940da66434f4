//! Periodic expiry of abandoned calls.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::callback::CallbackRegistry;

/// Runs [`CallbackRegistry::clear_expired`] on a fixed period until dropped.
pub struct Sweeper {
    handle: JoinHandle<()>,
}

impl Sweeper {
    pub fn spawn(callbacks: Arc<CallbackRegistry>, period: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let canceled = callbacks.clear_expired();
                if canceled > 0 {
                    debug!(canceled, "expired pending calls");
                }
            }
        });
        Self { handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ids::CorrelationId;
    use crate::outcome::Outcome;

    #[tokio::test]
    async fn test_sweeper_cancels_expired_calls() {
        let clock = Arc::new(ManualClock::new());
        let callbacks = Arc::new(CallbackRegistry::with_clock(Duration::from_secs(30), clock.clone()));
        let completion = callbacks
            .register_call(CorrelationId::new(), None)
            .expect("register");

        let sweeper = Sweeper::spawn(callbacks.clone(), Duration::from_millis(10));
        clock.advance(Duration::from_secs(30));

        let outcome = tokio::time::timeout(Duration::from_secs(2), completion)
            .await
            .expect("sweeper never ran");
        assert!(matches!(outcome, Outcome::Canceled));
        assert_eq!(callbacks.pending_count(), 0);
        assert!(sweeper.is_running());
    }

    #[tokio::test]
    async fn test_dropping_the_sweeper_stops_it() {
        let clock = Arc::new(ManualClock::new());
        let callbacks = Arc::new(CallbackRegistry::with_clock(Duration::from_secs(1), clock.clone()));
        drop(Sweeper::spawn(callbacks.clone(), Duration::from_millis(5)));
        tokio::task::yield_now().await;

        let _completion = callbacks
            .register_call(CorrelationId::new(), None)
            .expect("register");
        clock.advance(Duration::from_secs(5));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(callbacks.pending_count(), 1);
    }
}
