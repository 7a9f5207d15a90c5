//! Small synchronization primitives.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// A manually-reset event flag.
///
/// `set` latches the flag and wakes all waiters; `wait` returns immediately
/// while the flag is latched. Used for tick conflation (a burst of ticks
/// collapses into one latched event) and for the session shutdown signal.
#[derive(Debug, Default)]
pub struct Event {
    flag: AtomicBool,
    notify: Notify,
}

impl Event {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch the flag and wake waiters.
    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Unlatch the flag.
    pub fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Wait until the flag is latched.
    pub async fn wait(&self) {
        loop {
            if self.is_set() {
                return;
            }
            let notified = self.notify.notified();
            // re-check to close the set-before-sleep race
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_wait_returns_when_already_set() {
        let event = Event::new();
        event.set();
        timeout(Duration::from_millis(50), event.wait())
            .await
            .expect("wait should return immediately");
    }

    #[tokio::test]
    async fn test_wait_blocks_until_set() {
        let event = Arc::new(Event::new());
        let waiter = {
            let event = event.clone();
            tokio::spawn(async move { event.wait().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        event.set();
        timeout(Duration::from_millis(200), waiter)
            .await
            .expect("waiter should finish")
            .unwrap();
    }

    #[tokio::test]
    async fn test_clear_blocks_next_wait() {
        let event = Event::new();
        event.set();
        event.clear();
        assert!(!event.is_set());
        let result = timeout(Duration::from_millis(30), event.wait()).await;
        assert!(result.is_err(), "cleared event must block");
    }
}
