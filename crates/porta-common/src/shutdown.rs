//! Cancellation signal shared between a caller and the tasks it starts
//!
//! The caller creates and owns the signal; tasks hold clones and wait on
//! [`ShutdownSignal::cancelled`]. Once fired, a signal stays fired, so a task
//! that subscribes late still observes it.

use std::sync::Arc;

use tokio::sync::watch;

/// Shutdown signal sender and receiver
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    sender: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Trigger shutdown
    pub fn shutdown(&self) {
        self.sender.send_replace(true);
    }

    /// Check if shutdown has been triggered
    pub fn is_shutdown(&self) -> bool {
        *self.sender.borrow()
    }

    /// Wait until shutdown has been triggered
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives as long as `self`, so this only returns once fired
        let _ = receiver.wait_for(|fired| *fired).await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_shutdown_signal() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_shutdown());

        let waiter = signal.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });

        signal.shutdown();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("waiter should wake up")
            .unwrap();
        assert!(signal.is_shutdown());
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_fired_signal() {
        let signal = ShutdownSignal::new();
        signal.shutdown();

        tokio::time::timeout(Duration::from_millis(100), signal.cancelled())
            .await
            .expect("already fired signal should resolve immediately");
    }
}
