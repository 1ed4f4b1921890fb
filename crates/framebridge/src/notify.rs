//! Coalescing wake-up from the capture thread to the consumer.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::Notify;

/// "A new frame is available" signal with at most one pending wake.
///
/// Any number of `signal` calls made before the consumer reacts collapse
/// into a single wake. The signal carries no payload; the frame itself
/// travels through the [`FrameSlot`](crate::FrameSlot).
#[derive(Debug, Default)]
pub struct NotificationBridge {
    notify: Notify,
    closed: AtomicBool,
    signals: AtomicU64,
    wakes: AtomicU64,
}

impl NotificationBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark work pending. Never blocks; safe to call from any thread.
    pub fn signal(&self) {
        self.signals.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_one();
    }

    /// Wait for the next wake.
    ///
    /// Returns `false` once the bridge is closed.
    pub async fn wait(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        self.notify.notified().await;
        if self.is_closed() {
            return false;
        }
        self.wakes.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Close the bridge and wake a waiting consumer so it can exit.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Total `signal` calls
    pub fn signals(&self) -> u64 {
        self.signals.load(Ordering::Relaxed)
    }

    /// Wakes observed by the consumer
    pub fn wakes(&self) -> u64 {
        self.wakes.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::time::timeout;

    #[tokio::test]
    async fn test_rapid_signals_coalesce_into_one_wake() {
        let bridge = NotificationBridge::new();
        for _ in 0..10 {
            bridge.signal();
        }

        assert!(bridge.wait().await);
        assert!(timeout(Duration::from_millis(50), bridge.wait()).await.is_err());
        assert_eq!(bridge.signals(), 10);
        assert_eq!(bridge.wakes(), 1);
    }

    #[tokio::test]
    async fn test_signal_from_other_thread_wakes_consumer() {
        let bridge = Arc::new(NotificationBridge::new());
        let producer = bridge.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            producer.signal();
        });

        let woke = timeout(Duration::from_secs(2), bridge.wait()).await;
        assert_eq!(woke, Ok(true));
    }

    #[tokio::test]
    async fn test_close_releases_waiter() {
        let bridge = Arc::new(NotificationBridge::new());
        let waiter = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        bridge.close();

        let result = timeout(Duration::from_secs(2), waiter).await.unwrap().unwrap();
        assert!(!result);
        assert!(!bridge.wait().await);
    }
}
