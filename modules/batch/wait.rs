//! Injected waiting, so polls and propagation delays are cancellable and testable

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::watch;

#[async_trait]
pub trait Waiter: Send + Sync {
    /// Blocks for `duration`. Returns `false` if the wait was cancelled.
    async fn wait(&self, duration: Duration) -> bool;
}

/// Real-time waiter, optionally cancelled through a watch channel
#[derive(Debug, Clone, Default)]
pub struct TokioWaiter {
    cancel: Option<watch::Receiver<bool>>,
}

impl TokioWaiter {
    pub fn new() -> Self {
        Self { cancel: None }
    }

    /// Waits end early (returning `false`) once `true` is sent on the channel
    pub fn cancellable(cancel: watch::Receiver<bool>) -> Self {
        Self { cancel: Some(cancel) }
    }
}

#[async_trait]
impl Waiter for TokioWaiter {
    async fn wait(&self, duration: Duration) -> bool {
        let Some(cancel) = &self.cancel else {
            tokio::time::sleep(duration).await;
            return true;
        };

        let mut cancel = cancel.clone();
        if *cancel.borrow() {
            return false;
        }

        let sleep = tokio::time::sleep(duration);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                changed = cancel.changed() => match changed {
                    Ok(()) if *cancel.borrow() => return false,
                    Ok(()) => continue,
                    // sender gone, nothing can cancel us any more
                    Err(_) => {
                        (&mut sleep).await;
                        return true;
                    }
                },
            }
        }
    }
}

/// Returns immediately and records every requested duration (testing only)
#[cfg(any(test, feature = "test-util"))]
#[derive(Debug, Default)]
pub struct RecordingWaiter {
    waits: std::sync::Mutex<Vec<Duration>>,
    cancel_after: Option<usize>,
}

#[cfg(any(test, feature = "test-util"))]
impl RecordingWaiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports cancellation on the wait after `n` completed waits
    pub fn cancel_after(n: usize) -> Self {
        Self {
            waits: std::sync::Mutex::new(Vec::new()),
            cancel_after: Some(n),
        }
    }

    pub fn waits(&self) -> Vec<Duration> {
        self.waits.lock().unwrap().clone()
    }
}

#[cfg(any(test, feature = "test-util"))]
#[async_trait]
impl Waiter for RecordingWaiter {
    async fn wait(&self, duration: Duration) -> bool {
        let mut waits = self.waits.lock().unwrap();
        if self.cancel_after.is_some_and(|n| waits.len() >= n) {
            return false;
        }
        waits.push(duration);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_tokio_waiter_sleeps_full_duration() {
        let waiter = TokioWaiter::new();
        let start = tokio::time::Instant::now();
        assert!(waiter.wait(Duration::from_secs(30)).await);
        assert!(start.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_waiter_cancellation() {
        let (tx, rx) = watch::channel(false);
        let waiter = TokioWaiter::cancellable(rx);

        let handle = tokio::spawn(async move { waiter.wait(Duration::from_secs(3600)).await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(true).unwrap();

        assert!(!handle.await.unwrap());
    }

    #[tokio::test]
    async fn test_already_cancelled_returns_immediately() {
        let (_tx, rx) = watch::channel(true);
        let waiter = TokioWaiter::cancellable(rx);
        assert!(!waiter.wait(Duration::from_secs(3600)).await);
    }

    #[tokio::test]
    async fn test_recording_waiter() {
        let waiter = RecordingWaiter::cancel_after(2);
        assert!(waiter.wait(Duration::from_secs(1)).await);
        assert!(waiter.wait(Duration::from_secs(2)).await);
        assert!(!waiter.wait(Duration::from_secs(3)).await);
        assert_eq!(waiter.waits(), vec![Duration::from_secs(1), Duration::from_secs(2)]);
    }
}
