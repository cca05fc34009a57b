//! Async test helpers
//!
//! Everything in the crate hands out `mpsc::UnboundedReceiver`s; these
//! helpers bound every wait so a broken test fails instead of hanging.

use std::future::Future;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Duration, Instant};

/// Default timeout duration for tests (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Short timeout for tests that should fail fast (100ms)
pub const SHORT_TEST_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvTimeoutError {
    Timeout,
    Closed,
}

impl std::fmt::Display for RecvTimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecvTimeoutError::Timeout => write!(f, "receive operation timed out"),
            RecvTimeoutError::Closed => write!(f, "channel closed"),
        }
    }
}

impl std::error::Error for RecvTimeoutError {}

/// Receive one event, giving up after `duration`
pub async fn recv_timeout<T>(
    rx: &mut mpsc::UnboundedReceiver<T>,
    duration: Duration,
) -> Result<T, RecvTimeoutError> {
    timeout(duration, rx.recv())
        .await
        .map_err(|_| RecvTimeoutError::Timeout)?
        .ok_or(RecvTimeoutError::Closed)
}

/// Receive until `pick` accepts an event, skipping the rest
pub async fn recv_matching<T, R>(
    rx: &mut mpsc::UnboundedReceiver<T>,
    duration: Duration,
    mut pick: impl FnMut(T) -> Option<R>,
) -> Result<R, RecvTimeoutError> {
    let deadline = Instant::now() + duration;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let event = recv_timeout(rx, remaining).await?;
        if let Some(found) = pick(event) {
            return Ok(found);
        }
    }
}

/// Drain every event already queued
pub fn try_drain<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Vec<T> {
    let mut results = Vec::new();
    while let Ok(event) = rx.try_recv() {
        results.push(event);
    }
    results
}

/// Let spawned tasks run for `duration` of (possibly paused) time
pub async fn settle(duration: Duration) {
    sleep(duration).await;
}

/// Poll `condition` every few milliseconds until it holds or `duration` passes.
/// Returns whether it held.
pub async fn wait_until<F, Fut>(duration: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + duration;
    loop {
        if condition().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(5)).await;
    }
}
