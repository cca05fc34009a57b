//! Cancellable background tasks
//!
//! Every timer-driven loop (sync cycle, health ping, discovery window) and
//! every event pump is spawned through a [`TaskGroup`]. Tearing a component
//! down cancels the group's token and joins every task, so nothing keeps
//! firing against a destroyed component.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Lifecycle of a task group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    Running,
    Shutdown,
}

/// Owner of a set of background tasks sharing one cancellation token
pub struct TaskGroup {
    name: String,
    token: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskGroup {
    /// Create an empty group
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            token: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Token cancelled when the group shuts down
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Spawn a future that is dropped as soon as the group is cancelled
    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.token.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = fut => {}
            }
        });
        self.push(handle);
    }

    /// Run `f` every `period`, first after one full period, until cancelled.
    ///
    /// Ticks are never bunched up after a stall: a late tick delays the
    /// following ones instead.
    pub fn spawn_periodic<F, Fut>(&self, period: Duration, mut f: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.token.clone();
        let name = self.name.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => f().await,
                }
            }
            debug!(group = %name, "periodic task stopped");
        });
        self.push(handle);
    }

    fn push(&self, handle: JoinHandle<()>) {
        match self.handles.lock() {
            Ok(mut handles) => handles.push(handle),
            Err(poisoned) => poisoned.into_inner().push(handle),
        }
    }

    /// Current state
    pub fn state(&self) -> GroupState {
        if self.token.is_cancelled() {
            GroupState::Shutdown
        } else {
            GroupState::Running
        }
    }

    /// Number of tasks spawned and not yet joined
    pub fn len(&self) -> usize {
        self.handles.lock().map(|h| h.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel every task and wait for all of them to finish
    pub async fn shutdown(&self) {
        if self.token.is_cancelled() {
            warn!(group = %self.name, "Shutdown already in progress");
        }
        self.token.cancel();

        let handles: Vec<JoinHandle<()>> = match self.handles.lock() {
            Ok(mut handles) => handles.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };
        for handle in handles {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    error!(group = %self.name, "Task panicked during shutdown: {}", e);
                }
            }
        }
        debug!(group = %self.name, "Task group shut down");
    }
}

impl Drop for TaskGroup {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_periodic_task_runs_until_shutdown() {
        let group = TaskGroup::new("test");
        let ticks = Arc::new(AtomicUsize::new(0));

        let counter = ticks.clone();
        group.spawn_periodic(Duration::from_millis(50), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(175)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);

        group.shutdown().await;
        assert_eq!(group.state(), GroupState::Shutdown);
        assert!(group.is_empty());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_spawned_future_is_cancelled() {
        let group = TaskGroup::new("test");
        let finished = Arc::new(AtomicUsize::new(0));

        let flag = finished.clone();
        group.spawn(async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            flag.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(group.len(), 1);

        group.shutdown().await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_drop_cancels_token() {
        let group = TaskGroup::new("test");
        let token = group.token();
        drop(group);
        assert!(token.is_cancelled());
    }
}
