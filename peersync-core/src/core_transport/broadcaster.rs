//! Event Broadcasting
//!
//! Fans events out to any number of subscribers over unbounded channels.
//! Unlike a `tokio::sync::broadcast` channel a slow subscriber never loses
//! events, which matters for ordered patch streams.
//!
//! Events emitted before anyone subscribed are held back and handed to the
//! first subscriber, so a component attached right after a transport is
//! created still sees the joins and messages that raced it.

use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

struct Inner<T> {
    subscribers: Vec<mpsc::UnboundedSender<T>>,
    /// Events waiting for the first subscriber; `None` once one attached
    backlog: Option<Vec<T>>,
    closed: bool,
}

/// Multi-subscriber event fan-out
pub struct EventBroadcaster<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for EventBroadcaster<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T: Clone + Send + 'static> EventBroadcaster<T> {
    /// Create a broadcaster that drops events while nobody listens
    pub fn new() -> Self {
        Self::with_backlog(false)
    }

    /// Create a broadcaster that keeps events until the first subscriber
    pub fn buffered() -> Self {
        Self::with_backlog(true)
    }

    fn with_backlog(buffered: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                subscribers: Vec::new(),
                backlog: if buffered { Some(Vec::new()) } else { None },
                closed: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Emit an event to all subscribers
    ///
    /// # Returns
    /// Number of subscribers that received the event
    pub fn emit(&self, event: T) -> usize {
        let mut inner = self.lock();
        if inner.closed {
            return 0;
        }
        if inner.subscribers.is_empty() {
            if let Some(backlog) = inner.backlog.as_mut() {
                backlog.push(event);
            }
            return 0;
        }
        inner.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        inner.subscribers.len()
    }

    /// Subscribe to events. Dropping the receiver unsubscribes.
    ///
    /// Subscribing to a closed broadcaster yields a receiver that is
    /// already finished.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        if inner.closed {
            return rx;
        }
        if let Some(backlog) = inner.backlog.take() {
            for event in backlog {
                let _ = tx.send(event);
            }
        }
        inner.subscribers.push(tx);
        rx
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.lock();
        inner.subscribers.retain(|tx| !tx.is_closed());
        inner.subscribers.len()
    }

    /// Drop every subscriber; their receivers finish after draining
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        inner.subscribers.clear();
        inner.backlog = None;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Whether both handles feed the same subscribers
    pub(crate) fn same_channel(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Clone + Send + 'static> Default for EventBroadcaster<T> {
    fn default() -> Self {
        Self::new()
    }
}
