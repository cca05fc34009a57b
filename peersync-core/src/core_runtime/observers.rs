//! Observer registry
//!
//! Callbacks are invoked one by one, each inside `catch_unwind`: a panicking
//! observer is logged and skipped, the rest still run, and the caller's
//! bookkeeping carries on untouched.

use crate::core_diff::{Patch, Value};
use crate::core_transport::PeerId;
use crate::metrics::{record_counter, OBSERVER_FAILURES};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::error;

type ChangeFn = Arc<dyn Fn(&Value) + Send + Sync>;
type PatchFn = Arc<dyn Fn(&[Patch]) + Send + Sync>;
type EventFn = Arc<dyn Fn(&PeerId, &Value) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    change: Vec<(u64, ChangeFn)>,
    patch: Vec<(u64, PatchFn)>,
    event: Vec<(u64, String, EventFn)>,
}

impl Registry {
    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Every observer registered on one runtime
#[derive(Clone, Default)]
pub(crate) struct Observers {
    inner: Arc<Mutex<Registry>>,
}

/// Handle returned by every `on_*` registration
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    /// Remove the observer. A no-op once the runtime is destroyed.
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            let mut registry = lock(&registry);
            registry.change.retain(|(id, _)| *id != self.id);
            registry.patch.retain(|(id, _)| *id != self.id);
            registry.event.retain(|(id, _, _)| *id != self.id);
        }
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    match registry.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn isolate(kind: &str, f: impl FnOnce()) {
    if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(f)) {
        record_counter(OBSERVER_FAILURES, 1);
        error!(observer = kind, "observer panicked: {}", panic_message(&*panic));
    }
}

impl Observers {
    fn subscription(&self, id: u64) -> Subscription {
        Subscription { id, registry: Arc::downgrade(&self.inner) }
    }

    pub fn on_change<F>(&self, f: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let mut registry = lock(&self.inner);
        let id = registry.allocate();
        registry.change.push((id, Arc::new(f)));
        self.subscription(id)
    }

    pub fn on_patch<F>(&self, f: F) -> Subscription
    where
        F: Fn(&[Patch]) + Send + Sync + 'static,
    {
        let mut registry = lock(&self.inner);
        let id = registry.allocate();
        registry.patch.push((id, Arc::new(f)));
        self.subscription(id)
    }

    pub fn on_event<F>(&self, name: String, f: F) -> Subscription
    where
        F: Fn(&PeerId, &Value) + Send + Sync + 'static,
    {
        let mut registry = lock(&self.inner);
        let id = registry.allocate();
        registry.event.push((id, name, Arc::new(f)));
        self.subscription(id)
    }

    pub fn has_patch_observers(&self) -> bool {
        !lock(&self.inner).patch.is_empty()
    }

    // Callbacks are collected first so none runs under the registry lock.

    pub fn notify_change(&self, state: &Value) {
        let callbacks: Vec<ChangeFn> = lock(&self.inner).change.iter().map(|(_, f)| f.clone()).collect();
        for f in callbacks {
            isolate("change", || f(state));
        }
    }

    pub fn notify_patches(&self, patches: &[Patch]) {
        let callbacks: Vec<PatchFn> = lock(&self.inner).patch.iter().map(|(_, f)| f.clone()).collect();
        for f in callbacks {
            isolate("patch", || f(patches));
        }
    }

    pub fn dispatch_event(&self, name: &str, from: &PeerId, payload: &Value) {
        let callbacks: Vec<EventFn> = lock(&self.inner)
            .event
            .iter()
            .filter(|(_, event, _)| event == name)
            .map(|(_, _, f)| f.clone())
            .collect();
        for f in callbacks {
            isolate("event", || f(from, payload));
        }
    }

    pub fn clear(&self) {
        let mut registry = lock(&self.inner);
        registry.change.clear();
        registry.patch.clear();
        registry.event.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_panicking_observer_does_not_block_others() {
        let observers = Observers::default();
        let calls = Arc::new(AtomicUsize::new(0));

        observers.on_change(|_| panic!("render failed"));
        let counter = calls.clone();
        observers.on_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        observers.notify_change(&json!({}));
        observers.notify_change(&json!({}));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsubscribe_removes_only_that_observer() {
        let observers = Observers::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = calls.clone();
        let subscription = observers.on_patch(move |_| {
            first.fetch_add(1, Ordering::SeqCst);
        });
        let second = calls.clone();
        observers.on_patch(move |_| {
            second.fetch_add(10, Ordering::SeqCst);
        });

        subscription.unsubscribe();
        observers.notify_patches(&[]);
        assert_eq!(calls.load(Ordering::SeqCst), 10);
        assert!(observers.has_patch_observers());
    }

    #[test]
    fn test_events_dispatch_by_name() {
        let observers = Observers::default();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        observers.on_event("chat".into(), move |from, payload| {
            sink.lock().unwrap().push((from.clone(), payload.clone()));
        });

        observers.dispatch_event("chat", &"bob".into(), &json!("hi"));
        observers.dispatch_event("emote", &"bob".into(), &json!("wave"));

        assert_eq!(*seen.lock().unwrap(), vec![(PeerId::from("bob"), json!("hi"))]);
    }

    #[test]
    fn test_clear_and_late_unsubscribe() {
        let observers = Observers::default();
        let subscription = observers.on_change(|_| {});
        observers.clear();
        subscription.unsubscribe();

        let dropped = Observers::default();
        let subscription = dropped.on_change(|_| {});
        drop(dropped);
        subscription.unsubscribe();
    }
}
