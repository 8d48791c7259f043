//! Per-instance observer registry shared by every subject in the crate.

use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use parking_lot::Mutex;

/// Ordered set of observers keyed by allocation identity.
///
/// Notification iterates a snapshot taken when the round starts, so observers
/// may register or remove observers (including themselves) from inside a
/// callback. A panicking observer is logged and skipped; the remaining
/// observers still receive the notification.
pub struct ObserverSet<T: ?Sized> {
    label: &'static str,
    observers: Mutex<Vec<Arc<T>>>,
}

impl<T: ?Sized> ObserverSet<T> {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Adds `observer` unless the same allocation is already registered.
    /// Returns `true` if the set changed.
    pub fn register(&self, observer: Arc<T>) -> bool {
        let mut observers = self.observers.lock();
        if observers.iter().any(|existing| Arc::ptr_eq(existing, &observer)) {
            return false;
        }
        observers.push(observer);
        tracing::debug!(subject = self.label, count = observers.len(), "observer registered");
        true
    }

    /// Removes `observer` if present. Returns `true` if the set changed.
    pub fn remove(&self, observer: &Arc<T>) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|existing| !Arc::ptr_eq(existing, observer));
        let removed = observers.len() != before;
        if removed {
            tracing::debug!(subject = self.label, count = observers.len(), "observer removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.observers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.observers.lock().clone()
    }

    /// Delivers `deliver` to every observer registered when the call started.
    pub fn notify<F>(&self, event: &'static str, mut deliver: F)
    where
        F: FnMut(&T),
    {
        for observer in self.snapshot() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| deliver(&observer)));
            if let Err(payload) = outcome {
                tracing::warn!(
                    subject = self.label,
                    event,
                    reason = panic_message(payload.as_ref()),
                    "observer panicked during notification"
                );
            }
        }
    }
}

impl<T: ?Sized> fmt::Debug for ObserverSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverSet")
            .field("label", &self.label)
            .field("observers", &self.len())
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
