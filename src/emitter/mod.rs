//! Emitter - synchronous, string-keyed event dispatch.
//!
//! Listeners are registered per event name and invoked synchronously, in
//! registration order, on the thread that emits. `emit` snapshots the
//! listener list before invoking anything, so a listener may register or
//! remove listeners, or trigger further mutations that emit nested events,
//! without affecting the emission already in flight.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Handle returned by [`Emitter::on`], used to remove the listener again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    event: String,
    id: u64,
}

impl Subscription {
    /// The event name this subscription listens to.
    pub fn event(&self) -> &str {
        &self.event
    }
}

pub struct Emitter<E> {
    listeners: Arc<RwLock<HashMap<String, Vec<(u64, Callback<E>)>>>>,
    next_id: Arc<AtomicU64>,
}

impl<E> Clone for Emitter<E> {
    fn clone(&self) -> Self {
        Emitter {
            listeners: Arc::clone(&self.listeners),
            next_id: Arc::clone(&self.next_id),
        }
    }
}

impl<E> Default for Emitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Emitter<E> {
    pub fn new() -> Self {
        Emitter {
            listeners: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Register a listener for an event name.
    pub fn on<F>(&self, event: impl Into<String>, listener: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let event = event.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        listeners
            .entry(event.clone())
            .or_default()
            .push((id, Arc::new(listener)));
        Subscription { event, id }
    }

    /// Remove a previously registered listener. Returns false when the
    /// subscription was already removed.
    pub fn off(&self, subscription: &Subscription) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(entries) = listeners.get_mut(&subscription.event) {
            let before = entries.len();
            entries.retain(|(id, _)| *id != subscription.id);
            return entries.len() != before;
        }
        false
    }

    /// Invoke every listener registered for `event`, in registration order.
    ///
    /// The registry lock is released before any callback runs, so listeners
    /// may re-enter the emitter freely.
    pub fn emit(&self, event: &str, payload: &E) {
        let snapshot: Vec<Callback<E>> = {
            let listeners = self
                .listeners
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            match listeners.get(event) {
                Some(entries) => entries.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
                None => return,
            }
        };

        for callback in snapshot {
            callback(payload);
        }
    }

    /// Number of listeners currently registered for `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        listeners.get(event).map(Vec::len).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn listeners_run_in_registration_order() {
        let emitter: Emitter<u32> = Emitter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            emitter.on("ping", move |n: &u32| {
                seen.lock().unwrap().push(format!("{}:{}", tag, n));
            });
        }

        emitter.emit("ping", &7);
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["first:7", "second:7", "third:7"]
        );
    }

    #[test]
    fn off_removes_only_the_targeted_listener() {
        let emitter: Emitter<u32> = Emitter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let keep = {
            let seen = Arc::clone(&seen);
            emitter.on("ping", move |_: &u32| seen.lock().unwrap().push("keep"))
        };
        let drop = {
            let seen = Arc::clone(&seen);
            emitter.on("ping", move |_: &u32| seen.lock().unwrap().push("drop"))
        };

        assert!(emitter.off(&drop));
        assert!(!emitter.off(&drop));
        emitter.emit("ping", &1);

        assert_eq!(*seen.lock().unwrap(), vec!["keep"]);
        assert_eq!(keep.event(), "ping");
        assert_eq!(emitter.listener_count("ping"), 1);
    }

    #[test]
    fn unknown_event_is_a_noop() {
        let emitter: Emitter<u32> = Emitter::new();
        emitter.emit("nothing", &0);
        assert_eq!(emitter.listener_count("nothing"), 0);
    }

    #[test]
    fn listener_registered_during_emit_does_not_fire_for_that_emit() {
        let emitter: Emitter<u32> = Emitter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        {
            let emitter2 = emitter.clone();
            let seen = Arc::clone(&seen);
            emitter.on("ping", move |_: &u32| {
                seen.lock().unwrap().push("outer");
                let seen = Arc::clone(&seen);
                emitter2.on("ping", move |_: &u32| {
                    seen.lock().unwrap().push("inner");
                });
            });
        }

        emitter.emit("ping", &1);
        assert_eq!(*seen.lock().unwrap(), vec!["outer"]);

        emitter.emit("ping", &2);
        assert_eq!(*seen.lock().unwrap(), vec!["outer", "outer", "inner"]);
    }
}
