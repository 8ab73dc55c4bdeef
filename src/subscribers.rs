// Ordered subscriber registry shared by the state machine and the refresh coordinator
//
// Callbacks are snapshotted before every notification pass, so a callback that unsubscribes
// (itself or another) during a pass still sees the current pass and misses the next one.

use std::sync::{Arc, Mutex, Weak};

struct Registry<F: ?Sized> {
    next_id: u64,
    entries: Vec<(u64, Arc<F>)>,
}

/// Ordered list of callbacks of type `F` (usually a `dyn Fn(..) + Send + Sync`).
pub struct SubscriberList<F: ?Sized> {
    inner: Arc<Mutex<Registry<F>>>,
}

impl<F: ?Sized> Default for SubscriberList<F> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Registry {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }
}

impl<F: ?Sized + Send + Sync + 'static> SubscriberList<F> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback at the end of the list.
    pub fn subscribe(&self, callback: Arc<F>) -> Subscription {
        let mut registry = lock(&self.inner);
        let id = registry.next_id;
        registry.next_id += 1;
        registry.entries.push((id, callback));

        let weak: Weak<Mutex<Registry<F>>> = Arc::downgrade(&self.inner);
        Subscription {
            id,
            remove: Arc::new(move |id| {
                if let Some(inner) = weak.upgrade() {
                    lock(&inner).entries.retain(|(entry_id, _)| *entry_id != id);
                }
            }),
        }
    }

    /// Copy of the current callbacks in subscription order.
    pub fn snapshot(&self) -> Vec<Arc<F>> {
        lock(&self.inner)
            .entries
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        lock(&self.inner).entries.clear();
    }
}

fn lock<F: ?Sized>(inner: &Mutex<Registry<F>>) -> std::sync::MutexGuard<'_, Registry<F>> {
    // Callbacks never run under this lock.
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle returned by `subscribe`. Dropping it does NOT unsubscribe.
#[derive(Clone)]
pub struct Subscription {
    id: u64,
    remove: Arc<dyn Fn(u64) + Send + Sync>,
}

impl Subscription {
    /// Remove the callback. Idempotent; safe to call from inside a notification.
    pub fn unsubscribe(&self) {
        (self.remove)(self.id);
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    type Callback = dyn Fn(&str) + Send + Sync;

    #[test]
    fn test_snapshot_preserves_subscription_order() {
        let list: SubscriberList<Callback> = SubscriberList::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for name in ["a", "b", "c"] {
            let seen = Arc::clone(&seen);
            list.subscribe(Arc::new(move |event: &str| {
                seen.lock().unwrap().push(format!("{name}:{event}"));
            }));
        }

        for callback in list.snapshot() {
            callback("x");
        }

        assert_eq!(*seen.lock().unwrap(), vec!["a:x", "b:x", "c:x"]);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let list: SubscriberList<Callback> = SubscriberList::new();
        let subscription = list.subscribe(Arc::new(|_: &str| {}));
        list.subscribe(Arc::new(|_: &str| {}));

        subscription.unsubscribe();
        subscription.unsubscribe();

        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_unsubscribe_after_list_dropped_is_noop() {
        let list: SubscriberList<Callback> = SubscriberList::new();
        let subscription = list.subscribe(Arc::new(|_: &str| {}));
        drop(list);

        subscription.unsubscribe();
    }
}
