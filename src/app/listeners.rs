//! Plain subscriber sets.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Handle returned by `add`, used to remove the listener again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

pub struct Listeners<T> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(ListenerId, Callback<T>)>>,
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(Vec::new()),
        }
    }
}

impl<T> Listeners<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().push((id, Arc::new(listener)));
        id
    }

    /// Returns false if no listener with `id` was registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(entry, _)| *entry != id);
        entries.len() != before
    }

    /// Call every listener with `value`.
    ///
    /// Iterates over a snapshot taken before the first call, so listeners
    /// may add or remove listeners (including themselves) while running.
    pub fn notify(&self, value: &T) {
        let snapshot: Vec<Callback<T>> = self.entries.lock().iter().map(|(_, cb)| Arc::clone(cb)).collect();
        for listener in snapshot {
            listener(value);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn test_notify_and_remove() {
        let listeners = Listeners::<u32>::new();
        let total = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&total);
        let id = listeners.add(move |v| {
            counter.fetch_add(*v as usize, Ordering::SeqCst);
        });
        listeners.notify(&2);
        assert!(listeners.remove(id));
        assert!(!listeners.remove(id));
        listeners.notify(&5);

        assert_eq!(total.load(Ordering::SeqCst), 2);
        assert!(listeners.is_empty());
    }

    #[test]
    fn test_listener_can_unsubscribe_itself() {
        let listeners = Arc::new(Listeners::<()>::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));

        let id = {
            let listeners_ref = Arc::downgrade(&listeners);
            let calls = Arc::clone(&calls);
            let slot = Arc::clone(&slot);
            listeners.add(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                if let (Some(listeners), Some(id)) = (listeners_ref.upgrade(), *slot.lock()) {
                    listeners.remove(id);
                }
            })
        };
        *slot.lock() = Some(id);

        listeners.notify(&());
        listeners.notify(&());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
