//! Waker fan-out for streams polled on behalf of several consumers.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::Waker;

use futures_util::task::{self, ArcWake};

/// Consumer wakers keyed by consumer id.
///
/// Used as the waker of a shared source: when the source makes progress,
/// every registered consumer is woken.
pub(crate) struct WakerSet<K> {
    wakers: Mutex<HashMap<K, Waker>>,
}

impl<K: Eq + Hash + Clone> WakerSet<K> {
    pub(crate) fn new() -> Self {
        Self {
            wakers: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn register(&self, key: &K, waker: &Waker) {
        let mut wakers = self.lock();
        match wakers.get_mut(key) {
            Some(existing) if existing.will_wake(waker) => {}
            Some(existing) => existing.clone_from(waker),
            None => {
                wakers.insert(key.clone(), waker.clone());
            }
        }
    }

    pub(crate) fn unregister(&self, key: &K) {
        self.lock().remove(key);
    }

    /// Wakes every consumer except `key`.
    pub(crate) fn wake_others(&self, key: &K) {
        for (k, waker) in self.lock().iter() {
            if k != key {
                waker.wake_by_ref();
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Waker>> {
        self.wakers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K> WakerSet<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// A waker that wakes the whole set.
    pub(crate) fn waker(self: &Arc<Self>) -> Waker {
        task::waker(Arc::clone(self))
    }
}

impl<K> ArcWake for WakerSet<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn wake_by_ref(arc_self: &Arc<Self>) {
        for waker in arc_self.lock().values() {
            waker.wake_by_ref();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Counter(AtomicUsize);

    impl ArcWake for Counter {
        fn wake_by_ref(arc_self: &Arc<Self>) {
            arc_self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_set_waker_wakes_every_registered_consumer() {
        let a = Arc::new(Counter(AtomicUsize::new(0)));
        let b = Arc::new(Counter(AtomicUsize::new(0)));
        let set = Arc::new(WakerSet::new());
        set.register(&"a", &task::waker(Arc::clone(&a)));
        set.register(&"b", &task::waker(Arc::clone(&b)));

        set.waker().wake_by_ref();
        set.wake_others(&"a");
        set.unregister(&"b");
        set.waker().wake();

        assert_eq!(a.0.load(Ordering::SeqCst), 2);
        assert_eq!(b.0.load(Ordering::SeqCst), 2);
    }
}
