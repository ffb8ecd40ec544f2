//! Listener sets with handle-based, idempotent add/remove.
//!
//! Closures cannot be compared for equality, so every registration returns a
//! [`ListenerId`] that is later used to remove it. Dispatch always runs over a
//! snapshot taken without holding the internal lock, which lets a listener
//! add or remove listeners (or provide tokens) from inside a callback.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Handle identifying one registered listener.
///
/// Ids are unique for the whole process, so an id from one set can never
/// accidentally remove a listener from another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        Self(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// Shared callback stored in a [`ListenerSet`].
pub type Listener<A> = Arc<dyn Fn(A) + Send + Sync + 'static>;

/// Ordered set of callbacks receiving a cloned argument.
pub(crate) struct ListenerSet<A> {
    entries: Mutex<Vec<(ListenerId, Listener<A>)>>,
}

impl<A> Default for ListenerSet<A> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }
}

impl<A> ListenerSet<A> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    // Listeners never run under this lock, so poisoning can only come from a
    // panic inside Vec bookkeeping and the data is still consistent.
    fn lock(&self) -> MutexGuard<'_, Vec<(ListenerId, Listener<A>)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn add(&self, listener: Listener<A>) -> ListenerId {
        let id = ListenerId::next();
        self.lock().push((id, listener));
        id
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.lock();
        match entries.iter().position(|(existing, _)| *existing == id) {
            Some(index) => {
                entries.remove(index);
                true
            }
            None => false,
        }
    }

    pub(crate) fn contains(&self, id: ListenerId) -> bool {
        self.lock().iter().any(|(existing, _)| *existing == id)
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    pub(crate) fn clear(&self) {
        self.lock().clear();
    }

    /// Remove every listener and hand them back, in registration order.
    pub(crate) fn drain(&self) -> Vec<Listener<A>> {
        self.lock().drain(..).map(|(_, listener)| listener).collect()
    }
}

impl<A: Clone> ListenerSet<A> {
    /// Call every listener with a clone of `arg`.
    ///
    /// A listener removed by an earlier listener in the same dispatch is
    /// skipped.
    pub(crate) fn emit(&self, arg: A) {
        let snapshot: Vec<(ListenerId, Listener<A>)> = self.lock().clone();
        for (id, listener) in snapshot {
            if self.contains(id) {
                listener(arg.clone());
            }
        }
    }
}
