//! Lifetime tokens for guarding consumer callbacks.
//!
//! A consumer's callbacks can outlive the consumer: a closure may sit in a
//! listener snapshot that is already being dispatched, or in a wait the host
//! has not dropped yet. A [`Lifetime`] is ended when the consumer tears down,
//! and callbacks wrapped with [`Lifetime::guard`] become no-ops from then on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared "still alive" flag for one consuming unit.
///
/// Clones share state: ending any clone ends all of them.
#[derive(Debug, Clone, Default)]
pub struct Lifetime {
    ended: Arc<AtomicBool>,
}

impl Lifetime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the owner as torn down.
    pub fn end(&self) {
        self.ended.store(true, Ordering::SeqCst);
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    pub fn is_alive(&self) -> bool {
        !self.is_ended()
    }

    /// Wrap `callback` so it only runs while this lifetime is alive.
    pub fn guard<A, F>(&self, callback: F) -> impl Fn(A) + Send + Sync + 'static
    where
        A: 'static,
        F: Fn(A) + Send + Sync + 'static,
    {
        let lifetime = self.clone();
        move |arg| {
            if lifetime.is_alive() {
                callback(arg);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_new_lifetime_is_alive() {
        let lifetime = Lifetime::new();
        assert!(lifetime.is_alive());
        assert!(!lifetime.is_ended());
    }

    #[test]
    fn test_clones_share_state() {
        let lifetime = Lifetime::new();
        let clone = lifetime.clone();
        clone.end();
        assert!(lifetime.is_ended());
    }

    #[test]
    fn test_guard_stops_after_end() {
        let lifetime = Lifetime::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let guarded = lifetime.guard(move |n: usize| {
            counter.fetch_add(n, Ordering::SeqCst);
        });

        guarded(2);
        lifetime.end();
        guarded(5);

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
