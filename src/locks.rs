//! Per-owner write locks.
//!
//! All mutations of one owner's graph run one at a time; different owners
//! only meet at the database write lock.

use crate::types::OwnerId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Registry size above which idle entries are dropped.
const PRUNE_THRESHOLD: usize = 1024;

/// Registry of one mutex per owner.
#[derive(Default)]
pub struct OwnerLocks {
    locks: Mutex<HashMap<OwnerId, Arc<Mutex<()>>>>,
}

impl OwnerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mutex for an owner, created on first use.
    ///
    /// Callers lock the returned mutex for the duration of the mutation.
    pub fn lock_for(&self, owner: OwnerId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.len() >= PRUNE_THRESHOLD {
            // Only the registry holds these, so nobody is waiting on them
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        Arc::clone(locks.entry(owner).or_default())
    }

    /// Number of owners currently tracked.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_same_owner_shares_lock() {
        let locks = OwnerLocks::new();
        let a = locks.lock_for(1);
        let b = locks.lock_for(1);
        let c = locks.lock_for(2);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(locks.len(), 2);
    }

    #[test]
    fn test_same_owner_is_serialized() {
        let locks = Arc::new(OwnerLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                thread::spawn(move || {
                    let lock = locks.lock_for(9);
                    let _guard = lock.lock().unwrap();
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(5));
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_idle_entries_pruned() {
        let locks = OwnerLocks::new();
        for owner in 0..PRUNE_THRESHOLD as OwnerId {
            locks.lock_for(owner);
        }
        assert_eq!(locks.len(), PRUNE_THRESHOLD);

        let held = locks.lock_for(-1);
        assert_eq!(locks.len(), 1);
        drop(held);
    }
}
