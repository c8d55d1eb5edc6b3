//! Synchronization primitives.
//!
//! Re-exports the tokio primitives used across the workspace, together with
//! two additions:
//!
//! - [`CancellationToken`]: cooperative cancellation passed explicitly into
//!   every fetch call.
//! - [`KeyedMutex`]: a per-key lock map. Holding the guard for key `k`
//!   serializes every other caller asking for `k` while leaving other keys
//!   free to proceed concurrently.
//!
//! # Examples
//!
//! ```rust
//! use core_async::sync::KeyedMutex;
//!
//! async fn example() {
//!     let locks = KeyedMutex::new();
//!     let _guard = locks.lock("cover-42".to_string()).await;
//!     // fetch-or-read-cached-file for "cover-42" happens here
//! }
//! ```

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

pub use tokio::sync::{
    broadcast, mpsc, oneshot, watch, Barrier, Mutex, MutexGuard, Notify, OwnedMutexGuard, RwLock,
    RwLockReadGuard, RwLockWriteGuard, Semaphore, SemaphorePermit,
};
pub use tokio_util::sync::CancellationToken;

// ============================================================================
// Keyed Mutex
// ============================================================================

/// A map of independent async locks, one per key.
///
/// Entries are created on demand and removed once the last holder or waiter
/// releases them, so the map only ever contains keys that are in use. A
/// waiter whose future is dropped before it gets the lock counts as released.
pub struct KeyedMutex<K> {
    locks: parking_lot::Mutex<HashMap<K, Slot>>,
}

struct Slot {
    lock: Arc<Mutex<()>>,
    /// Holders plus waiters.
    users: usize,
}

impl<K> KeyedMutex<K>
where
    K: Eq + Hash + Clone,
{
    /// Creates an empty lock map.
    pub fn new() -> Self {
        Self {
            locks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Acquires the lock for `key`, waiting while another task holds it.
    pub async fn lock(&self, key: K) -> KeyedMutexGuard<'_, K> {
        let lock = {
            let mut locks = self.locks.lock();
            let slot = locks.entry(key.clone()).or_insert_with(|| Slot {
                lock: Arc::new(Mutex::new(())),
                users: 0,
            });
            slot.users += 1;
            Arc::clone(&slot.lock)
        };

        // Registered before waiting so a dropped waiter still releases its use.
        let mut pending = KeyedMutexGuard {
            owner: self,
            key: Some(key),
            guard: None,
        };
        pending.guard = Some(lock.lock_owned().await);
        pending
    }

    /// Number of keys currently locked or awaited.
    pub fn active_keys(&self) -> usize {
        self.locks.lock().len()
    }

    fn release(&self, key: &K) {
        let mut locks = self.locks.lock();
        let unused = match locks.get_mut(key) {
            Some(slot) => {
                slot.users = slot.users.saturating_sub(1);
                slot.users == 0
            }
            None => false,
        };
        if unused {
            locks.remove(key);
        }
    }
}

impl<K> Default for KeyedMutex<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> std::fmt::Debug for KeyedMutex<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedMutex")
            .field("active_keys", &self.locks.lock().len())
            .finish()
    }
}

/// Guard returned by [`KeyedMutex::lock`]. The key is released on drop.
pub struct KeyedMutexGuard<'a, K>
where
    K: Eq + Hash + Clone,
{
    owner: &'a KeyedMutex<K>,
    key: Option<K>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<'a, K> KeyedMutexGuard<'a, K>
where
    K: Eq + Hash + Clone,
{
    /// The key this guard holds.
    pub fn key(&self) -> Option<&K> {
        self.key.as_ref()
    }
}

impl<'a, K> Drop for KeyedMutexGuard<'a, K>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        // Release the slot before checking whether it can be pruned.
        drop(self.guard.take());
        if let Some(key) = self.key.take() {
            self.owner.release(&key);
        }
    }
}
