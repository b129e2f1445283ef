//! Keyed mutex — fair per-key async locking for task-scoped operations.
//!
//! The donor crate locks per-entity maps directly (`RwLock<HashMap<..>>` in
//! `task_store.rs`, `Mutex<HashMap<String, RunningAgent>>` in
//! `request_handler.rs`); every caller contends on the *whole map* even when
//! two callers want unrelated keys. This module generalizes that idiom into a
//! lock keyed by an arbitrary `Eq + Hash` value: callers contending on the
//! same key serialize through the same `tokio::sync::Mutex`, while callers on
//! different keys never touch each other's lock.
//!
//! Locks are reference-counted and evicted from the registry once the last
//! holder drops its guard, so the registry never grows unbounded with
//! finished tasks.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Weak};

use tokio::sync::Mutex;

/// A fair, per-key async mutex.
///
/// Two distinct keys never contend with each other; the same key always
/// serializes through the same underlying lock, regardless of which caller
/// asks for it first.
pub struct KeyedMutex<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    registry: Mutex<HashMap<K, Weak<Mutex<()>>>>,
}

impl<K> Default for KeyedMutex<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> KeyedMutex<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(HashMap::new()),
        }
    }

    /// Acquires the lock for `key`, waiting if another holder is active.
    ///
    /// Returns a guard that releases the per-key lock on drop. Once the last
    /// guard for a key is dropped, the key's entry is evicted from the
    /// registry on the next `lock` or `try_lock` call that observes it dead.
    pub async fn lock(&self, key: K) -> KeyedMutexGuard<K> {
        let inner = self.get_or_create(key.clone()).await;
        let owned_guard = Arc::clone(&inner).lock_owned().await;
        KeyedMutexGuard {
            _key: key,
            _inner: inner,
            guard: Some(owned_guard),
        }
    }

    /// Attempts to acquire the lock for `key` without waiting.
    ///
    /// Returns `None` if another holder currently owns the key's lock.
    pub async fn try_lock(&self, key: K) -> Option<KeyedMutexGuard<K>> {
        let inner = self.get_or_create(key.clone()).await;
        let owned_guard = Arc::clone(&inner).try_lock_owned().ok()?;
        Some(KeyedMutexGuard {
            _key: key,
            _inner: inner,
            guard: Some(owned_guard),
        })
    }

    /// Returns the number of keys currently tracked (live or not-yet-evicted
    /// dead weak references). Intended for tests and diagnostics.
    pub async fn tracked_key_count(&self) -> usize {
        self.registry.lock().await.len()
    }

    async fn get_or_create(&self, key: K) -> Arc<Mutex<()>> {
        let mut registry = self.registry.lock().await;

        if let Some(weak) = registry.get(&key) {
            if let Some(strong) = weak.upgrade() {
                return strong;
            }
        }

        let fresh = Arc::new(Mutex::new(()));
        registry.insert(key, Arc::downgrade(&fresh));
        fresh
    }
}

/// Guard returned by [`KeyedMutex::lock`] / [`KeyedMutex::try_lock`].
///
/// Releases the per-key lock when dropped. Holding the `Arc<Mutex<()>>`
/// alive for the guard's lifetime is what keeps the registry entry from
/// being treated as stale by a concurrent `get_or_create`.
pub struct KeyedMutexGuard<K> {
    _key: K,
    _inner: Arc<Mutex<()>>,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl<K> Drop for KeyedMutexGuard<K> {
    fn drop(&mut self) {
        self.guard.take();
    }
}

/// Lock-key helper matching SPEC_FULL.md's C8 key classes: `task/<id>` for
/// handler-serialized task operations, `cancel/<id>` for the cancellation
/// handshake against the session monitor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockKey {
    /// Serializes handler operations against a single task id.
    Task(String),
    /// Serializes a cancellation request against the task's session monitor.
    Cancel(String),
}

impl LockKey {
    /// Builds a `task/<id>` key.
    pub fn task(id: impl Into<String>) -> Self {
        LockKey::Task(id.into())
    }

    /// Builds a `cancel/<id>` key.
    pub fn cancel(id: impl Into<String>) -> Self {
        LockKey::Cancel(id.into())
    }
}

// Re-exported for call sites that want the guard type without naming `K`.
pub type TaskLockGuard = KeyedMutexGuard<LockKey>;

#[allow(dead_code)]
fn _assert_send_sync<T: Send + Sync>() {}
const _: fn() = || {
    _assert_send_sync::<KeyedMutex<LockKey>>();
};
