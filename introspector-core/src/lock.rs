//! Lock typestate for compile-time safety of the node lock registry.
//!
//! Uses the typestate pattern to make invalid state transitions uncompilable.
//! A lock can only be released when it's in the Acquired state.
//!
//! # State Transition Diagram
//!
//! ```text
//! (unheld) ─── acquire()/try_acquire() ──→ Acquired ─── release() ──→ (unheld)
//! ```
//!
//! Locks are process-local. Keys are node UUIDs; the registry table of
//! per-key mutexes is never pruned, matching the way the original
//! coordinator's semaphore table grows for the lifetime of the process. If
//! this coordinator is ever run as multiple replicas, an external
//! coordination service would be required to keep the same guarantee across
//! processes (out of scope here).

use crate::identity::NodeUuid;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

// ============================================================================
// TYPESTATE MARKERS
// ============================================================================

/// Marker trait for lock states.
pub trait LockState: private::Sealed + Send + Sync {}

/// Lock is currently held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acquired;
impl LockState for Acquired {}

/// Lock has been released (for documentation; locks in this state don't
/// exist at runtime — `release()` consumes the `Lock<Acquired>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Released;
impl LockState for Released {}

mod private {
    pub trait Sealed {}
    impl Sealed for super::Acquired {}
    impl Sealed for super::Released {}
}

// ============================================================================
// LOCK TYPESTATE WRAPPER
// ============================================================================

/// A held lock on a single node uuid, with compile-time state tracking.
///
/// The type parameter `S` indicates the current state. Only `Lock<Acquired>`
/// exposes `release()`; calling it consumes the value so it cannot be
/// released twice through the same handle.
///
/// Dropping a `Lock<Acquired>` without calling `release()` still frees the
/// underlying mutex permit (the inner guard's `Drop` runs), but that is a
/// safety net, not the documented release path — callers are expected to
/// call `release()` explicitly, the same way the original coordinator's
/// `__del__`-based release was a safety net rather than a contract.
#[derive(Debug)]
pub struct Lock<S: LockState> {
    uuid: NodeUuid,
    guard: Option<OwnedMutexGuard<()>>,
    _state: PhantomData<S>,
}

impl<S: LockState> Lock<S> {
    /// The node uuid this lock guards.
    pub fn uuid(&self) -> NodeUuid {
        self.uuid
    }
}

impl Lock<Acquired> {
    fn new(uuid: NodeUuid, guard: OwnedMutexGuard<()>) -> Self {
        Lock {
            uuid,
            guard: Some(guard),
            _state: PhantomData,
        }
    }

    /// Release the lock. Consumes the handle, preventing further use.
    pub fn release(mut self) -> Lock<Released> {
        self.guard.take();
        Lock {
            uuid: self.uuid,
            guard: None,
            _state: PhantomData,
        }
    }
}

// ============================================================================
// LOCK REGISTRY
// ============================================================================

/// Process-wide keyed mutex table. Keys are node uuids; different keys are
/// independent, and the registry guarantees that no two holders of the same
/// key proceed concurrently.
#[derive(Debug, Default)]
pub struct LockRegistry {
    table: AsyncMutex<HashMap<NodeUuid, Arc<AsyncMutex<()>>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self {
            table: AsyncMutex::new(HashMap::new()),
        }
    }

    async fn entry(&self, uuid: NodeUuid) -> Arc<AsyncMutex<()>> {
        let mut table = self.table.lock().await;
        table
            .entry(uuid)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Acquire the lock for `uuid`, waiting if another holder has it.
    pub async fn acquire(&self, uuid: NodeUuid) -> Lock<Acquired> {
        let mutex = self.entry(uuid).await;
        let guard = mutex.lock_owned().await;
        Lock::new(uuid, guard)
    }

    /// Attempt to acquire the lock for `uuid` without waiting. Returns
    /// `None` immediately if another holder has it.
    pub async fn try_acquire(&self, uuid: NodeUuid) -> Option<Lock<Acquired>> {
        let mutex = self.entry(uuid).await;
        mutex.try_lock_owned().ok().map(|guard| Lock::new(uuid, guard))
    }

    /// Number of distinct uuids that have ever had an entry created. The
    /// table is never pruned, so this only grows.
    pub async fn known_keys(&self) -> usize {
        self.table.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::EntityIdType;
    use std::time::Duration;

    #[tokio::test]
    async fn acquire_then_release_allows_reacquire() {
        let registry = LockRegistry::new();
        let uuid = NodeUuid::now_v7();

        let lock = registry.acquire(uuid).await;
        assert_eq!(lock.uuid(), uuid);
        lock.release();

        let lock2 = registry.try_acquire(uuid).await;
        assert!(lock2.is_some());
    }

    #[tokio::test]
    async fn try_acquire_fails_while_held() {
        let registry = LockRegistry::new();
        let uuid = NodeUuid::now_v7();

        let _lock = registry.acquire(uuid).await;
        let second = registry.try_acquire(uuid).await;
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn different_keys_are_independent() {
        let registry = LockRegistry::new();
        let a = NodeUuid::now_v7();
        let b = NodeUuid::now_v7();

        let _lock_a = registry.acquire(a).await;
        let lock_b = registry.try_acquire(b).await;
        assert!(lock_b.is_some());
    }

    #[tokio::test]
    async fn blocking_acquire_waits_for_release() {
        let registry = Arc::new(LockRegistry::new());
        let uuid = NodeUuid::now_v7();

        let lock = registry.acquire(uuid).await;

        let registry2 = registry.clone();
        let waiter = tokio::spawn(async move { registry2.acquire(uuid).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        lock.release();
        let second = waiter.await.expect("waiter task should not panic");
        assert_eq!(second.uuid(), uuid);
    }

    #[tokio::test]
    async fn known_keys_never_shrinks_after_release() {
        let registry = LockRegistry::new();
        let uuid = NodeUuid::now_v7();

        assert_eq!(registry.known_keys().await, 0);
        let lock = registry.acquire(uuid).await;
        assert_eq!(registry.known_keys().await, 1);
        lock.release();
        assert_eq!(registry.known_keys().await, 1);
    }
}
