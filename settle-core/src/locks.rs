//! Locks - Per-resource mutual exclusion owned by the caller
//!
//! Two operations racing on the same remote resource (e.g. replacing workers
//! of one cluster) are serialized by locking the resource's key. The poller
//! itself never takes these locks.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use log::debug;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::resource::ResourceId;

/// Held while an operation on one resource is in flight; unlocks on drop
#[derive(Debug)]
pub struct ResourceGuard<K> {
    key: K,
    _guard: OwnedMutexGuard<()>,
}

impl<K> ResourceGuard<K> {
    pub fn key(&self) -> &K {
        &self.key
    }
}

/// Registry of async mutexes keyed by resource identity
#[derive(Debug)]
pub struct ResourceLocks<K = ResourceId>
where
    K: Eq + Hash,
{
    locks: DashMap<K, Arc<Mutex<()>>>,
}

impl<K> Default for ResourceLocks<K>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }
}

impl<K> ResourceLocks<K>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: &K) -> Arc<Mutex<()>> {
        // The map shard lock is released before any await
        self.locks.entry(key.clone()).or_default().value().clone()
    }

    /// Wait until `key` is free and lock it
    pub async fn lock(&self, key: &K) -> ResourceGuard<K> {
        let mutex = self.entry(key);
        debug!("Acquiring lock for {:?}", key);
        let guard = mutex.lock_owned().await;
        ResourceGuard {
            key: key.clone(),
            _guard: guard,
        }
    }

    /// Lock `key` only if nobody else holds it
    pub fn try_lock(&self, key: &K) -> Option<ResourceGuard<K>> {
        let mutex = self.entry(key);
        mutex.try_lock_owned().ok().map(|guard| ResourceGuard {
            key: key.clone(),
            _guard: guard,
        })
    }

    pub fn is_locked(&self, key: &K) -> bool {
        self.locks
            .get(key)
            .is_some_and(|mutex| mutex.try_lock().is_err())
    }

    /// Number of keys currently tracked
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Forget keys that are neither locked nor awaited
    pub fn prune(&self) {
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }
}
