use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::config::ElectionDescriptor;
use crate::error::{LockError, Result};
use crate::identity::Identity;
use crate::lock::{LockBackend, LockRecord, ResourceLock, ResourceVersion};

/// In-process lock store with atomic compare-and-swap semantics.
///
/// Cloning the store shares the underlying records, so every candidate in a
/// process (or a test) can be handed the same store. Faults can be injected
/// per identity to simulate network partitions and write contention.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLockStore {
    inner: Arc<Mutex<StoreState>>,
}

#[derive(Debug, Default)]
struct StoreState {
    locks: HashMap<ElectionDescriptor, StoredLock>,
    faults: HashMap<Identity, Faults>,
    next_version: u64,
}

#[derive(Debug)]
struct StoredLock {
    record: LockRecord,
    version: u64,
}

#[derive(Debug, Default)]
struct Faults {
    partitioned: bool,
    failing_writes: usize,
}

impl StoreState {
    fn bump_version(&mut self) -> u64 {
        self.next_version += 1;
        self.next_version
    }

    fn check_reachable(&self, identity: &Identity) -> std::result::Result<(), LockError> {
        match self.faults.get(identity) {
            Some(faults) if faults.partitioned => Err(LockError::Unavailable(format!(
                "{} is partitioned from the lock store",
                identity
            ))),
            _ => Ok(()),
        }
    }

    fn take_write_fault(&mut self, identity: &Identity) -> bool {
        match self.faults.get_mut(identity) {
            Some(faults) if faults.failing_writes > 0 => {
                faults.failing_writes -= 1;
                true
            }
            _ => false,
        }
    }
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current record for an election, if one has been written.
    pub async fn record(&self, descriptor: &ElectionDescriptor) -> Option<LockRecord> {
        self.inner
            .lock()
            .await
            .locks
            .get(descriptor)
            .map(|stored| stored.record.clone())
    }

    /// Make every call from `identity` fail as unreachable until healed.
    pub async fn partition(&self, identity: &Identity) {
        let mut state = self.inner.lock().await;
        state.faults.entry(identity.clone()).or_default().partitioned = true;
        tracing::debug!(id = %identity, "Partitioned identity from lock store");
    }

    pub async fn heal(&self, identity: &Identity) {
        let mut state = self.inner.lock().await;
        if let Some(faults) = state.faults.get_mut(identity) {
            faults.partitioned = false;
        }
    }

    /// Reject the next `count` writes from `identity` with a version conflict.
    pub async fn fail_writes(&self, identity: &Identity, count: usize) {
        let mut state = self.inner.lock().await;
        state.faults.entry(identity.clone()).or_default().failing_writes = count;
    }

    /// Remove every injected fault.
    pub async fn clear_faults(&self) {
        self.inner.lock().await.faults.clear();
    }
}

impl LockBackend for InMemoryLockStore {
    fn lock(
        &self,
        descriptor: &ElectionDescriptor,
        identity: &Identity,
    ) -> Result<Arc<dyn ResourceLock>> {
        Ok(Arc::new(MemoryLock {
            store: self.clone(),
            descriptor: descriptor.clone(),
            identity: identity.clone(),
        }))
    }
}

/// A [`ResourceLock`] handle onto an [`InMemoryLockStore`].
#[derive(Debug, Clone)]
pub struct MemoryLock {
    store: InMemoryLockStore,
    descriptor: ElectionDescriptor,
    identity: Identity,
}

#[async_trait]
impl ResourceLock for MemoryLock {
    async fn get(&self) -> std::result::Result<(LockRecord, ResourceVersion), LockError> {
        let state = self.store.inner.lock().await;
        state.check_reachable(&self.identity)?;

        let stored = state.locks.get(&self.descriptor).ok_or(LockError::NotFound)?;
        Ok((
            stored.record.clone(),
            ResourceVersion::new(stored.version.to_string()),
        ))
    }

    async fn create_or_update(
        &self,
        record: LockRecord,
        expected: Option<&ResourceVersion>,
    ) -> std::result::Result<ResourceVersion, LockError> {
        let mut state = self.store.inner.lock().await;
        state.check_reachable(&self.identity)?;
        if state.take_write_fault(&self.identity) {
            return Err(LockError::Conflict);
        }

        match (state.locks.get(&self.descriptor), expected) {
            (Some(_), None) => return Err(LockError::Conflict),
            (None, Some(_)) => return Err(LockError::NotFound),
            (Some(stored), Some(expected)) if stored.version.to_string() != expected.as_str() => {
                return Err(LockError::Conflict);
            }
            _ => {}
        }

        let version = state.bump_version();
        state
            .locks
            .insert(self.descriptor.clone(), StoredLock { record, version });
        Ok(ResourceVersion::new(version.to_string()))
    }

    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn describe(&self) -> String {
        self.descriptor.to_string()
    }
}
