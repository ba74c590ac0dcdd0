//! Capability interface to the shared lock store.
//!
//! The election engine never talks to a storage backend directly. It holds a
//! [`ResourceLock`] handle bound to one election and one identity, and all
//! arbitration between candidates happens through the store's conditional
//! update on [`ResourceVersion`].
//!
//! - [`LockRecord`]: the leader record persisted in the store
//! - [`ResourceLock`]: read / conditional write of that record
//! - [`LockBackend`]: builds lock handles for an election and identity
//! - [`memory`]: in-process compare-and-swap store

pub mod memory;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ElectionDescriptor;
use crate::error::{LockError, Result};
use crate::identity::Identity;

pub use memory::InMemoryLockStore;

/// The leader record stored under an election's lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    /// Current holder. Empty when the lock has been released.
    pub holder_identity: String,
    pub lease_duration_seconds: u64,
    pub acquire_time: DateTime<Utc>,
    pub renew_time: DateTime<Utc>,
    pub leader_transitions: u64,
}

impl LockRecord {
    /// Whether some identity currently claims the lock.
    pub fn is_held(&self) -> bool {
        !self.holder_identity.is_empty()
    }

    pub fn is_held_by(&self, identity: &Identity) -> bool {
        self.holder_identity == identity.as_str()
    }

    pub fn holder(&self) -> Option<Identity> {
        if self.is_held() {
            Some(Identity::new(self.holder_identity.clone()))
        } else {
            None
        }
    }
}

/// Opaque optimistic-concurrency token returned with every read and write.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceVersion(String);

impl ResourceVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle to the lock record of one election, acting as one identity.
#[async_trait]
pub trait ResourceLock: Send + Sync {
    /// Read the record and its current version.
    /// Returns [`LockError::NotFound`] when no record exists yet.
    async fn get(&self) -> std::result::Result<(LockRecord, ResourceVersion), LockError>;

    /// Write `record`.
    ///
    /// With `expected = None` the record is created and the call fails with
    /// [`LockError::Conflict`] if one already exists. Otherwise the write only
    /// succeeds if the stored version still equals `expected`.
    async fn create_or_update(
        &self,
        record: LockRecord,
        expected: Option<&ResourceVersion>,
    ) -> std::result::Result<ResourceVersion, LockError>;

    /// Identity this handle writes as.
    fn identity(&self) -> &Identity;

    /// Human readable location of the lock, used in logs.
    fn describe(&self) -> String;
}

/// A lock store client able to produce [`ResourceLock`] handles.
pub trait LockBackend: Send + Sync {
    fn lock(
        &self,
        descriptor: &ElectionDescriptor,
        identity: &Identity,
    ) -> Result<Arc<dyn ResourceLock>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(holder: &str) -> LockRecord {
        let now = Utc::now();
        LockRecord {
            holder_identity: holder.to_string(),
            lease_duration_seconds: 15,
            acquire_time: now,
            renew_time: now,
            leader_transitions: 3,
        }
    }

    #[test]
    fn empty_holder_means_released() {
        let rec = record("");
        assert!(!rec.is_held());
        assert!(rec.holder().is_none());
    }

    #[test]
    fn holder_identity_comparison() {
        let rec = record("node-a");
        assert!(rec.is_held());
        assert!(rec.is_held_by(&Identity::new("node-a")));
        assert!(!rec.is_held_by(&Identity::new("node-b")));
        assert_eq!(rec.holder(), Some(Identity::new("node-a")));
    }

    #[test]
    fn record_uses_camel_case_fields() {
        let json = serde_json::to_value(record("node-a")).unwrap();
        assert_eq!(json["holderIdentity"], "node-a");
        assert_eq!(json["leaseDurationSeconds"], 15);
        assert_eq!(json["leaderTransitions"], 3);
        assert!(json.get("renewTime").is_some());
        assert!(json.get("acquireTime").is_some());
    }
}
