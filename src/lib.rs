//! Lease-based leader election over a shared compare-and-swap lock store.
//!
//! Each candidate periodically tries to write itself into a lock record.
//! The holder keeps renewing the record; everyone else waits until it has
//! gone unrenewed for a full lease before taking over. Exactly one candidate
//! runs the leader workload at a time, within the limits of a lease: long
//! pauses or clock drift can produce brief overlap, so non-idempotent work
//! needs its own fencing.
//!
//! - [`lock`]: lock record, store capability traits, in-memory store
//! - [`election`]: the acquire/renew state machine
//! - [`leader`]: the public [`LeaderElection`] facade

pub mod config;
pub mod election;
pub mod error;
pub mod identity;
pub mod leader;
pub mod lock;
pub mod shutdown;

pub use config::{ElectionConfig, ElectionDescriptor};
pub use election::LeadershipState;
pub use error::{ElectionError, LockError, Result};
pub use identity::Identity;
pub use leader::{LeaderElection, LeaderElectionBuilder};
pub use lock::{InMemoryLockStore, LockBackend, LockRecord, ResourceLock, ResourceVersion};
