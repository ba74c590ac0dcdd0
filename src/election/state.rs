use std::sync::atomic::{AtomicU8, Ordering};

use tokio::time::Instant;

use crate::identity::Identity;
use crate::lock::{LockRecord, ResourceVersion};

/// Leadership as seen by one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadershipState {
    /// Never led, polling for the lock.
    Standby,
    Leader,
    /// Led at some point, currently not leading.
    FormerLeader,
}

impl LeadershipState {
    fn as_u8(self) -> u8 {
        match self {
            LeadershipState::Standby => 0,
            LeadershipState::Leader => 1,
            LeadershipState::FormerLeader => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => LeadershipState::Leader,
            2 => LeadershipState::FormerLeader,
            _ => LeadershipState::Standby,
        }
    }
}

impl std::fmt::Display for LeadershipState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LeadershipState::Standby => write!(f, "standby"),
            LeadershipState::Leader => write!(f, "leader"),
            LeadershipState::FormerLeader => write!(f, "former-leader"),
        }
    }
}

/// Lock-free cell holding a [`LeadershipState`]. Readers never block the
/// election loop.
#[derive(Debug)]
pub struct LeadershipFlag(AtomicU8);

impl LeadershipFlag {
    pub fn new() -> Self {
        Self(AtomicU8::new(LeadershipState::Standby.as_u8()))
    }

    pub fn load(&self) -> LeadershipState {
        LeadershipState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, state: LeadershipState) {
        self.0.store(state.as_u8(), Ordering::Release);
    }

    pub fn is_leader(&self) -> bool {
        self.load() == LeadershipState::Leader
    }
}

impl Default for LeadershipFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// What the elector last saw in the lock store.
///
/// `observed_at` is a local monotonic instant taken when the record last
/// changed. Lease expiry is measured from it rather than from the record's
/// wall-clock `renew_time`, so skew between hosts does not matter.
#[derive(Debug)]
pub struct ObservedState {
    pub record: Option<LockRecord>,
    pub version: Option<ResourceVersion>,
    pub observed_at: Instant,
    /// Holder last passed to `on_new_leader` bookkeeping, including self.
    pub reported_leader: Option<Identity>,
}

impl ObservedState {
    pub fn new() -> Self {
        Self {
            record: None,
            version: None,
            observed_at: Instant::now(),
            reported_leader: None,
        }
    }

    /// Remember `record` and restart the expiry clock if it changed.
    pub fn observe(&mut self, record: LockRecord, version: ResourceVersion) {
        if self.record.as_ref() != Some(&record) {
            self.record = Some(record);
            self.observed_at = Instant::now();
        }
        self.version = Some(version);
    }

    /// Record a successful write of our own.
    pub fn set_written(&mut self, record: LockRecord, version: ResourceVersion) {
        self.record = Some(record);
        self.version = Some(version);
        self.observed_at = Instant::now();
    }

    pub fn holder(&self) -> Option<Identity> {
        self.record.as_ref().and_then(LockRecord::holder)
    }

    pub fn is_held_by(&self, identity: &Identity) -> bool {
        self.record
            .as_ref()
            .is_some_and(|record| record.is_held_by(identity))
    }

    /// Whether a lease observed `observed_at` is still valid for `lease_duration`.
    pub fn lease_valid(&self, lease_duration: std::time::Duration) -> bool {
        self.observed_at + lease_duration > Instant::now()
    }
}

impl Default for ObservedState {
    fn default() -> Self {
        Self::new()
    }
}
