use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::ElectionConfig;
use crate::election::state::ObservedState;
use crate::election::timer::jittered;
use crate::error::{ElectionError, LockError, Result};
use crate::identity::Identity;
use crate::lock::{LockRecord, ResourceLock};

/// Transition hooks invoked from inside the election loop.
///
/// Implementations must return promptly: the loop calls them inline and
/// does not renew while a hook is running.
pub trait LeaderCallbacks: Send + Sync {
    /// This identity acquired the lock. `leading` is cancelled as soon as the
    /// holding interval ends.
    fn on_started_leading(&self, leading: CancellationToken);

    /// The holding interval ended, through a failed renewal or cancellation.
    fn on_stopped_leading(&self);

    /// Another identity was observed holding the lock. Never called with
    /// our own identity.
    fn on_new_leader(&self, identity: &Identity);
}

/// Result of one renewal window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RenewOutcome {
    Renewed,
    /// The window elapsed without a successful write, or another identity
    /// took the lock.
    Lost,
    Cancelled,
}

/// Lease acquisition and renewal state machine for one election.
pub struct LeaderElector {
    config: ElectionConfig,
    lock: Arc<dyn ResourceLock>,
    callbacks: Arc<dyn LeaderCallbacks>,
    observed: RwLock<ObservedState>,
}

impl LeaderElector {
    pub fn new(
        config: ElectionConfig,
        lock: Arc<dyn ResourceLock>,
        callbacks: Arc<dyn LeaderCallbacks>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            lock,
            callbacks,
            observed: RwLock::new(ObservedState::new()),
        })
    }

    pub fn identity(&self) -> &Identity {
        self.lock.identity()
    }

    pub fn config(&self) -> &ElectionConfig {
        &self.config
    }

    /// Drive the election until `cancel` fires.
    ///
    /// Alternates between acquiring and renewing. Losing the lease fires
    /// `on_stopped_leading` and falls back to acquiring; cancellation while
    /// leading optionally releases the lock first.
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            if !self.acquire(&cancel).await {
                return;
            }

            // Acquired while shutting down: hand the lease back without
            // starting leader work.
            if cancel.is_cancelled() {
                if self.config.release_on_cancel {
                    self.release().await;
                }
                return;
            }

            let leading = cancel.child_token();
            self.callbacks.on_started_leading(leading.clone());

            let outcome = self.renew(&cancel).await;
            leading.cancel();

            if outcome == RenewOutcome::Cancelled && self.config.release_on_cancel {
                self.release().await;
            }
            self.callbacks.on_stopped_leading();

            if outcome == RenewOutcome::Cancelled {
                return;
            }

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.config.retry_period) => {}
            }
        }
    }

    /// Poll until the lease is ours. Returns false if cancelled first.
    async fn acquire(&self, cancel: &CancellationToken) -> bool {
        let desc = self.lock.describe();
        tracing::info!(lock = %desc, id = %self.identity(), "Attempting to acquire leader lease");

        loop {
            if cancel.is_cancelled() {
                return false;
            }

            let deadline = Instant::now() + self.config.renew_deadline;
            let acquired = self.try_acquire_or_renew(deadline).await;
            self.maybe_report_transition().await;

            if acquired {
                tracing::info!(lock = %desc, id = %self.identity(), "Successfully acquired lease");
                return true;
            }
            tracing::debug!(lock = %desc, "Failed to acquire lease");

            let wait = jittered(self.config.retry_period, self.config.retry_jitter);
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Keep renewing every retry period until a renewal window fails or the
    /// loop is cancelled.
    async fn renew(&self, cancel: &CancellationToken) -> RenewOutcome {
        loop {
            let deadline = Instant::now() + self.config.renew_deadline;
            let outcome = self.renew_within(deadline, cancel).await;
            if outcome != RenewOutcome::Renewed {
                return outcome;
            }

            tokio::select! {
                _ = cancel.cancelled() => return RenewOutcome::Cancelled,
                _ = tokio::time::sleep(self.config.retry_period) => {}
            }
        }
    }

    async fn renew_within(&self, deadline: Instant, cancel: &CancellationToken) -> RenewOutcome {
        let desc = self.lock.describe();

        loop {
            let renewed = self.try_acquire_or_renew(deadline).await;
            self.maybe_report_transition().await;

            if renewed {
                tracing::trace!(lock = %desc, "Successfully renewed lease");
                return RenewOutcome::Renewed;
            }

            let holder = self.observed.read().await.holder();
            if let Some(holder) = holder {
                if &holder != self.identity() {
                    tracing::info!(lock = %desc, leader = %holder, "Lease was taken over by another instance");
                    return RenewOutcome::Lost;
                }
            }

            let wake = (Instant::now() + self.config.retry_period).min(deadline);
            tokio::select! {
                _ = cancel.cancelled() => return RenewOutcome::Cancelled,
                _ = tokio::time::sleep_until(wake) => {}
            }

            if Instant::now() >= deadline {
                tracing::info!(lock = %desc, "Failed to renew lease before deadline");
                return RenewOutcome::Lost;
            }
        }
    }

    /// One acquisition or renewal attempt, with every store call bounded by
    /// `deadline`. Returns true when the store now names this identity as
    /// holder.
    async fn try_acquire_or_renew(&self, deadline: Instant) -> bool {
        let id = self.identity();
        let desc = self.lock.describe();
        let now = Utc::now();
        let mut desired = LockRecord {
            holder_identity: id.to_string(),
            lease_duration_seconds: self.config.lease_duration.as_secs().max(1),
            acquire_time: now,
            renew_time: now,
            leader_transitions: 0,
        };

        let (current, version) = match bounded(deadline, self.lock.get()).await {
            Ok(found) => found,
            Err(LockError::NotFound) => {
                let created = bounded(
                    deadline,
                    self.lock.create_or_update(desired.clone(), None),
                );
                return match created.await {
                    Ok(version) => {
                        self.observed.write().await.set_written(desired, version);
                        true
                    }
                    Err(e) => {
                        tracing::debug!(lock = %desc, error = %e, "Failed to create lock record");
                        false
                    }
                };
            }
            Err(e) => {
                tracing::info!(lock = %desc, error = %e, "Error retrieving lock record");
                return false;
            }
        };

        let held_by_other = {
            let mut observed = self.observed.write().await;
            observed.observe(current.clone(), version.clone());
            current.is_held()
                && !current.is_held_by(id)
                && observed.lease_valid(self.config.lease_duration)
        };
        if held_by_other {
            tracing::trace!(lock = %desc, leader = %current.holder_identity, "Lock is held and has not yet expired");
            return false;
        }

        if current.is_held_by(id) {
            desired.acquire_time = current.acquire_time;
            desired.leader_transitions = current.leader_transitions;
        } else {
            desired.leader_transitions = current.leader_transitions + 1;
        }

        let updated = bounded(
            deadline,
            self.lock.create_or_update(desired.clone(), Some(&version)),
        );
        match updated.await {
            Ok(new_version) => {
                self.observed.write().await.set_written(desired, new_version);
                true
            }
            Err(e) => {
                tracing::debug!(lock = %desc, error = %e, "Failed to update lock record");
                false
            }
        }
    }

    /// Fire `on_new_leader` if the observed holder changed since last report.
    async fn maybe_report_transition(&self) {
        let changed = {
            let mut observed = self.observed.write().await;
            let holder = observed.holder();
            if holder == observed.reported_leader {
                return;
            }
            observed.reported_leader = holder.clone();
            holder
        };

        if let Some(leader) = changed {
            if &leader != self.identity() {
                self.callbacks.on_new_leader(&leader);
            }
        }
    }

    /// Best-effort release: clear the holder so others can acquire at once.
    async fn release(&self) -> bool {
        let desc = self.lock.describe();
        let (record, version) = {
            let observed = self.observed.read().await;
            match (&observed.record, &observed.version) {
                (Some(record), Some(version)) if record.is_held_by(self.identity()) => {
                    (record.clone(), version.clone())
                }
                _ => return true,
            }
        };

        let now = Utc::now();
        let released = LockRecord {
            holder_identity: String::new(),
            lease_duration_seconds: 1,
            acquire_time: now,
            renew_time: now,
            leader_transitions: record.leader_transitions,
        };

        let deadline = Instant::now() + self.config.renew_deadline;
        let write = bounded(
            deadline,
            self.lock.create_or_update(released.clone(), Some(&version)),
        );
        match write.await {
            Ok(new_version) => {
                self.observed.write().await.set_written(released, new_version);
                tracing::info!(lock = %desc, id = %self.identity(), "Released leader lease");
                true
            }
            Err(e) => {
                tracing::warn!(lock = %desc, error = %e, "Failed to release lock");
                false
            }
        }
    }

    /// Last holder observed in the store, if any.
    pub async fn get_leader(&self) -> Option<Identity> {
        self.observed.read().await.holder()
    }

    /// Whether the last observed record names this identity.
    pub async fn is_leader(&self) -> bool {
        self.observed.read().await.is_held_by(self.identity())
    }

    /// Health probe for a leading instance: fails when our own lease has gone
    /// unrenewed for longer than `lease_duration + max_tolerable_expiration`.
    /// Non-leaders are always healthy.
    pub async fn check(&self, max_tolerable_expiration: Duration) -> Result<()> {
        let observed = self.observed.read().await;
        if !observed.is_held_by(self.identity()) {
            return Ok(());
        }

        let elapsed = observed.observed_at.elapsed();
        let limit = self.config.lease_duration + max_tolerable_expiration;
        if elapsed > limit {
            return Err(ElectionError::LeaseExpired(
                elapsed - self.config.lease_duration,
            ));
        }
        Ok(())
    }
}

/// Run a lock store call, failing with [`LockError::Timeout`] once
/// `deadline` passes.
async fn bounded<T, F>(deadline: Instant, call: F) -> std::result::Result<T, LockError>
where
    F: Future<Output = std::result::Result<T, LockError>>,
{
    match timeout_at(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(LockError::Timeout),
    }
}
