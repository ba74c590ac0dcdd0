use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::{ElectionConfig, ElectionDescriptor};
use crate::election::{LeaderCallbacks, LeaderElector, LeadershipFlag, LeadershipState};
use crate::error::Result;
use crate::identity::Identity;
use crate::lock::LockBackend;

/// Future returned by leader work closures.
pub type WorkFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

type StartWork = Arc<dyn Fn(CancellationToken) -> WorkFuture + Send + Sync>;
type StopWork = Arc<dyn Fn() -> WorkFuture + Send + Sync>;
type NewLeaderHook = Arc<dyn Fn(&Identity) + Send + Sync>;

/// One participant in a named leader election.
///
/// Owns the election descriptor, the identity and the leadership flag, and
/// runs caller-supplied work when leadership starts and stops:
///
/// 1. [`LeaderElection::builder`] resolves the identity and lock handle and
///    validates the timing config; any failure is returned from `build`
/// 2. [`LeaderElection::run`] drives the election until the token is cancelled
/// 3. Start/stop work is spawned on its own task and never awaited by the
///    election loop
/// 4. [`LeaderElection::is_leader`] can be read from any thread at any time
pub struct LeaderElection {
    descriptor: ElectionDescriptor,
    id: Identity,
    elector: LeaderElector,
    state: Arc<LeadershipFlag>,
    started: AtomicBool,
}

impl LeaderElection {
    pub fn builder(
        name: impl Into<String>,
        namespace: impl Into<String>,
        backend: Arc<dyn LockBackend>,
    ) -> LeaderElectionBuilder {
        LeaderElectionBuilder {
            descriptor: ElectionDescriptor::new(name, namespace),
            backend,
            identity: None,
            config: ElectionConfig::default(),
            start_work: None,
            stop_work: None,
            on_new_leader: None,
        }
    }

    /// Election with default timings and no leader work.
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        backend: Arc<dyn LockBackend>,
    ) -> Result<Self> {
        Self::builder(name, namespace, backend).build()
    }

    /// Run the election until `cancel` fires.
    ///
    /// Returns once cleanup is done: the lease is released (if configured and
    /// held) and stop work has been dispatched. May only be called once per
    /// instance; later calls log a warning and return immediately.
    pub async fn run(&self, cancel: CancellationToken) {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::warn!(id = %self.id, "Leader election already started, ignoring run");
            return;
        }

        let span = tracing::info_span!(
            "leader_election",
            name = %self.descriptor.name,
            namespace = %self.descriptor.namespace,
            id = %self.id,
        );
        self.elector.run(cancel).instrument(span).await;
    }

    pub fn id(&self) -> &Identity {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn namespace(&self) -> &str {
        &self.descriptor.namespace
    }

    pub fn descriptor(&self) -> &ElectionDescriptor {
        &self.descriptor
    }

    pub fn config(&self) -> &ElectionConfig {
        self.elector.config()
    }

    /// Lock-free check of the current leadership state.
    pub fn is_leader(&self) -> bool {
        self.state.is_leader()
    }

    pub fn state(&self) -> LeadershipState {
        self.state.load()
    }

    /// Holder last seen in the lock store, which may be this instance.
    pub async fn leader(&self) -> Option<Identity> {
        self.elector.get_leader().await
    }

    /// Fails if this instance believes it leads but its lease has been stale
    /// for more than `max_tolerable_expiration` past the lease duration.
    pub async fn check_health(&self, max_tolerable_expiration: Duration) -> Result<()> {
        self.elector.check(max_tolerable_expiration).await
    }
}

/// Builder for [`LeaderElection`].
pub struct LeaderElectionBuilder {
    descriptor: ElectionDescriptor,
    backend: Arc<dyn LockBackend>,
    identity: Option<Identity>,
    config: ElectionConfig,
    start_work: Option<StartWork>,
    stop_work: Option<StopWork>,
    on_new_leader: Option<NewLeaderHook>,
}

impl LeaderElectionBuilder {
    /// Use a fixed identity instead of `<hostname>_<uuid>`.
    pub fn identity(mut self, identity: impl Into<Identity>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn config(mut self, config: ElectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Work to start when this instance becomes leader. The token passed in
    /// is cancelled when that leadership ends.
    pub fn on_started_leading<F, Fut>(mut self, work: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.start_work = Some(Arc::new(move |leading: CancellationToken| -> WorkFuture {
            Box::pin(work(leading))
        }));
        self
    }

    /// Work to run when this instance stops leading.
    pub fn on_stopped_leading<F, Fut>(mut self, work: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.stop_work = Some(Arc::new(move || -> WorkFuture { Box::pin(work()) }));
        self
    }

    /// Notified when another instance is observed holding the lock.
    pub fn on_new_leader<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Identity) + Send + Sync + 'static,
    {
        self.on_new_leader = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> Result<LeaderElection> {
        self.descriptor.validate()?;
        self.config.validate()?;

        let id = match self.identity {
            Some(id) => id,
            None => Identity::generate()?,
        };
        let lock = self.backend.lock(&self.descriptor, &id)?;

        let state = Arc::new(LeadershipFlag::new());
        let dispatcher = Arc::new(WorkDispatcher {
            id: id.clone(),
            state: state.clone(),
            start_work: self.start_work,
            stop_work: self.stop_work,
            on_new_leader: self.on_new_leader,
        });
        let elector = LeaderElector::new(self.config, lock, dispatcher)?;

        Ok(LeaderElection {
            descriptor: self.descriptor,
            id,
            elector,
            state,
            started: AtomicBool::new(false),
        })
    }
}

/// Bridges elector transitions to the leadership flag and caller work.
struct WorkDispatcher {
    id: Identity,
    state: Arc<LeadershipFlag>,
    start_work: Option<StartWork>,
    stop_work: Option<StopWork>,
    on_new_leader: Option<NewLeaderHook>,
}

impl LeaderCallbacks for WorkDispatcher {
    fn on_started_leading(&self, leading: CancellationToken) {
        self.state.store(LeadershipState::Leader);
        tracing::info!(id = %self.id, "Started leading");

        if let Some(work) = self.start_work.clone() {
            spawn_supervised(self.id.clone(), "start", async move { work(leading).await });
        }
    }

    fn on_stopped_leading(&self) {
        self.state.store(LeadershipState::FormerLeader);
        tracing::info!(id = %self.id, "Stopped leading");

        if let Some(work) = self.stop_work.clone() {
            spawn_supervised(self.id.clone(), "stop", async move { work().await });
        }
    }

    fn on_new_leader(&self, identity: &Identity) {
        if identity == &self.id {
            return;
        }
        tracing::info!(
            id = %self.id,
            leader = %identity,
            "Another instance has been elected as leader"
        );

        if let Some(hook) = self.on_new_leader.clone() {
            let leader = identity.clone();
            spawn_supervised(self.id.clone(), "new_leader", async move { hook(&leader) });
        }
    }
}

/// Spawn `work` and log if it panics, so a failing callback never reaches
/// the election loop.
fn spawn_supervised<F>(id: Identity, kind: &'static str, work: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let handle = tokio::spawn(work);
    tokio::spawn(async move {
        if let Err(e) = handle.await {
            if e.is_panic() {
                tracing::error!(id = %id, work = kind, "Leader work panicked");
            } else {
                tracing::debug!(id = %id, work = kind, error = %e, "Leader work was cancelled");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ElectionError;
    use crate::lock::InMemoryLockStore;

    fn store() -> Arc<dyn LockBackend> {
        Arc::new(InMemoryLockStore::new())
    }

    #[test]
    fn accessors_available_before_run() {
        let election = LeaderElection::builder("scheduler", "default", store())
            .identity("node-a")
            .build()
            .unwrap();

        assert_eq!(election.id().as_str(), "node-a");
        assert_eq!(election.name(), "scheduler");
        assert_eq!(election.namespace(), "default");
        assert_eq!(election.descriptor().to_string(), "default/scheduler");
        assert_eq!(election.state(), LeadershipState::Standby);
        assert!(!election.is_leader());
    }

    #[test]
    fn generated_identity_has_suffix() {
        let election = LeaderElection::new("scheduler", "default", store()).unwrap();
        assert!(election.id().as_str().contains('_'));
    }

    #[test]
    fn invalid_timings_fail_build() {
        let config = ElectionConfig::new(
            Duration::from_secs(2),
            Duration::from_secs(10),
            Duration::from_secs(2),
        );
        let result = LeaderElection::builder("scheduler", "default", store())
            .identity("node-a")
            .config(config)
            .build();
        assert!(matches!(result, Err(ElectionError::InvalidConfig(_))));
    }

    #[test]
    fn empty_name_fails_build() {
        let result = LeaderElection::builder("", "default", store())
            .identity("node-a")
            .build();
        assert!(matches!(result, Err(ElectionError::InvalidConfig(_))));
    }

    struct BrokenBackend;

    impl LockBackend for BrokenBackend {
        fn lock(
            &self,
            descriptor: &ElectionDescriptor,
            _identity: &Identity,
        ) -> Result<Arc<dyn crate::lock::ResourceLock>> {
            Err(ElectionError::LockConstruction(descriptor.to_string()))
        }
    }

    #[test]
    fn lock_construction_failure_fails_build() {
        let result = LeaderElection::builder("scheduler", "default", Arc::new(BrokenBackend))
            .identity("node-a")
            .build();
        assert!(matches!(result, Err(ElectionError::LockConstruction(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn second_run_is_ignored() {
        let election = LeaderElection::builder("scheduler", "default", store())
            .identity("node-a")
            .build()
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        election.run(cancel.clone()).await;
        assert!(!election.is_leader());

        // Returns immediately even with a live token.
        let live = CancellationToken::new();
        election.run(live).await;
        assert!(!election.is_leader());
    }
}
