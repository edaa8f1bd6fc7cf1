//! The three worker loops the supervisor keeps alive.
//!
//! Each loop does one unit of work, then waits for its interval or the stop
//! signal, whichever comes first. A failed unit is logged and the loop
//! carries on; only a panic ends a worker early.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info};

use arboretum_core::ArboretumConfig;
use arboretum_lifecycle::{
    Backends, CatalogueBuilder, InstanceManager, LogReporter, Reporter, epoch_secs,
};
use arboretum_state::StateStore;

use crate::error::{DaemonError, DaemonResult};

/// Worker kinds, in status-report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerKind {
    Prune,
    Poll,
    Catalogue,
}

impl WorkerKind {
    pub const ALL: [WorkerKind; 3] = [WorkerKind::Prune, WorkerKind::Poll, WorkerKind::Catalogue];

    pub fn name(self) -> &'static str {
        match self {
            WorkerKind::Prune => "prune",
            WorkerKind::Poll => "poll",
            WorkerKind::Catalogue => "catalogue",
        }
    }
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WorkerKind {
    type Err = DaemonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkerKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| DaemonError::Protocol(format!("unknown worker {s:?}")))
    }
}

/// Everything the workers share. Built once per daemon.
pub struct WorkerContext {
    pub manager: Arc<InstanceManager>,
    pub catalogue: CatalogueBuilder,
    pub prune_interval: Duration,
    pub poll_interval: Duration,
    pub catalogue_interval: Duration,
}

impl WorkerContext {
    /// Context with default intervals.
    pub fn new(manager: Arc<InstanceManager>, catalogue: CatalogueBuilder) -> Self {
        let defaults = arboretum_core::DaemonConfig::default();
        Self {
            manager,
            catalogue,
            prune_interval: defaults.prune_interval(),
            poll_interval: defaults.poll_interval(),
            catalogue_interval: defaults.catalogue_interval(),
        }
    }

    /// Production context: the configured store and adapters, reporting to
    /// the log.
    pub fn from_config(config: &ArboretumConfig) -> DaemonResult<Self> {
        let store = StateStore::open(&config.store.path)?;
        info!(path = %config.store.path.display(), "state store opened");

        let reporter: Arc<dyn Reporter> = Arc::new(LogReporter);
        let backends = Backends::from_config(config)?;
        let manager = InstanceManager::configured(store.clone(), backends, config, reporter.clone());
        let catalogue = CatalogueBuilder::configured(store, &config.catalogue, reporter);

        Ok(Self::new(Arc::new(manager), catalogue).with_intervals(
            config.daemon.prune_interval(),
            config.daemon.poll_interval(),
            config.daemon.catalogue_interval(),
        ))
    }

    pub fn with_intervals(mut self, prune: Duration, poll: Duration, catalogue: Duration) -> Self {
        self.prune_interval = prune;
        self.poll_interval = poll;
        self.catalogue_interval = catalogue;
        self
    }

    fn interval(&self, kind: WorkerKind) -> Duration {
        match kind {
            WorkerKind::Prune => self.prune_interval,
            WorkerKind::Poll => self.poll_interval,
            WorkerKind::Catalogue => self.catalogue_interval,
        }
    }
}

/// Worker body: run units of `kind` until the stop signal is set.
pub async fn run_worker(
    kind: WorkerKind,
    ctx: Arc<WorkerContext>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(worker = %kind, "worker started");
    let interval = ctx.interval(kind);

    loop {
        if *shutdown.borrow() {
            break;
        }

        run_unit(kind, &ctx).await;

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => break,
        }
    }

    info!(worker = %kind, "worker stopped");
}

async fn run_unit(kind: WorkerKind, ctx: &WorkerContext) {
    match kind {
        WorkerKind::Prune => match ctx.manager.prune_expired(epoch_secs()).await {
            Ok(0) => {}
            Ok(pruned) => info!(pruned, "expired branches pruned"),
            Err(e) => error!(worker = %kind, error = %e, "prune cycle failed"),
        },
        WorkerKind::Poll => match ctx.manager.update_building_instances().await {
            Ok(summary) if summary.checked > 0 => debug!(
                checked = summary.checked,
                addresses_found = summary.addresses_found,
                became_ready = summary.became_ready,
                "building branches polled"
            ),
            Ok(_) => {}
            Err(e) => error!(worker = %kind, error = %e, "poll cycle failed"),
        },
        WorkerKind::Catalogue => match ctx.catalogue.refresh().await {
            Ok(groups) => info!(groups, "catalogue refreshed"),
            Err(e) => error!(worker = %kind, error = %e, "catalogue refresh failed"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arboretum_lifecycle::testing::{FakeFetcher, FakeProber, FakeProvisioner, RecordingReporter};
    use arboretum_provider::TemplateRenderer;
    use arboretum_state::{BranchRecord, BranchStatus, PruneTime};

    fn context(
        store: &StateStore,
        fetcher: Arc<FakeFetcher>,
        catalogue_interval: Duration,
    ) -> Arc<WorkerContext> {
        let reporter = Arc::new(RecordingReporter::new());
        let backends = Backends {
            provisioner: Arc::new(FakeProvisioner::new()),
            prober: Arc::new(FakeProber::new()),
            renderer: Arc::new(TemplateRenderer::new("{{ group_name }}")),
        };
        let manager = InstanceManager::new(store.clone(), backends, reporter.clone());
        let catalogue = CatalogueBuilder::new(store.clone(), fetcher, reporter);
        Arc::new(WorkerContext::new(Arc::new(manager), catalogue).with_intervals(
            Duration::from_millis(20),
            Duration::from_millis(20),
            catalogue_interval,
        ))
    }

    #[test]
    fn kinds_round_trip_through_names() {
        for kind in WorkerKind::ALL {
            assert_eq!(kind.name().parse::<WorkerKind>().unwrap(), kind);
        }
        assert!("reaper".parse::<WorkerKind>().is_err());
    }

    #[tokio::test]
    async fn prune_worker_removes_expired_branch() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .insert_branch(&BranchRecord {
                group_name: "hgi".into(),
                instance_ip: String::new(),
                instance_id: "srv-9".into(),
                status: BranchStatus::Up,
                prune_time: PruneTime::At(1),
                creation_time: 0,
            })
            .unwrap();
        let ctx = context(&store, Arc::new(FakeFetcher::failing()), Duration::from_secs(3600));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(run_worker(WorkerKind::Prune, ctx, rx));
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send_replace(true);
        handle.await.unwrap();

        assert!(store.get_branch("hgi").unwrap().is_none());
    }

    #[tokio::test]
    async fn catalogue_worker_stops_during_its_wait() {
        let store = StateStore::open_in_memory().unwrap();
        let fetcher = Arc::new(FakeFetcher::failing());
        let ctx = context(&store, fetcher.clone(), Duration::from_secs(3600));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(run_worker(WorkerKind::Catalogue, ctx, rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fetcher.fetches(), 1);
        tx.send_replace(true);

        // The hour-long wait is cut short.
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("worker should stop promptly")
            .unwrap();
    }

    #[tokio::test]
    async fn worker_survives_failing_units() {
        let store = StateStore::open_in_memory().unwrap();
        let fetcher = Arc::new(FakeFetcher::failing());
        let ctx = context(&store, fetcher.clone(), Duration::from_millis(10));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(run_worker(WorkerKind::Catalogue, ctx, rx));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!handle.is_finished());
        assert!(fetcher.fetches() > 1);

        tx.send_replace(true);
        handle.await.unwrap();
    }
}
