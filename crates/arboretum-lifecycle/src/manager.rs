//! Instance lifecycle manager.
//!
//! Owns the branch state machine: a branch is created `building`, gains an
//! address, turns `up` once its workload answers the readiness endpoint,
//! and is destroyed on request or when its prune time passes.
//!
//! ```text
//!   create ──► building ──(address, probe ok)──► up
//!                  │                              │
//!                  └──────── destroy / prune ─────┴──► (deleted)
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use arboretum_core::{ArboretumConfig, ProviderConfig};
use arboretum_provider::{
    BootScriptRenderer, HttpProber, OpenStackCli, Provisioner, Readiness, ReadinessProber,
    ServerRequest, TemplateFile, TemplateRenderer,
};
use arboretum_state::{BranchRecord, BranchStatus, GroupListing, StateStore};

use crate::error::{LifecycleError, LifecycleResult};
use crate::lifetime::Lifetime;
use crate::reporter::Reporter;
use crate::sizing::SizingPolicy;

/// The collaborators the manager calls out to.
#[derive(Clone)]
pub struct Backends {
    pub provisioner: Arc<dyn Provisioner>,
    pub prober: Arc<dyn ReadinessProber>,
    pub renderer: Arc<dyn BootScriptRenderer>,
}

impl Backends {
    /// Production adapters: the OpenStack CLI, an HTTP prober, and the boot
    /// template, which must be readable now.
    pub fn from_config(config: &ArboretumConfig) -> LifecycleResult<Self> {
        let renderer = TemplateRenderer::from_file(&config.boot.template)?;
        Ok(Self::with_renderer(config, Arc::new(renderer)))
    }

    /// Production adapters that read the boot template only when a branch
    /// is created. For callers that never create.
    pub fn deferred_template(config: &ArboretumConfig) -> Self {
        Self::with_renderer(config, Arc::new(TemplateFile::new(&config.boot.template)))
    }

    fn with_renderer(config: &ArboretumConfig, renderer: Arc<dyn BootScriptRenderer>) -> Self {
        Self {
            provisioner: Arc::new(
                OpenStackCli::new(
                    config.provider.cloud.clone(),
                    config.provider.scratch_dir.clone(),
                )
                .with_timeout(config.provider.command_timeout()),
            ),
            prober: Arc::new(HttpProber::new(
                config.probe.port,
                config.probe.path.clone(),
                config.probe.timeout(),
            )),
            renderer,
        }
    }
}

/// Fixed parts of every server request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerTemplate {
    pub image: String,
    pub network: String,
    pub security_groups: Vec<String>,
}

impl From<&ProviderConfig> for ServerTemplate {
    fn from(config: &ProviderConfig) -> Self {
        Self {
            image: config.image.clone(),
            network: config.network.clone(),
            security_groups: config.security_groups.clone(),
        }
    }
}

impl Default for ServerTemplate {
    fn default() -> Self {
        Self::from(&ProviderConfig::default())
    }
}

/// Result of [`InstanceManager::destroy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyOutcome {
    /// No branch was recorded for the group. Nothing changed.
    NotFound,
    /// The record was removed. `provider_confirmed` is false when the
    /// provider reported nothing to delete or the delete call failed.
    Destroyed { provider_confirmed: bool },
}

/// Counters from one polling cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub checked: usize,
    pub addresses_found: usize,
    pub became_ready: usize,
}

/// Server name for a group's branch.
pub fn server_name(group: &str) -> String {
    format!("arboretum-{group}-branch")
}

/// Current time as Unix epoch seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Tab-separated catalogue table.
pub fn render_table(listings: &[GroupListing]) -> String {
    let mut table = String::from("Group\tRAM needed\tTime to build");
    for listing in listings {
        table.push_str(&format!(
            "\n{}\t{}\t{}",
            listing.group_name, listing.ram, listing.build_time
        ));
    }
    table
}

pub struct InstanceManager {
    store: StateStore,
    backends: Backends,
    template: ServerTemplate,
    sizing: SizingPolicy,
    reporter: Arc<dyn Reporter>,
    create_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl InstanceManager {
    pub fn new(store: StateStore, backends: Backends, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            store,
            backends,
            template: ServerTemplate::default(),
            sizing: SizingPolicy::default(),
            reporter,
            create_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Manager using the server template and sizing rules from `config`.
    pub fn configured(
        store: StateStore,
        backends: Backends,
        config: &ArboretumConfig,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self::new(store, backends, reporter)
            .with_template(ServerTemplate::from(&config.provider))
            .with_sizing(SizingPolicy::from(&config.sizing))
    }

    pub fn with_template(mut self, template: ServerTemplate) -> Self {
        self.template = template;
        self
    }

    pub fn with_sizing(mut self, sizing: SizingPolicy) -> Self {
        self.sizing = sizing;
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    fn create_lock(&self, group: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .create_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(group.to_string()).or_default().clone()
    }

    /// Drop the map's entry for `group` unless another create still holds
    /// a handle to it.
    fn release_create_lock(&self, group: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self
            .create_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // One reference in the map, one here.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(group);
        }
    }

    // ── Create ─────────────────────────────────────────────────────

    /// Provision a branch for `group` that lives for `lifetime`.
    ///
    /// Fails without side effects on an invalid lifetime, an existing
    /// branch, or a group missing from the catalogue.
    pub async fn create(&self, group: &str, lifetime: &str) -> LifecycleResult<BranchRecord> {
        let lifetime: Lifetime = lifetime.parse()?;

        let lock = self.create_lock(group);
        let result = {
            let _guard = lock.lock().await;
            self.create_locked(group, lifetime).await
        };
        self.release_create_lock(group, lock);
        result
    }

    async fn create_locked(&self, group: &str, lifetime: Lifetime) -> LifecycleResult<BranchRecord> {
        if self.store.get_branch(group)?.is_some() {
            self.reporter.warn(&format!(
                "Can't create {group} instance, one already exists!"
            ));
            return Err(LifecycleError::Conflict(group.to_string()));
        }
        let Some(entry) = self.store.get_group(group)? else {
            self.reporter.warn(&format!(
                "Can't create {group} instance, group not recognised!"
            ));
            return Err(LifecycleError::NotFound(group.to_string()));
        };

        let boot_script = self.backends.renderer.render(group)?;
        let tier = self
            .sizing
            .select(entry.ram, self.backends.provisioner.as_ref())
            .await?;

        let request = ServerRequest {
            name: server_name(group),
            image: self.template.image.clone(),
            tier: tier.clone(),
            network: self.template.network.clone(),
            security_groups: self.template.security_groups.clone(),
            boot_script,
        };
        let server = self.backends.provisioner.create_server(&request).await?;

        let now = epoch_secs();
        let record = BranchRecord {
            group_name: group.to_string(),
            instance_ip: server.ip.clone().unwrap_or_default(),
            instance_id: server.id.clone(),
            status: BranchStatus::Building,
            prune_time: lifetime.prune_time(now),
            creation_time: now,
        };

        if let Err(e) = self.store.insert_branch(&record) {
            // Another process recorded a branch first, or the store failed.
            // Either way the new server has no record and must not leak.
            warn!(%group, instance_id = %server.id, error = %e, "branch insert failed, deleting server");
            if let Err(delete_err) = self.backends.provisioner.delete_server(&server.id).await {
                warn!(%group, instance_id = %server.id, error = %delete_err, "cleanup delete failed");
            }
            return Err(e.into());
        }

        info!(%group, instance_id = %server.id, %tier, %lifetime, "branch created");
        self.reporter.info(&format!(
            "Created new instance:\n\tID: {}\n\tGroup: {group}\n\tLifetime: {lifetime}",
            server.id
        ));
        Ok(record)
    }

    // ── Poll ───────────────────────────────────────────────────────

    /// Advance every `building` branch as far as it will go this cycle.
    ///
    /// Unassigned addresses and refused connections are normal and skipped.
    /// Any other failure is logged, the remaining branches are still
    /// processed, and the first failure is returned.
    pub async fn update_building_instances(&self) -> LifecycleResult<PollSummary> {
        let building = self.store.branches_with_status(BranchStatus::Building)?;
        let mut summary = PollSummary::default();
        let mut first_error: Option<LifecycleError> = None;

        for branch in building {
            summary.checked += 1;
            let group = branch.group_name.as_str();
            match self.advance(&branch, &mut summary).await {
                Ok(()) => {}
                Err(e) => {
                    warn!(%group, error = %e, "failed to advance building branch");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    async fn advance(&self, branch: &BranchRecord, summary: &mut PollSummary) -> LifecycleResult<()> {
        let group = branch.group_name.as_str();
        let mut ip = branch.instance_ip.clone();

        if ip.is_empty() {
            debug!(%group, "looking up branch address");
            let address = self
                .backends
                .provisioner
                .server_address(&branch.instance_id)
                .await?;
            let Some(address) = address.filter(|a| !a.is_empty()) else {
                debug!(%group, "no address assigned yet");
                return Ok(());
            };
            if !self.store.set_branch_ip(group, &address)? {
                debug!(%group, "branch changed underneath, skipping");
                return Ok(());
            }
            info!(%group, ip = %address, "branch address found");
            summary.addresses_found += 1;
            ip = address;
        }

        match self.backends.prober.probe(&ip).await? {
            Readiness::NotReady => {
                debug!(%group, %ip, "workload not finished");
            }
            Readiness::Ready => {
                if self.store.mark_branch_up(group)? {
                    info!(%group, %ip, "branch is up");
                    summary.became_ready += 1;
                }
            }
        }
        Ok(())
    }

    // ── Destroy ────────────────────────────────────────────────────

    /// Destroy the branch for `group`, if one is recorded.
    pub async fn destroy(&self, group: &str) -> LifecycleResult<DestroyOutcome> {
        let Some(branch) = self.store.get_branch(group)? else {
            self.reporter.warn(&format!(
                "{group} instance not found. It was either already destroyed or never created."
            ));
            return Ok(DestroyOutcome::NotFound);
        };

        let provider_confirmed = match self
            .backends
            .provisioner
            .delete_server(&branch.instance_id)
            .await
        {
            Ok(true) => {
                self.reporter.info(&format!("{group} instance destroyed."));
                true
            }
            Ok(false) => {
                self.reporter
                    .warn(&format!("Can't destroy {group} instance, it doesn't exist."));
                false
            }
            Err(e) => {
                warn!(%group, instance_id = %branch.instance_id, error = %e, "provider delete failed");
                self.reporter
                    .warn(&format!("Provider failed to destroy {group} instance: {e}"));
                false
            }
        };

        // The record goes regardless of the provider outcome; a server left
        // behind here must be cleaned up on the provider side.
        self.store.delete_branch(group)?;
        info!(%group, instance_id = %branch.instance_id, provider_confirmed, "branch destroyed");
        Ok(DestroyOutcome::Destroyed { provider_confirmed })
    }

    // ── Prune ──────────────────────────────────────────────────────

    /// Destroy every branch whose prune time is at or before `now`.
    /// Returns how many were destroyed.
    pub async fn prune_expired(&self, now: u64) -> LifecycleResult<usize> {
        let expired = self.store.expired_branches(now)?;
        let mut pruned = 0;
        for branch in expired {
            info!(group = %branch.group_name, prune_time = ?branch.prune_time, "pruning expired branch");
            if let DestroyOutcome::Destroyed { .. } = self.destroy(&branch.group_name).await? {
                pruned += 1;
            }
        }
        Ok(pruned)
    }

    // ── Listing ────────────────────────────────────────────────────

    /// Catalogue joined with branch status, ordered by group name.
    /// `active_only` keeps only groups whose branch is `up`.
    pub fn list_groups(&self, active_only: bool) -> LifecycleResult<Vec<GroupListing>> {
        Ok(self.store.group_listings(active_only)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeProber, FakeProvisioner, ProbeScript, RecordingReporter};
    use arboretum_state::{GroupRecord, GroupStatus, PruneTime};

    const GIB: u64 = 1024 * 1024 * 1024;

    struct Harness {
        manager: InstanceManager,
        store: StateStore,
        provisioner: Arc<FakeProvisioner>,
        prober: Arc<FakeProber>,
        reporter: Arc<RecordingReporter>,
    }

    fn harness_with(provisioner: FakeProvisioner) -> Harness {
        let store = StateStore::open_in_memory().unwrap();
        store
            .replace_groups(&[
                GroupRecord {
                    group_name: "hgi".into(),
                    ram: 2 * GIB,
                    time: "3 minutes".into(),
                },
                GroupRecord {
                    group_name: "teamA".into(),
                    ram: 4 * GIB,
                    time: "1 minute".into(),
                },
                GroupRecord {
                    group_name: "bigdata".into(),
                    ram: 60 * GIB,
                    time: "40 minutes".into(),
                },
            ])
            .unwrap();

        let provisioner = Arc::new(provisioner);
        let prober = Arc::new(FakeProber::new());
        let reporter = Arc::new(RecordingReporter::new());
        let backends = Backends {
            provisioner: provisioner.clone(),
            prober: prober.clone(),
            renderer: Arc::new(TemplateRenderer::new("#!/bin/sh\nserve {{ group_name }}\n")),
        };
        let manager = InstanceManager::new(store.clone(), backends, reporter.clone());
        Harness {
            manager,
            store,
            provisioner,
            prober,
            reporter,
        }
    }

    fn harness() -> Harness {
        harness_with(FakeProvisioner::new().with_tier("m1.xlarge", 64 * GIB))
    }

    fn branch(group: &str, status: BranchStatus, prune_time: PruneTime) -> BranchRecord {
        BranchRecord {
            group_name: group.into(),
            instance_ip: String::new(),
            instance_id: format!("id-{group}"),
            status,
            prune_time,
            creation_time: 1_000,
        }
    }

    // ── create ──

    #[tokio::test]
    async fn create_records_building_branch_and_changes_stamp() {
        let h = harness();
        let before = h.store.stamp().unwrap();

        let record = h.manager.create("hgi", "8 hours").await.unwrap();

        assert_eq!(record.status, BranchStatus::Building);
        assert_eq!(record.instance_id, "srv-1");
        assert_eq!(record.instance_ip, "");
        assert_eq!(
            record.prune_time,
            PruneTime::At(record.creation_time + 8 * 3600)
        );
        assert_eq!(h.store.get_branch("hgi").unwrap(), Some(record));
        assert_ne!(h.store.stamp().unwrap(), before);
        assert_eq!(h.reporter.infos().len(), 1);
    }

    #[tokio::test]
    async fn create_sends_configured_request() {
        let h = harness();
        h.manager.create("hgi", "25 minutes").await.unwrap();

        let created = h.provisioner.created();
        assert_eq!(created.len(), 1);
        let request = &created[0];
        assert_eq!(request.name, "arboretum-hgi-branch");
        assert_eq!(request.image, "hgi-branchserve-host");
        assert_eq!(request.tier, "m1.small");
        assert_eq!(request.network, "cloudforms_network");
        assert_eq!(request.security_groups.len(), 4);
        assert_eq!(request.boot_script, b"#!/bin/sh\nserve hgi\n");
    }

    #[tokio::test]
    async fn large_groups_get_a_sized_tier() {
        let h = harness();
        h.manager.create("bigdata", "1 day").await.unwrap();
        assert_eq!(h.provisioner.created()[0].tier, "m1.xlarge");
    }

    #[tokio::test]
    async fn forever_branch_has_no_prune_time() {
        let h = harness();
        let record = h.manager.create("hgi", "forever").await.unwrap();
        assert_eq!(record.prune_time, PruneTime::Never);

        let pruned = h.manager.prune_expired(u64::MAX).await.unwrap();
        assert_eq!(pruned, 0);
        assert!(h.store.get_branch("hgi").unwrap().is_some());
    }

    #[tokio::test]
    async fn duplicate_create_conflicts_without_provider_call() {
        let h = harness();
        let first = h.manager.create("hgi", "8 hours").await.unwrap();
        let stamp = h.store.stamp().unwrap();

        let result = h.manager.create("hgi", "2 hours").await;

        assert!(matches!(result, Err(LifecycleError::Conflict(g)) if g == "hgi"));
        assert_eq!(h.provisioner.created().len(), 1);
        assert_eq!(h.store.get_branch("hgi").unwrap(), Some(first));
        assert_eq!(h.store.stamp().unwrap(), stamp);
        assert_eq!(h.reporter.warnings().len(), 1);
    }

    #[tokio::test]
    async fn unknown_group_is_not_found() {
        let h = harness();
        let result = h.manager.create("nobody", "8 hours").await;

        assert!(matches!(result, Err(LifecycleError::NotFound(g)) if g == "nobody"));
        assert_eq!(h.provisioner.calls(), 0);
        assert!(h.store.list_branches().unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_lifetime_has_no_side_effect() {
        let h = harness();
        let stamp = h.store.stamp().unwrap();

        let result = h.manager.create("hgi", "3 fortnights").await;

        assert!(matches!(result, Err(LifecycleError::Validation(_))));
        assert_eq!(h.provisioner.calls(), 0);
        assert_eq!(h.store.stamp().unwrap(), stamp);
    }

    #[tokio::test]
    async fn provider_failure_leaves_no_record() {
        let h = harness_with(FakeProvisioner::new().failing_creates());
        let stamp = h.store.stamp().unwrap();

        let result = h.manager.create("hgi", "8 hours").await;

        assert!(matches!(result, Err(LifecycleError::Provider(_))));
        assert!(h.store.get_branch("hgi").unwrap().is_none());
        assert_eq!(h.store.stamp().unwrap(), stamp);
    }

    #[tokio::test]
    async fn concurrent_creates_yield_one_branch() {
        let h = harness();
        let (a, b) = tokio::join!(
            h.manager.create("hgi", "8 hours"),
            h.manager.create("hgi", "8 hours")
        );

        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        assert_eq!(h.provisioner.created().len(), 1);
        assert_eq!(h.store.list_branches().unwrap().len(), 1);
        assert!(h.manager.create_locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_locks_are_released_after_each_attempt() {
        let h = harness();
        h.manager.create("hgi", "8 hours").await.unwrap();
        assert!(h.manager.create("hgi", "8 hours").await.is_err());
        assert!(h.manager.create("nobody", "8 hours").await.is_err());
        h.manager.create("teamA", "1 hour").await.unwrap();

        assert!(h.manager.create_locks.lock().unwrap().is_empty());
    }

    /// Records a rival branch while the server is being created, as another
    /// process would.
    struct RacingProvisioner {
        inner: FakeProvisioner,
        store: StateStore,
    }

    #[async_trait::async_trait]
    impl Provisioner for RacingProvisioner {
        async fn create_server(
            &self,
            request: &ServerRequest,
        ) -> arboretum_provider::ProviderResult<arboretum_provider::ProvisionedServer> {
            self.store
                .insert_branch(&branch("hgi", BranchStatus::Building, PruneTime::Never))
                .unwrap();
            self.inner.create_server(request).await
        }

        async fn delete_server(&self, id: &str) -> arboretum_provider::ProviderResult<bool> {
            self.inner.delete_server(id).await
        }

        async fn server_address(
            &self,
            id: &str,
        ) -> arboretum_provider::ProviderResult<Option<String>> {
            self.inner.server_address(id).await
        }

        async fn select_tier(
            &self,
            memory_bytes: u64,
            family: &str,
        ) -> arboretum_provider::ProviderResult<String> {
            self.inner.select_tier(memory_bytes, family).await
        }
    }

    #[tokio::test]
    async fn lost_insert_race_deletes_the_new_server() {
        let h = harness();
        let racing = Arc::new(RacingProvisioner {
            inner: FakeProvisioner::new(),
            store: h.store.clone(),
        });
        let backends = Backends {
            provisioner: racing.clone(),
            prober: h.prober.clone(),
            renderer: Arc::new(TemplateRenderer::new("{{ group_name }}")),
        };
        let manager = InstanceManager::new(h.store.clone(), backends, h.reporter.clone());

        let result = manager.create("hgi", "8 hours").await;

        assert!(matches!(result, Err(LifecycleError::Conflict(g)) if g == "hgi"));
        assert_eq!(racing.inner.deleted(), vec!["srv-1"]);
        let survivor = h.store.get_branch("hgi").unwrap().unwrap();
        assert_eq!(survivor.instance_id, "id-hgi");
    }

    // ── poll ──

    #[tokio::test]
    async fn poll_without_address_is_a_noop() {
        let h = harness();
        h.manager.create("hgi", "8 hours").await.unwrap();
        let stamp = h.store.stamp().unwrap();

        for cycle in 1..=3 {
            let summary = h.manager.update_building_instances().await.unwrap();
            assert_eq!(summary.checked, 1);
            assert_eq!(summary.addresses_found, 0);
            assert_eq!(summary.became_ready, 0);
            assert_eq!(h.provisioner.address_queries(), cycle);
        }

        let branch = h.store.get_branch("hgi").unwrap().unwrap();
        assert_eq!(branch.status, BranchStatus::Building);
        assert_eq!(branch.instance_ip, "");
        assert!(h.prober.probed().is_empty());
        assert_eq!(h.store.stamp().unwrap(), stamp);

        // The next cycle after an address appears picks it up.
        h.provisioner.assign_address("srv-1", "10.0.0.8");
        let summary = h.manager.update_building_instances().await.unwrap();
        assert_eq!(summary.addresses_found, 1);
        assert_eq!(h.store.get_branch("hgi").unwrap().unwrap().instance_ip, "10.0.0.8");
    }

    #[tokio::test]
    async fn poll_records_address_then_marks_up() {
        let h = harness();
        h.manager.create("hgi", "8 hours").await.unwrap();
        h.provisioner.assign_address("srv-1", "10.0.0.5");

        let summary = h.manager.update_building_instances().await.unwrap();
        assert_eq!(summary.addresses_found, 1);
        assert_eq!(summary.became_ready, 0);
        let record = h.store.get_branch("hgi").unwrap().unwrap();
        assert_eq!(record.instance_ip, "10.0.0.5");
        assert_eq!(record.status, BranchStatus::Building);

        h.prober.script("10.0.0.5", ProbeScript::Ready);
        let before = h.store.stamp().unwrap();
        let summary = h.manager.update_building_instances().await.unwrap();
        assert_eq!(summary.became_ready, 1);
        assert_eq!(
            h.store.get_branch("hgi").unwrap().unwrap().status,
            BranchStatus::Up
        );
        assert_ne!(h.store.stamp().unwrap(), before);
        // The address is looked up once only.
        assert_eq!(h.provisioner.address_queries(), 1);
    }

    #[tokio::test]
    async fn up_branches_are_not_polled_again() {
        let h = harness();
        h.manager.create("hgi", "8 hours").await.unwrap();
        h.provisioner.assign_address("srv-1", "10.0.0.5");
        h.prober.script("10.0.0.5", ProbeScript::Ready);
        h.manager.update_building_instances().await.unwrap();
        assert_eq!(h.prober.probed().len(), 1);

        h.prober.script("10.0.0.5", ProbeScript::NotReady);
        let summary = h.manager.update_building_instances().await.unwrap();

        assert_eq!(summary.checked, 0);
        assert_eq!(h.prober.probed().len(), 1);
        assert_eq!(
            h.store.get_branch("hgi").unwrap().unwrap().status,
            BranchStatus::Up
        );
    }

    #[tokio::test]
    async fn probe_error_does_not_stop_other_branches() {
        let h = harness();
        h.manager.create("bigdata", "8 hours").await.unwrap();
        h.manager.create("hgi", "8 hours").await.unwrap();
        h.provisioner.assign_address("srv-1", "10.0.0.1");
        h.provisioner.assign_address("srv-2", "10.0.0.2");
        h.prober.script("10.0.0.1", ProbeScript::Status(500));
        h.prober.script("10.0.0.2", ProbeScript::Ready);

        let result = h.manager.update_building_instances().await;

        assert!(matches!(result, Err(LifecycleError::Probe(_))));
        assert_eq!(h.prober.probed(), vec!["10.0.0.1", "10.0.0.2"]);
        assert_eq!(
            h.store.get_branch("hgi").unwrap().unwrap().status,
            BranchStatus::Up
        );
        assert_eq!(
            h.store.get_branch("bigdata").unwrap().unwrap().status,
            BranchStatus::Building
        );
    }

    // ── destroy ──

    #[tokio::test]
    async fn destroy_missing_group_changes_nothing() {
        let h = harness();
        let stamp = h.store.stamp().unwrap();

        let outcome = h.manager.destroy("hgi").await.unwrap();

        assert_eq!(outcome, DestroyOutcome::NotFound);
        assert_eq!(h.store.stamp().unwrap(), stamp);
        assert_eq!(h.provisioner.calls(), 0);
        assert_eq!(h.reporter.warnings().len(), 1);
    }

    #[tokio::test]
    async fn destroy_deletes_server_and_record() {
        let h = harness();
        h.manager.create("hgi", "8 hours").await.unwrap();
        let stamp = h.store.stamp().unwrap();

        let outcome = h.manager.destroy("hgi").await.unwrap();

        assert_eq!(
            outcome,
            DestroyOutcome::Destroyed {
                provider_confirmed: true
            }
        );
        assert_eq!(h.provisioner.deleted(), vec!["srv-1"]);
        assert!(h.store.get_branch("hgi").unwrap().is_none());
        assert_ne!(h.store.stamp().unwrap(), stamp);
    }

    #[tokio::test]
    async fn destroy_removes_record_when_provider_fails() {
        let h = harness_with(FakeProvisioner::new().failing_deletes());
        h.store
            .insert_branch(&branch("hgi", BranchStatus::Up, PruneTime::Never))
            .unwrap();

        let outcome = h.manager.destroy("hgi").await.unwrap();

        assert_eq!(
            outcome,
            DestroyOutcome::Destroyed {
                provider_confirmed: false
            }
        );
        assert!(h.store.get_branch("hgi").unwrap().is_none());
    }

    // ── prune ──

    #[tokio::test]
    async fn prune_destroys_only_expired_branches() {
        let h = harness();
        h.store
            .insert_branch(&branch("hgi", BranchStatus::Up, PruneTime::At(500)))
            .unwrap();
        h.store
            .insert_branch(&branch("teamA", BranchStatus::Building, PruneTime::At(1_000)))
            .unwrap();
        h.store
            .insert_branch(&branch("bigdata", BranchStatus::Up, PruneTime::At(5_000)))
            .unwrap();

        let pruned = h.manager.prune_expired(1_000).await.unwrap();

        assert_eq!(pruned, 2);
        assert_eq!(h.provisioner.deleted(), vec!["id-hgi", "id-teamA"]);
        let remaining: Vec<_> = h
            .store
            .list_branches()
            .unwrap()
            .into_iter()
            .map(|b| b.group_name)
            .collect();
        assert_eq!(remaining, vec!["bigdata"]);
    }

    // ── listing ──

    #[tokio::test]
    async fn active_listing_waits_for_readiness() {
        let h = harness();
        h.manager.create("teamA", "2 hours").await.unwrap();

        let all = h.manager.list_groups(false).unwrap();
        let team = all.iter().find(|l| l.group_name == "teamA").unwrap();
        assert_eq!(team.status, GroupStatus::Building);
        assert!(h.manager.list_groups(true).unwrap().is_empty());

        h.provisioner.assign_address("srv-1", "10.1.1.1");
        h.prober.script("10.1.1.1", ProbeScript::Ready);
        h.manager.update_building_instances().await.unwrap();

        let active = h.manager.list_groups(true).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].group_name, "teamA");
        assert_eq!(active[0].status, GroupStatus::Up);
        assert_eq!(active[0].instance_ip.as_deref(), Some("10.1.1.1"));
    }

    #[test]
    fn table_rendering() {
        let h = harness();
        let table = render_table(&h.manager.list_groups(false).unwrap());
        let lines: Vec<_> = table.lines().collect();
        assert_eq!(lines[0], "Group\tRAM needed\tTime to build");
        assert_eq!(lines[1], format!("bigdata\t{}\t40 minutes", 60 * GIB));
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn backends_require_boot_template() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ArboretumConfig::default();
        config.boot.template = dir.path().join("user.sh");
        assert!(matches!(
            Backends::from_config(&config),
            Err(LifecycleError::Render(_))
        ));

        std::fs::write(&config.boot.template, "serve {{ group_name }}").unwrap();
        let backends = Backends::from_config(&config).unwrap();
        assert_eq!(backends.renderer.render("hgi").unwrap(), b"serve hgi");
    }

    #[test]
    fn deferred_backends_build_without_template() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ArboretumConfig::default();
        config.boot.template = dir.path().join("user.sh");

        let backends = Backends::deferred_template(&config);
        assert!(matches!(
            backends.renderer.render("hgi"),
            Err(arboretum_provider::RenderError::Template { .. })
        ));
    }
}
