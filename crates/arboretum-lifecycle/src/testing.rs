//! In-memory collaborator doubles.
//!
//! Available to this crate's tests and, through the `testing` feature, to
//! dependent crates' tests.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use arboretum_provider::{
    IndexFetcher, ProbeError, ProviderError, ProviderResult, ProvisionedServer, Provisioner,
    Readiness, ReadinessProber, ServerRequest, Tier, TransferError, smallest_tier_at_least,
};

use crate::reporter::Reporter;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── Provisioner ───────────────────────────────────────────────────

#[derive(Debug, Default)]
struct ProvisionerState {
    tiers: Vec<Tier>,
    next_id: u64,
    created: Vec<ServerRequest>,
    deleted: Vec<String>,
    addresses: HashMap<String, String>,
    address_queries: usize,
    tier_queries: usize,
    fail_create: bool,
    fail_delete: bool,
}

/// Records every request; servers get ids `srv-1`, `srv-2`, ... and have no
/// address until [`FakeProvisioner::assign_address`] is called.
#[derive(Debug, Default)]
pub struct FakeProvisioner {
    state: Mutex<ProvisionerState>,
}

impl FakeProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tier(self, name: &str, ram_bytes: u64) -> Self {
        lock(&self.state).tiers.push(Tier {
            name: name.to_string(),
            ram_bytes,
        });
        self
    }

    /// Make every `create_server` call fail.
    pub fn failing_creates(self) -> Self {
        lock(&self.state).fail_create = true;
        self
    }

    /// Make every `delete_server` call fail.
    pub fn failing_deletes(self) -> Self {
        lock(&self.state).fail_delete = true;
        self
    }

    pub fn assign_address(&self, id: &str, ip: &str) {
        lock(&self.state)
            .addresses
            .insert(id.to_string(), ip.to_string());
    }

    pub fn created(&self) -> Vec<ServerRequest> {
        lock(&self.state).created.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        lock(&self.state).deleted.clone()
    }

    pub fn address_queries(&self) -> usize {
        lock(&self.state).address_queries
    }

    pub fn tier_queries(&self) -> usize {
        lock(&self.state).tier_queries
    }

    pub fn calls(&self) -> usize {
        let state = lock(&self.state);
        state.created.len() + state.deleted.len() + state.address_queries + state.tier_queries
    }
}

fn command_failure(command: &str) -> ProviderError {
    ProviderError::Command {
        command: command.to_string(),
        status: "exit status: 1".to_string(),
        stderr: "simulated failure".to_string(),
    }
}

#[async_trait]
impl Provisioner for FakeProvisioner {
    async fn create_server(&self, request: &ServerRequest) -> ProviderResult<ProvisionedServer> {
        let mut state = lock(&self.state);
        if state.fail_create {
            return Err(command_failure("server create"));
        }
        state.next_id += 1;
        let id = format!("srv-{}", state.next_id);
        state.created.push(request.clone());
        Ok(ProvisionedServer { id, ip: None })
    }

    async fn delete_server(&self, id: &str) -> ProviderResult<bool> {
        let mut state = lock(&self.state);
        state.deleted.push(id.to_string());
        if state.fail_delete {
            return Err(command_failure("server delete"));
        }
        Ok(true)
    }

    async fn server_address(&self, id: &str) -> ProviderResult<Option<String>> {
        let mut state = lock(&self.state);
        state.address_queries += 1;
        Ok(state.addresses.get(id).cloned())
    }

    async fn select_tier(&self, memory_bytes: u64, family: &str) -> ProviderResult<String> {
        let mut state = lock(&self.state);
        state.tier_queries += 1;
        smallest_tier_at_least(&state.tiers, memory_bytes, family)
            .map(|tier| tier.name.clone())
            .ok_or_else(|| ProviderError::NoMatch {
                memory_bytes,
                family: family.to_string(),
            })
    }
}

// ── Readiness ─────────────────────────────────────────────────────

/// Scripted probe answer for one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeScript {
    Ready,
    NotReady,
    /// The endpoint answers with this non-2xx status.
    Status(u16),
}

/// Answers from a per-address script; unscripted addresses are `NotReady`.
#[derive(Debug, Default)]
pub struct FakeProber {
    scripts: Mutex<HashMap<String, ProbeScript>>,
    probed: Mutex<Vec<String>>,
}

impl FakeProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, ip: &str, answer: ProbeScript) {
        lock(&self.scripts).insert(ip.to_string(), answer);
    }

    /// Addresses probed so far, in order.
    pub fn probed(&self) -> Vec<String> {
        lock(&self.probed).clone()
    }
}

#[async_trait]
impl ReadinessProber for FakeProber {
    async fn probe(&self, ip: &str) -> Result<Readiness, ProbeError> {
        lock(&self.probed).push(ip.to_string());
        let answer = lock(&self.scripts)
            .get(ip)
            .copied()
            .unwrap_or(ProbeScript::NotReady);
        match answer {
            ProbeScript::Ready => Ok(Readiness::Ready),
            ProbeScript::NotReady => Ok(Readiness::NotReady),
            ProbeScript::Status(status) => Err(ProbeError::UnexpectedStatus {
                uri: format!("http://{ip}:8080/api/v2"),
                status,
            }),
        }
    }
}

// ── Index ─────────────────────────────────────────────────────────

#[derive(Debug)]
enum FetchScript {
    Serve(PathBuf),
    Fail,
}

/// Serves a fixed local file, or fails every fetch.
#[derive(Debug)]
pub struct FakeFetcher {
    script: Mutex<FetchScript>,
    panics_left: Mutex<usize>,
    fetches: Mutex<usize>,
}

impl FakeFetcher {
    pub fn serving(path: impl Into<PathBuf>) -> Self {
        Self::with_script(FetchScript::Serve(path.into()))
    }

    pub fn failing() -> Self {
        Self::with_script(FetchScript::Fail)
    }

    fn with_script(script: FetchScript) -> Self {
        Self {
            script: Mutex::new(script),
            panics_left: Mutex::new(0),
            fetches: Mutex::new(0),
        }
    }

    /// Panic on the next `count` fetches before following the script.
    pub fn panicking(self, count: usize) -> Self {
        *lock(&self.panics_left) = count;
        self
    }

    pub fn fetches(&self) -> usize {
        *lock(&self.fetches)
    }
}

#[async_trait]
impl IndexFetcher for FakeFetcher {
    async fn fetch(&self) -> Result<PathBuf, TransferError> {
        *lock(&self.fetches) += 1;
        let should_panic = {
            let mut left = lock(&self.panics_left);
            if *left > 0 {
                *left -= 1;
                true
            } else {
                false
            }
        };
        if should_panic {
            panic!("simulated index fetch crash");
        }
        match &*lock(&self.script) {
            FetchScript::Serve(path) => Ok(path.clone()),
            FetchScript::Fail => Err(TransferError::Failed {
                source_uri: "s3://test/index.txt".to_string(),
                status: "exit status: 1".to_string(),
                stderr: "simulated failure".to_string(),
            }),
        }
    }
}

// ── Reporter ──────────────────────────────────────────────────────

/// Keeps every reported message.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    infos: Mutex<Vec<String>>,
    warnings: Mutex<Vec<String>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn infos(&self) -> Vec<String> {
        lock(&self.infos).clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        lock(&self.warnings).clone()
    }
}

impl Reporter for RecordingReporter {
    fn info(&self, message: &str) {
        lock(&self.infos).push(message.to_string());
    }

    fn warn(&self, message: &str) {
        lock(&self.warnings).push(message.to_string());
    }
}
