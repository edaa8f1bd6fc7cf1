//! Compute provisioning contract.

use async_trait::async_trait;

use crate::error::ProviderResult;

/// Everything needed to boot one branch server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerRequest {
    pub name: String,
    pub image: String,
    pub tier: String,
    pub network: String,
    pub security_groups: Vec<String>,
    pub boot_script: Vec<u8>,
}

/// A server the provider accepted. The address is usually not known yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedServer {
    pub id: String,
    pub ip: Option<String>,
}

/// A provider sizing class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tier {
    pub name: String,
    pub ram_bytes: u64,
}

#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn create_server(&self, request: &ServerRequest) -> ProviderResult<ProvisionedServer>;

    /// Returns false when the provider reports there was nothing to delete.
    async fn delete_server(&self, id: &str) -> ProviderResult<bool>;

    /// Current address of a server, `None` while unassigned.
    async fn server_address(&self, id: &str) -> ProviderResult<Option<String>>;

    /// Smallest tier of `family` with at least `memory_bytes` of RAM.
    /// Fails with `ProviderError::NoMatch` if there is none.
    async fn select_tier(&self, memory_bytes: u64, family: &str) -> ProviderResult<String>;
}

/// Pick the smallest tier named `family*` that covers `memory_bytes`.
pub fn smallest_tier_at_least<'a>(
    tiers: &'a [Tier],
    memory_bytes: u64,
    family: &str,
) -> Option<&'a Tier> {
    tiers
        .iter()
        .filter(|t| t.name.starts_with(family) && t.ram_bytes >= memory_bytes)
        .min_by(|a, b| a.ram_bytes.cmp(&b.ram_bytes).then_with(|| a.name.cmp(&b.name)))
}
