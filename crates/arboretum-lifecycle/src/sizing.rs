//! Compute tier selection for a group's memory requirement.

use tracing::debug;

use arboretum_core::SizingConfig;
use arboretum_provider::{Provisioner, ProviderError};

use crate::error::LifecycleResult;

/// Maps a RAM requirement to a provider tier.
#[derive(Debug, Clone)]
pub struct SizingPolicy {
    headroom_bytes: u64,
    small_threshold_bytes: u64,
    default_tier: String,
    families: Vec<String>,
}

impl From<&SizingConfig> for SizingPolicy {
    fn from(config: &SizingConfig) -> Self {
        Self {
            headroom_bytes: config.headroom_bytes,
            small_threshold_bytes: config.small_threshold_bytes,
            default_tier: config.default_tier.clone(),
            families: config.families.clone(),
        }
    }
}

impl Default for SizingPolicy {
    fn default() -> Self {
        Self::from(&SizingConfig::default())
    }
}

impl SizingPolicy {
    /// Memory a branch for this group needs, including headroom.
    pub fn required_bytes(&self, group_ram: u64) -> u64 {
        group_ram.saturating_add(self.headroom_bytes)
    }

    /// Pick a tier: the default tier under the threshold, otherwise the
    /// smallest covering tier of the first family that has one.
    pub async fn select(
        &self,
        group_ram: u64,
        provisioner: &dyn Provisioner,
    ) -> LifecycleResult<String> {
        let required = self.required_bytes(group_ram);
        if required < self.small_threshold_bytes {
            return Ok(self.default_tier.clone());
        }

        let mut last_miss = None;
        for family in &self.families {
            match provisioner.select_tier(required, family).await {
                Ok(tier) => {
                    debug!(%tier, %family, required, "tier selected");
                    return Ok(tier);
                }
                Err(e @ ProviderError::NoMatch { .. }) => {
                    debug!(%family, required, "no matching tier, trying next family");
                    last_miss = Some(e);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(last_miss
            .unwrap_or_else(|| ProviderError::NoMatch {
                memory_bytes: required,
                family: String::new(),
            })
            .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LifecycleError;
    use crate::testing::FakeProvisioner;

    const GIB: u64 = 1024 * 1024 * 1024;

    #[tokio::test]
    async fn small_groups_use_default_tier() {
        let provisioner = FakeProvisioner::new();
        let policy = SizingPolicy::default();

        let tier = policy.select(12 * GIB, &provisioner).await.unwrap();

        assert_eq!(tier, "m1.small");
        assert_eq!(provisioner.tier_queries(), 0);
    }

    #[tokio::test]
    async fn headroom_pushes_over_threshold() {
        let provisioner = FakeProvisioner::new().with_tier("m1.large", 16 * GIB);
        let policy = SizingPolicy::default();

        // 13 GiB + 1 GiB headroom reaches the 14 GiB threshold.
        let tier = policy.select(13 * GIB, &provisioner).await.unwrap();

        assert_eq!(tier, "m1.large");
    }

    #[tokio::test]
    async fn falls_back_to_secondary_family() {
        let provisioner = FakeProvisioner::new()
            .with_tier("m1.xlarge", 32 * GIB)
            .with_tier("s2.huge", 256 * GIB);
        let policy = SizingPolicy::default();

        let tier = policy.select(100 * GIB, &provisioner).await.unwrap();

        assert_eq!(tier, "s2.huge");
        assert_eq!(provisioner.tier_queries(), 2);
    }

    #[tokio::test]
    async fn no_family_matches() {
        let provisioner = FakeProvisioner::new().with_tier("m1.xlarge", 32 * GIB);
        let policy = SizingPolicy::default();

        let result = policy.select(500 * GIB, &provisioner).await;

        assert!(matches!(
            result,
            Err(LifecycleError::Provider(ProviderError::NoMatch { family, .. })) if family == "s2"
        ));
    }
}
