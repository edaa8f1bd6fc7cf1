//! `arboretum create`: provision a branch for a group.

use arboretum_core::ArboretumConfig;
use arboretum_lifecycle::LifecycleError;

pub async fn create(config: &ArboretumConfig, group: &str, lifetime: &str) -> anyhow::Result<bool> {
    match super::manager(config)?.create(group, lifetime).await {
        Ok(_) => Ok(true),
        // Already reported through the console.
        Err(LifecycleError::Conflict(_) | LifecycleError::NotFound(_)) => Ok(false),
        Err(e) => Err(e.into()),
    }
}
