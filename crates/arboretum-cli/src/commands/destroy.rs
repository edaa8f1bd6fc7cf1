//! `arboretum destroy`: tear down a group's branch.

use arboretum_core::ArboretumConfig;
use arboretum_lifecycle::DestroyOutcome;

pub async fn destroy(config: &ArboretumConfig, group: &str) -> anyhow::Result<bool> {
    match super::teardown_manager(config)?.destroy(group).await? {
        DestroyOutcome::Destroyed { .. } => Ok(true),
        DestroyOutcome::NotFound => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arboretum_state::{BranchRecord, BranchStatus, PruneTime, StateStore};

    #[tokio::test]
    async fn destroy_of_unknown_group_fails_quietly() {
        let dir = tempfile::tempdir().unwrap();
        let config = super::super::config_in(&dir);

        assert!(!destroy(&config, "hgi").await.unwrap());
    }

    #[tokio::test]
    async fn destroy_needs_no_boot_template() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = super::super::config_in(&dir);
        // Whatever the provider says, the local record goes.
        config.provider.cloud = "arboretum-test-cloud".into();
        assert!(!config.boot.template.exists());

        let store = StateStore::open(&config.store.path).unwrap();
        store
            .insert_branch(&BranchRecord {
                group_name: "hgi".into(),
                instance_ip: String::new(),
                instance_id: "srv-1".into(),
                status: BranchStatus::Building,
                prune_time: PruneTime::Never,
                creation_time: 0,
            })
            .unwrap();

        assert!(destroy(&config, "hgi").await.unwrap());
        assert!(store.get_branch("hgi").unwrap().is_none());
    }
}
