use std::sync::Arc;

use arboretum_core::ArboretumConfig;
use arboretum_lifecycle::{Backends, ConsoleReporter, InstanceManager, Reporter};
use arboretum_state::StateStore;

pub mod create;
pub mod destroy;
pub mod groups;
pub mod serve_api;
pub mod stamp;
pub mod status;
pub mod update_groups;

fn open_store(config: &ArboretumConfig) -> anyhow::Result<StateStore> {
    Ok(StateStore::open(&config.store.path)?)
}

fn console() -> Arc<dyn Reporter> {
    Arc::new(ConsoleReporter)
}

/// Manager for commands that may create branches; the boot template must
/// be readable up front.
fn manager(config: &ArboretumConfig) -> anyhow::Result<InstanceManager> {
    let store = open_store(config)?;
    let backends = Backends::from_config(config)?;
    Ok(InstanceManager::configured(store, backends, config, console()))
}

/// Manager for commands that never create; the boot template is not read.
fn teardown_manager(config: &ArboretumConfig) -> anyhow::Result<InstanceManager> {
    let store = open_store(config)?;
    let backends = Backends::deferred_template(config);
    Ok(InstanceManager::configured(store, backends, config, console()))
}

#[cfg(test)]
fn config_in(dir: &tempfile::TempDir) -> ArboretumConfig {
    let mut config = ArboretumConfig::default();
    config.store.path = dir.path().join("arboretum.db");
    config.boot.template = dir.path().join("user.sh");
    config.provider.scratch_dir = dir.path().to_path_buf();
    config.provider.command_timeout_secs = 5;
    config
}
