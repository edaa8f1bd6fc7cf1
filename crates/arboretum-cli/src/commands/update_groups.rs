//! `arboretum update-groups`: refresh the catalogue from the index snapshot.

use arboretum_core::ArboretumConfig;
use arboretum_lifecycle::CatalogueBuilder;

pub async fn update_groups(config: &ArboretumConfig) -> anyhow::Result<bool> {
    let store = super::open_store(config)?;
    let builder = CatalogueBuilder::configured(store, &config.catalogue, super::console());
    builder.refresh().await?;
    Ok(true)
}
