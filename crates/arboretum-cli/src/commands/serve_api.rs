//! `arboretum serve-api`: run the HTTP API until Ctrl-C.

use std::sync::Arc;

use tracing::info;

use arboretum_core::ArboretumConfig;

pub async fn serve_api(config: &ArboretumConfig, port: Option<u16>) -> anyhow::Result<bool> {
    let port = port.unwrap_or(config.api.port);
    let manager = Arc::new(super::manager(config)?);
    arboretum_api::serve(manager, port, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    })
    .await?;
    Ok(true)
}
