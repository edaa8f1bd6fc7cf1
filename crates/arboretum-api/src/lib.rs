//! arboretum-api — HTTP API for Arboretum.
//!
//! Serves the group catalogue and change stamp to front ends, and lets them
//! request or tear down a group's branch.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/groups` | Catalogue with branch status (`?active=true` for up only) |
//! | GET | `/groups/{name}` | One group's listing |
//! | POST | `/groups/{name}/branch` | Create a branch (`{"lifetime": "8 hours"}`) |
//! | DELETE | `/groups/{name}/branch` | Destroy the group's branch |
//! | GET | `/stamp` | Current change stamp |

pub mod handlers;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tracing::info;

use arboretum_lifecycle::InstanceManager;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub manager: Arc<InstanceManager>,
}

/// Build the API router.
pub fn build_router(manager: Arc<InstanceManager>) -> Router {
    let state = ApiState { manager };

    Router::new()
        .route("/groups", get(handlers::list_groups))
        .route("/groups/{name}", get(handlers::get_group))
        .route(
            "/groups/{name}/branch",
            axum::routing::post(handlers::create_branch).delete(handlers::destroy_branch),
        )
        .route("/stamp", get(handlers::get_stamp))
        .with_state(state)
}

/// Serve the API on `0.0.0.0:port` until `shutdown` resolves.
pub async fn serve(
    manager: Arc<InstanceManager>,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API server starting");
    axum::serve(listener, build_router(manager))
        .with_graceful_shutdown(shutdown)
        .await
}
