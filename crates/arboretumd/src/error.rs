//! Daemon error types.

use std::net::SocketAddr;

use thiserror::Error;

use arboretum_lifecycle::LifecycleError;
use arboretum_state::StateError;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("failed to bind control socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("control socket i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("control request to {addr} timed out")]
    Timeout { addr: SocketAddr },

    #[error("malformed status response: {0}")]
    Protocol(String),

    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

pub type DaemonResult<T> = Result<T, DaemonError>;
