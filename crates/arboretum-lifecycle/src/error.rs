//! Lifecycle error types.

use thiserror::Error;

use arboretum_provider::{ProbeError, ProviderError, RenderError, TransferError};
use arboretum_state::StateError;

/// Errors surfaced by lifecycle and catalogue operations.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Caller-correctable input; nothing was done.
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("a branch already exists for group {0}")]
    Conflict(String),

    #[error("group not found in catalogue: {0}")]
    NotFound(String),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("index transfer failed: {0}")]
    Transfer(#[from] TransferError),

    #[error("readiness probe failed: {0}")]
    Probe(#[from] ProbeError),

    #[error("malformed index line {line}: {reason}")]
    MalformedIndex { line: usize, reason: String },

    #[error("boot script error: {0}")]
    Render(#[from] RenderError),

    #[error("state store error: {0}")]
    State(StateError),
}

impl From<StateError> for LifecycleError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::Conflict(group) => LifecycleError::Conflict(group),
            other => LifecycleError::State(other),
        }
    }
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;
