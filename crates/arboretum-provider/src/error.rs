//! Collaborator error types.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Compute backend failures.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    Command {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("`{command}` did not finish within {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("unexpected provider output: {0}")]
    Parse(String),

    #[error("no {family} tier with at least {memory_bytes} bytes of memory")]
    NoMatch { memory_bytes: u64, family: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Index snapshot download failures.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("download of {source_uri} exited with {status}: {stderr}")]
    Failed {
        source_uri: String,
        status: String,
        stderr: String,
    },

    #[error("download of {source_uri} did not finish within {timeout:?}")]
    Timeout {
        source_uri: String,
        timeout: Duration,
    },

    #[error("downloaded snapshot missing at {0}")]
    Missing(PathBuf),
}

/// Readiness probe outcomes other than "ready" and "not ready yet".
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("connect to {address} failed: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("http handshake with {address} failed: {reason}")]
    Handshake { address: String, reason: String },

    #[error("request to {uri} failed: {reason}")]
    Request { uri: String, reason: String },

    #[error("{uri} answered with status {status}")]
    UnexpectedStatus { uri: String, status: u16 },

    #[error("probe of {uri} timed out after {timeout:?}")]
    Timeout { uri: String, timeout: Duration },
}

/// Boot script rendering failures.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to read template {path}: {source}")]
    Template {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("group name {0:?} is not safe to embed in a boot script")]
    InvalidGroup(String),
}
