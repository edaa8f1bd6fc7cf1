//! Index snapshot download.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::TransferError;

#[async_trait]
pub trait IndexFetcher: Send + Sync {
    /// Download the latest index snapshot and return its local path.
    async fn fetch(&self) -> Result<PathBuf, TransferError>;
}

/// Longest a snapshot download may run.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(600);

/// Downloads the snapshot with `s3cmd get -f`.
#[derive(Debug, Clone)]
pub struct S3cmdFetcher {
    program: String,
    source: String,
    dest_dir: PathBuf,
    timeout: Duration,
}

impl S3cmdFetcher {
    pub fn new(source: impl Into<String>, dest_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: "s3cmd".to_string(),
            source: source.into(),
            dest_dir: dest_dir.into(),
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Local path the snapshot lands at.
    pub fn destination(&self) -> PathBuf {
        let file_name = self
            .source
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or("index.txt");
        self.dest_dir.join(file_name)
    }
}

#[async_trait]
impl IndexFetcher for S3cmdFetcher {
    async fn fetch(&self) -> Result<PathBuf, TransferError> {
        let dest = self.destination();
        let download = Command::new(&self.program)
            .args(["get", "-f", self.source.as_str()])
            .arg(&dest)
            .kill_on_drop(true)
            .output();
        let output = match tokio::time::timeout(self.timeout, download).await {
            Ok(result) => result.map_err(|source| TransferError::Spawn {
                program: self.program.clone(),
                source,
            })?,
            Err(_) => {
                warn!(source = %self.source, timeout = ?self.timeout, "index download timed out");
                return Err(TransferError::Timeout {
                    source_uri: self.source.clone(),
                    timeout: self.timeout,
                });
            }
        };

        if !output.status.success() {
            return Err(TransferError::Failed {
                source_uri: self.source.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        debug!(
            source = %self.source,
            stdout = %String::from_utf8_lossy(&output.stdout).trim(),
            "index fetch complete"
        );

        ensure_exists(&dest)?;
        Ok(dest)
    }
}

fn ensure_exists(path: &Path) -> Result<(), TransferError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(TransferError::Missing(path.to_path_buf()))
    }
}
