//! Group catalogue refresh from the index snapshot.
//!
//! The snapshot is a text file: one header line, then one line per group
//! of the form `name raw_seconds ram_bytes`, whitespace separated.

use std::sync::Arc;

use tracing::{debug, error, info};

use arboretum_core::CatalogueConfig;
use arboretum_provider::{IndexFetcher, S3cmdFetcher, TransferError};
use arboretum_state::{GroupRecord, StateStore};

use crate::error::{LifecycleError, LifecycleResult};
use crate::reporter::Reporter;

pub struct CatalogueBuilder {
    store: StateStore,
    fetcher: Arc<dyn IndexFetcher>,
    reporter: Arc<dyn Reporter>,
}

impl CatalogueBuilder {
    pub fn new(
        store: StateStore,
        fetcher: Arc<dyn IndexFetcher>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            store,
            fetcher,
            reporter,
        }
    }

    /// Builder downloading with `s3cmd` as configured.
    pub fn configured(
        store: StateStore,
        config: &CatalogueConfig,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        let fetcher = S3cmdFetcher::new(config.source.clone(), config.work_dir.clone())
            .with_timeout(config.fetch_timeout());
        Self::new(store, Arc::new(fetcher), reporter)
    }

    /// Fetch a fresh snapshot and replace the catalogue with it.
    ///
    /// The catalogue is left untouched if the fetch fails or the snapshot
    /// does not parse. Returns the number of groups written.
    pub async fn refresh(&self) -> LifecycleResult<usize> {
        self.reporter.info("Updating group database...");

        let path = match self.fetcher.fetch().await {
            Ok(path) => path,
            Err(e) => {
                error!(error = %e, "index fetch failed");
                self.reporter.warn(&format!("Index fetch failed: {e}"));
                return Err(e.into());
            }
        };
        self.reporter.info("Index fetch complete.");

        let contents = tokio::fs::read_to_string(&path).await.map_err(|e| {
            error!(path = %path.display(), error = %e, "downloaded index unreadable");
            TransferError::Missing(path.clone())
        })?;
        let groups = parse_index(&contents).inspect_err(|e| {
            self.reporter.warn(&format!("Index at {} rejected: {e}", path.display()));
        })?;

        let written = self.store.replace_groups(&groups)?;
        info!(groups = written, path = %path.display(), "group catalogue replaced");
        self.reporter.info("Group database generated successfully.");
        Ok(written)
    }
}

/// Parse a snapshot into catalogue entries. Line numbers in errors are
/// one-based and count the header.
pub fn parse_index(contents: &str) -> LifecycleResult<Vec<GroupRecord>> {
    let mut groups = Vec::new();
    for (idx, line) in contents.lines().enumerate().skip(1) {
        let line_no = idx + 1;
        if line.trim().is_empty() {
            continue;
        }
        let malformed = |reason: String| LifecycleError::MalformedIndex {
            line: line_no,
            reason,
        };

        let fields: Vec<&str> = line.split_whitespace().collect();
        let [name, raw_seconds, ram] = fields[..] else {
            return Err(malformed(format!(
                "expected 3 fields, found {}",
                fields.len()
            )));
        };
        let seconds: f64 = raw_seconds
            .parse()
            .ok()
            .filter(|s: &f64| s.is_finite() && *s >= 0.0)
            .ok_or_else(|| malformed(format!("invalid build seconds {raw_seconds:?}")))?;
        let ram: u64 = ram
            .parse()
            .map_err(|_| malformed(format!("invalid ram bytes {ram:?}")))?;

        debug!(group = name, seconds, ram, "index entry");
        groups.push(GroupRecord {
            group_name: name.to_string(),
            ram,
            time: format_build_time(seconds),
        });
    }
    Ok(groups)
}

/// Whole minutes rounded up, at least one: `"1 minute"`, `"N minutes"`.
pub fn format_build_time(seconds: f64) -> String {
    let minutes = ((seconds / 60.0).ceil() as u64).max(1);
    if minutes == 1 {
        "1 minute".to_string()
    } else {
        format!("{minutes} minutes")
    }
}
