//! arboretum.toml configuration parser.
//!
//! Every field has a default, so an absent or empty file yields a working
//! configuration for a single-host deployment.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const GIB: u64 = 1024 * 1024 * 1024;

/// Default TCP port of the daemon's loopback control socket.
pub const DEFAULT_CONTROL_PORT: u16 = 4114;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ArboretumConfig {
    pub store: StoreConfig,
    pub daemon: DaemonConfig,
    pub provider: ProviderConfig,
    pub sizing: SizingConfig,
    pub catalogue: CatalogueConfig,
    pub probe: ProbeConfig,
    pub boot: BootConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("_arboretum_database.db"),
        }
    }
}

/// Supervisor and worker timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub control_port: u16,
    pub tick_interval_ms: u64,
    pub accept_timeout_ms: u64,
    pub prune_interval_secs: u64,
    pub poll_interval_secs: u64,
    pub catalogue_interval_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            control_port: DEFAULT_CONTROL_PORT,
            tick_interval_ms: 1000,
            accept_timeout_ms: 500,
            prune_interval_secs: 2,
            poll_interval_secs: 5,
            catalogue_interval_secs: 3600,
        }
    }
}

impl DaemonConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn accept_timeout(&self) -> Duration {
        Duration::from_millis(self.accept_timeout_ms)
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn catalogue_interval(&self) -> Duration {
        Duration::from_secs(self.catalogue_interval_secs)
    }
}

/// Compute provider settings used for every created server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Named cloud from clouds.yaml.
    pub cloud: String,
    pub image: String,
    pub network: String,
    pub security_groups: Vec<String>,
    /// Directory where boot scripts are staged before upload.
    pub scratch_dir: PathBuf,
    /// A provider command still running after this long is killed.
    pub command_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            cloud: "openstack".to_string(),
            image: "hgi-branchserve-host".to_string(),
            network: "cloudforms_network".to_string(),
            security_groups: vec![
                "default".to_string(),
                "cloudforms_web_in".to_string(),
                "cloudforms_ssh_in".to_string(),
                "cloudforms_local_in".to_string(),
            ],
            scratch_dir: std::env::temp_dir(),
            command_timeout_secs: 120,
        }
    }
}

impl ProviderConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Tier selection thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SizingConfig {
    /// Added on top of a group's RAM requirement for system processes.
    pub headroom_bytes: u64,
    /// Requirements below this use `default_tier`.
    pub small_threshold_bytes: u64,
    pub default_tier: String,
    /// Tier families tried in order.
    pub families: Vec<String>,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            headroom_bytes: GIB,
            small_threshold_bytes: 14 * GIB,
            default_tier: "m1.small".to_string(),
            families: vec!["m".to_string(), "s2".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogueConfig {
    /// Object storage URI of the index snapshot.
    pub source: String,
    /// Local directory the snapshot is downloaded into.
    pub work_dir: PathBuf,
    pub fetch_timeout_secs: u64,
}

impl Default for CatalogueConfig {
    fn default() -> Self {
        Self {
            source: "s3://branchserve/mpistat/index.txt".to_string(),
            work_dir: PathBuf::from("."),
            fetch_timeout_secs: 600,
        }
    }
}

impl CatalogueConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// Readiness endpoint exposed by a branch once its workload is serving.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub port: u16,
    pub path: String,
    pub timeout_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            path: "/api/v2".to_string(),
            timeout_ms: 5000,
        }
    }
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootConfig {
    pub template: PathBuf,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            template: PathBuf::from("user.sh"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: 8000 }
    }
}

impl ArboretumConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ArboretumConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load `path` if given, otherwise `./arboretum.toml` when present,
    /// otherwise defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let local = Path::new("arboretum.toml");
                if local.exists() {
                    Self::from_file(local)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
