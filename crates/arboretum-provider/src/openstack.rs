//! OpenStack adapter driving the `openstack` command-line client.
//!
//! Every call runs `openstack --os-cloud <cloud> ... -f json` and parses the
//! JSON document it prints, so credentials come from the usual
//! `clouds.yaml` lookup.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::compute::{smallest_tier_at_least, ProvisionedServer, Provisioner, ServerRequest, Tier};
use crate::error::{ProviderError, ProviderResult};

const MIB: u64 = 1024 * 1024;

/// Longest a single `openstack` invocation may run.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// `Provisioner` backed by the OpenStack CLI.
#[derive(Debug, Clone)]
pub struct OpenStackCli {
    program: String,
    cloud: String,
    /// Boot scripts are written here before upload.
    scratch_dir: PathBuf,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct FlavorRow {
    #[serde(rename = "Name")]
    name: String,
    /// MiB.
    #[serde(rename = "RAM")]
    ram: u64,
}

impl OpenStackCli {
    pub fn new(cloud: impl Into<String>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: "openstack".to_string(),
            cloud: cloud.into(),
            scratch_dir: scratch_dir.into(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Use a different executable (a wrapper script, a pinned path).
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run one command. The child is killed if it outlives the timeout.
    async fn run(&self, args: &[&str]) -> ProviderResult<Output> {
        debug!(program = %self.program, ?args, "running provider command");
        let output = Command::new(&self.program)
            .arg("--os-cloud")
            .arg(&self.cloud)
            .args(args)
            .kill_on_drop(true)
            .output();
        match tokio::time::timeout(self.timeout, output).await {
            Ok(result) => result.map_err(|source| ProviderError::Spawn {
                program: self.program.clone(),
                source,
            }),
            Err(_) => {
                warn!(program = %self.program, ?args, timeout = ?self.timeout, "provider command timed out");
                Err(ProviderError::Timeout {
                    command: format!("openstack {}", args.join(" ")),
                    timeout: self.timeout,
                })
            }
        }
    }

    /// Run a command that must succeed and print a JSON document.
    async fn run_json(&self, args: &[&str]) -> ProviderResult<Value> {
        let output = self.run(args).await?;
        if !output.status.success() {
            return Err(command_error(args, &output));
        }
        serde_json::from_slice(&output.stdout)
            .map_err(|e| ProviderError::Parse(format!("{}: {e}", args.join(" "))))
    }
}

fn command_error(args: &[&str], output: &Output) -> ProviderError {
    ProviderError::Command {
        command: format!("openstack {}", args.join(" ")),
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

#[async_trait]
impl Provisioner for OpenStackCli {
    async fn create_server(&self, request: &ServerRequest) -> ProviderResult<ProvisionedServer> {
        tokio::fs::create_dir_all(&self.scratch_dir).await?;
        let user_data = self.scratch_dir.join(format!("{}-user-data.sh", request.name));
        tokio::fs::write(&user_data, &request.boot_script).await?;
        let user_data_arg = user_data.to_string_lossy().into_owned();

        let mut args = vec![
            "server",
            "create",
            "--image",
            request.image.as_str(),
            "--flavor",
            request.tier.as_str(),
            "--network",
            request.network.as_str(),
            "--user-data",
            user_data_arg.as_str(),
        ];
        for group in &request.security_groups {
            args.push("--security-group");
            args.push(group.as_str());
        }
        args.extend(["-f", "json", request.name.as_str()]);

        let result = self.run_json(&args).await;
        if let Err(e) = tokio::fs::remove_file(&user_data).await {
            warn!(path = ?user_data, error = %e, "failed to remove staged boot script");
        }
        let server = result?;

        let id = server
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::Parse("server create output has no id".to_string()))?
            .to_string();
        let ip = server.get("addresses").and_then(first_address);
        Ok(ProvisionedServer { id, ip })
    }

    async fn delete_server(&self, id: &str) -> ProviderResult<bool> {
        let args = ["server", "delete", id];
        let output = self.run(&args).await?;
        if output.status.success() {
            Ok(true)
        } else {
            debug!(
                %id,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "provider refused server delete"
            );
            Ok(false)
        }
    }

    async fn server_address(&self, id: &str) -> ProviderResult<Option<String>> {
        let server = self.run_json(&["server", "show", id, "-f", "json"]).await?;
        Ok(server.get("addresses").and_then(first_address))
    }

    async fn select_tier(&self, memory_bytes: u64, family: &str) -> ProviderResult<String> {
        let listing = self.run_json(&["flavor", "list", "-f", "json"]).await?;
        let tiers = parse_flavors(listing)?;
        smallest_tier_at_least(&tiers, memory_bytes, family)
            .map(|t| t.name.clone())
            .ok_or_else(|| ProviderError::NoMatch {
                memory_bytes,
                family: family.to_string(),
            })
    }
}

fn parse_flavors(listing: Value) -> ProviderResult<Vec<Tier>> {
    let rows: Vec<FlavorRow> = serde_json::from_value(listing)
        .map_err(|e| ProviderError::Parse(format!("flavor list: {e}")))?;
    Ok(rows
        .into_iter()
        .map(|row| Tier {
            name: row.name,
            ram_bytes: row.ram * MIB,
        })
        .collect())
}

/// Extract the first address from an `addresses` field, preferring IPv4.
///
/// Older clients print `"net=10.0.0.5, fd00::5; other=..."`, newer ones
/// print `{"net": ["10.0.0.5", "fd00::5"]}`.
fn first_address(addresses: &Value) -> Option<String> {
    let candidates: Vec<String> = match addresses {
        Value::String(s) => s
            .split(';')
            .filter_map(|network| network.split_once('=').map(|(_, addrs)| addrs))
            .flat_map(|addrs| addrs.split(','))
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect(),
        Value::Object(networks) => networks
            .values()
            .filter_map(Value::as_array)
            .flatten()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };

    candidates
        .iter()
        .find(|a| a.parse::<Ipv4Addr>().is_ok())
        .or_else(|| candidates.first())
        .cloned()
}
