//! Domain types for the Arboretum state store.
//!
//! These types represent branch records, catalogue entries, and the joined
//! listing served to the CLI and the HTTP API. All are serializable to JSON.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::StateError;

/// Tenant group identifier.
pub type GroupName = String;

// ── Branch ────────────────────────────────────────────────────────

/// One provisioned instance serving a group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BranchRecord {
    pub group_name: GroupName,
    /// Empty until the provider assigns an address.
    pub instance_ip: String,
    /// Provider-assigned identifier, required for destruction.
    pub instance_id: String,
    pub status: BranchStatus,
    pub prune_time: PruneTime,
    /// Unix timestamp (seconds) of the creation request.
    pub creation_time: u64,
}

/// Lifecycle status of a stored branch. A missing row means "down".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchStatus {
    Building,
    Up,
}

impl BranchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BranchStatus::Building => "building",
            BranchStatus::Up => "up",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StateError> {
        match s {
            "building" => Ok(BranchStatus::Building),
            "up" => Ok(BranchStatus::Up),
            other => Err(StateError::Corrupt(format!("unknown branch status: {other}"))),
        }
    }
}

impl fmt::Display for BranchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When a branch becomes eligible for automatic destruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PruneTime {
    /// Unix timestamp (seconds).
    At(u64),
    Never,
}

impl PruneTime {
    /// Whether a branch with this prune time has expired at `now`.
    pub fn is_expired(self, now: u64) -> bool {
        match self {
            PruneTime::At(at) => at <= now,
            PruneTime::Never => false,
        }
    }

    pub(crate) fn to_sql(self) -> Option<i64> {
        match self {
            PruneTime::At(at) => Some(at as i64),
            PruneTime::Never => None,
        }
    }

    pub(crate) fn from_sql(value: Option<i64>) -> Self {
        match value {
            Some(at) => PruneTime::At(at.max(0) as u64),
            None => PruneTime::Never,
        }
    }
}

// ── Catalogue ─────────────────────────────────────────────────────

/// Catalogue entry describing what a group needs to be served.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupRecord {
    pub group_name: GroupName,
    /// Required memory in bytes.
    pub ram: u64,
    /// Human-readable expected build duration, e.g. "3 minutes".
    pub time: String,
}

// ── Listing ───────────────────────────────────────────────────────

/// Status of a group as seen through the catalogue/branch join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    Down,
    Building,
    Up,
}

impl From<Option<BranchStatus>> for GroupStatus {
    fn from(status: Option<BranchStatus>) -> Self {
        match status {
            None => GroupStatus::Down,
            Some(BranchStatus::Building) => GroupStatus::Building,
            Some(BranchStatus::Up) => GroupStatus::Up,
        }
    }
}

impl fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GroupStatus::Down => "down",
            GroupStatus::Building => "building",
            GroupStatus::Up => "up",
        })
    }
}

/// A catalogue entry joined with its branch, if any.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupListing {
    pub group_name: GroupName,
    pub ram: u64,
    pub build_time: String,
    pub status: GroupStatus,
    pub prune_time: Option<PruneTime>,
    pub creation_time: Option<u64>,
    pub instance_ip: Option<String>,
}

// ── Stamp ─────────────────────────────────────────────────────────

/// Token that changes whenever the branch table changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Stamp(pub u64);

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
