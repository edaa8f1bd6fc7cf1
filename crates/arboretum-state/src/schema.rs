//! Table definitions for the Arboretum state store.
//!
//! `branches.prune_time IS NULL` is the "never expires" sentinel. Times are
//! Unix epoch seconds.

/// Tables owned by the store, in creation order.
pub const TABLES: [&str; 3] = ["branches", "groups", "info"];

/// Name of the change stamp row in `info`.
pub const STAMP_KEY: &str = "stamp";

/// Upper bound (inclusive) of a generated stamp token.
pub const STAMP_MAX: u64 = 999_999_999_999;

pub(crate) const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS branches (
    group_name TEXT PRIMARY KEY,
    instance_ip TEXT NOT NULL DEFAULT '',
    prune_time INTEGER,
    instance_id TEXT NOT NULL,
    creation_time INTEGER NOT NULL,
    status TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS groups (
    group_name TEXT PRIMARY KEY,
    ram INTEGER NOT NULL,
    time TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS info (
    name TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS branches_status ON branches (status);
"#;
