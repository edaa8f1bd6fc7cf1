//! StateStore — SQLite-backed state persistence for Arboretum.
//!
//! Provides typed operations over branches, the group catalogue, and the
//! change stamp. Every branch mutation runs in an immediate transaction that
//! also rewrites the stamp, so concurrent writers (daemon workers, the CLI)
//! never observe a branch change without a stamp change.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::schema::{CREATE_TABLES, STAMP_KEY, STAMP_MAX, TABLES};
use crate::types::*;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const BRANCH_COLUMNS: &str =
    "group_name, instance_ip, prune_time, instance_id, creation_time, status";

/// Thread-safe state store backed by SQLite.
#[derive(Debug, Clone)]
pub struct StateStore {
    conn: Arc<Mutex<Connection>>,
}

/// Branch row as stored, before the status column is validated.
type BranchRow = (String, String, Option<i64>, String, i64, String);

fn read_branch_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<BranchRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn into_branch(row: BranchRow) -> StateResult<BranchRecord> {
    let (group_name, instance_ip, prune_time, instance_id, creation_time, status) = row;
    Ok(BranchRecord {
        group_name,
        instance_ip,
        instance_id,
        status: BranchStatus::parse(&status)?,
        prune_time: PruneTime::from_sql(prune_time),
        creation_time: creation_time.max(0) as u64,
    })
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    ///
    /// Refuses files that already hold tables this store does not own.
    pub fn open(path: &Path) -> StateResult<Self> {
        let conn = Connection::open(path).map_err(|e| StateError::Open(e.to_string()))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        Self::check_recognised(&conn)?;
        let store = Self::from_connection(conn)?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| StateError::Open(e.to_string()))?;
        let store = Self::from_connection(conn)?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn from_connection(conn: Connection) -> StateResult<Self> {
        conn.execute_batch(CREATE_TABLES)?;
        conn.execute(
            "INSERT OR IGNORE INTO info (name, value) VALUES (?1, ?2)",
            params![STAMP_KEY, fresh_stamp(None) as i64],
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn check_recognised(conn: &Connection) -> StateResult<()> {
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        )?;
        let foreign: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|name| !TABLES.contains(&name.as_str()))
            .collect();
        if foreign.is_empty() {
            Ok(())
        } else {
            Err(StateError::Open(format!(
                "unrecognised database, unexpected tables: {}",
                foreign.join(", ")
            )))
        }
    }

    /// A panic while the lock is held leaves nothing half-written: an open
    /// transaction rolls back when dropped, so a poisoned lock is reused.
    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> StateResult<T>) -> StateResult<T> {
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut conn)
    }

    /// Run `f` in an immediate (write-locking) transaction.
    fn write<T>(&self, f: impl FnOnce(&Transaction<'_>) -> StateResult<T>) -> StateResult<T> {
        self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let result = f(&tx)?;
            tx.commit()?;
            Ok(result)
        })
    }

    // ── Stamp ──────────────────────────────────────────────────────

    /// Current change stamp.
    pub fn stamp(&self) -> StateResult<Stamp> {
        self.with_conn(|conn| {
            let value: i64 = conn.query_row(
                "SELECT value FROM info WHERE name = ?1",
                params![STAMP_KEY],
                |row| row.get(0),
            )?;
            Ok(Stamp(value as u64))
        })
    }

    // ── Branches ───────────────────────────────────────────────────

    /// Get the branch for a group.
    pub fn get_branch(&self, group: &str) -> StateResult<Option<BranchRecord>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {BRANCH_COLUMNS} FROM branches WHERE group_name = ?1"),
                    params![group],
                    read_branch_row,
                )
                .optional()?;
            row.map(into_branch).transpose()
        })
    }

    /// Insert a new branch. Fails with `Conflict` if the group already has one.
    pub fn insert_branch(&self, branch: &BranchRecord) -> StateResult<Stamp> {
        let stamp = self.write(|tx| {
            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM branches WHERE group_name = ?1)",
                params![branch.group_name],
                |row| row.get(0),
            )?;
            if exists {
                return Err(StateError::Conflict(branch.group_name.clone()));
            }
            tx.execute(
                &format!("INSERT INTO branches ({BRANCH_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
                params![
                    branch.group_name,
                    branch.instance_ip,
                    branch.prune_time.to_sql(),
                    branch.instance_id,
                    branch.creation_time as i64,
                    branch.status.as_str(),
                ],
            )?;
            bump_stamp(tx)
        })?;
        debug!(group = %branch.group_name, %stamp, "branch inserted");
        Ok(stamp)
    }

    /// List all branches, ordered by group name.
    pub fn list_branches(&self) -> StateResult<Vec<BranchRecord>> {
        self.query_branches(
            &format!("SELECT {BRANCH_COLUMNS} FROM branches ORDER BY group_name"),
            params![],
        )
    }

    /// List branches in the given status, ordered by group name.
    pub fn branches_with_status(&self, status: BranchStatus) -> StateResult<Vec<BranchRecord>> {
        self.query_branches(
            &format!(
                "SELECT {BRANCH_COLUMNS} FROM branches WHERE status = ?1 ORDER BY group_name"
            ),
            params![status.as_str()],
        )
    }

    /// Branches whose prune time is at or before `now`. Never-expiring
    /// branches are not returned.
    pub fn expired_branches(&self, now: u64) -> StateResult<Vec<BranchRecord>> {
        self.query_branches(
            &format!(
                "SELECT {BRANCH_COLUMNS} FROM branches \
                 WHERE prune_time IS NOT NULL AND prune_time <= ?1 \
                 ORDER BY prune_time, group_name"
            ),
            params![now as i64],
        )
    }

    fn query_branches(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> StateResult<Vec<BranchRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map(params, read_branch_row)?;
            let mut results = Vec::new();
            for row in rows {
                results.push(into_branch(row?)?);
            }
            Ok(results)
        })
    }

    /// Record the address of a building branch that has none yet.
    /// Returns true if the row changed.
    pub fn set_branch_ip(&self, group: &str, ip: &str) -> StateResult<bool> {
        let changed = self.write(|tx| {
            let n = tx.execute(
                "UPDATE branches SET instance_ip = ?2 \
                 WHERE group_name = ?1 AND status = 'building' AND instance_ip = ''",
                params![group, ip],
            )?;
            if n > 0 {
                bump_stamp(tx)?;
            }
            Ok(n > 0)
        })?;
        debug!(%group, %ip, changed, "branch address recorded");
        Ok(changed)
    }

    /// Move a building branch with a known address to `up`.
    /// Returns true if the row changed.
    pub fn mark_branch_up(&self, group: &str) -> StateResult<bool> {
        let changed = self.write(|tx| {
            let n = tx.execute(
                "UPDATE branches SET status = 'up' \
                 WHERE group_name = ?1 AND status = 'building' AND instance_ip != ''",
                params![group],
            )?;
            if n > 0 {
                bump_stamp(tx)?;
            }
            Ok(n > 0)
        })?;
        debug!(%group, changed, "branch marked up");
        Ok(changed)
    }

    /// Delete a group's branch. Returns true if it existed.
    pub fn delete_branch(&self, group: &str) -> StateResult<bool> {
        let existed = self.write(|tx| {
            let n = tx.execute("DELETE FROM branches WHERE group_name = ?1", params![group])?;
            if n > 0 {
                bump_stamp(tx)?;
            }
            Ok(n > 0)
        })?;
        debug!(%group, existed, "branch deleted");
        Ok(existed)
    }

    // ── Catalogue ──────────────────────────────────────────────────

    /// Get a catalogue entry by group name.
    pub fn get_group(&self, group: &str) -> StateResult<Option<GroupRecord>> {
        self.with_conn(|conn| {
            let record = conn
                .query_row(
                    "SELECT group_name, ram, time FROM groups WHERE group_name = ?1",
                    params![group],
                    |row| {
                        Ok(GroupRecord {
                            group_name: row.get(0)?,
                            ram: row.get::<_, i64>(1)?.max(0) as u64,
                            time: row.get(2)?,
                        })
                    },
                )
                .optional()?;
            Ok(record)
        })
    }

    /// List the catalogue, ordered by group name.
    pub fn list_groups(&self) -> StateResult<Vec<GroupRecord>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT group_name, ram, time FROM groups ORDER BY group_name")?;
            let rows = stmt.query_map([], |row| {
                Ok(GroupRecord {
                    group_name: row.get(0)?,
                    ram: row.get::<_, i64>(1)?.max(0) as u64,
                    time: row.get(2)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Replace the whole catalogue in one transaction. Returns the number of
    /// entries stored. A later duplicate name overwrites an earlier one.
    pub fn replace_groups(&self, groups: &[GroupRecord]) -> StateResult<usize> {
        let count = self.write(|tx| {
            tx.execute("DELETE FROM groups", [])?;
            {
                let mut insert = tx.prepare(
                    "INSERT OR REPLACE INTO groups (group_name, ram, time) VALUES (?1, ?2, ?3)",
                )?;
                for group in groups {
                    insert.execute(params![group.group_name, group.ram as i64, group.time])?;
                }
            }
            let count: i64 = tx.query_row("SELECT COUNT(*) FROM groups", [], |row| row.get(0))?;
            Ok(count as usize)
        })?;
        debug!(count, "group catalogue replaced");
        Ok(count)
    }

    /// Catalogue entries left-joined with their branches, ordered by group
    /// name. With `active_only`, only groups whose branch is `up` remain.
    pub fn group_listings(&self, active_only: bool) -> StateResult<Vec<GroupListing>> {
        let filter = if active_only {
            "WHERE branches.status = 'up'"
        } else {
            ""
        };
        let sql = format!(
            "SELECT groups.group_name, groups.ram, groups.time, \
             branches.prune_time, branches.creation_time, branches.status, \
             branches.instance_ip, branches.group_name IS NOT NULL \
             FROM groups LEFT OUTER JOIN branches \
             ON groups.group_name = branches.group_name \
             {filter} ORDER BY groups.group_name"
        );
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, bool>(7)?,
                ))
            })?;

            let mut listings = Vec::new();
            for row in rows {
                let (group_name, ram, time, prune_time, creation_time, status, ip, has_branch) =
                    row?;
                let status = status.as_deref().map(BranchStatus::parse).transpose()?;
                listings.push(GroupListing {
                    group_name,
                    ram: ram.max(0) as u64,
                    build_time: time,
                    status: GroupStatus::from(status),
                    prune_time: has_branch.then(|| PruneTime::from_sql(prune_time)),
                    creation_time: creation_time.map(|t| t.max(0) as u64),
                    instance_ip: ip.filter(|ip| !ip.is_empty()),
                });
            }
            Ok(listings)
        })
    }
}

/// Rewrite the stamp with a token different from the current one.
fn bump_stamp(tx: &Transaction<'_>) -> StateResult<Stamp> {
    let current: Option<i64> = tx
        .query_row(
            "SELECT value FROM info WHERE name = ?1",
            params![STAMP_KEY],
            |row| row.get(0),
        )
        .optional()?;
    let next = fresh_stamp(current.map(|v| v as u64));
    tx.execute(
        "INSERT OR REPLACE INTO info (name, value) VALUES (?1, ?2)",
        params![STAMP_KEY, next as i64],
    )?;
    Ok(Stamp(next))
}

fn fresh_stamp(previous: Option<u64>) -> u64 {
    let mut rng = rand::rng();
    loop {
        let candidate = rng.random_range(0..=STAMP_MAX);
        if Some(candidate) != previous {
            return candidate;
        }
    }
}
