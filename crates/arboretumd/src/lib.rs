//! arboretumd — the Arboretum daemon.
//!
//! Runs three independent worker loops over the shared state store:
//!
//! - `prune`: destroys branches past their prune time
//! - `poll`: moves `building` branches towards `up`
//! - `catalogue`: refreshes the group catalogue from the index snapshot
//!
//! Each worker is its own tokio task, so a panic ends only that task; the
//! [`Supervisor`] notices on its next tick and starts a replacement. A
//! loopback control socket reports which workers are up.

pub mod control;
pub mod error;
pub mod supervisor;
pub mod workers;

pub use control::{parse_status, query_status, render_status};
pub use error::{DaemonError, DaemonResult};
pub use supervisor::{Supervisor, SupervisorConfig, WorkerHealth, WorkerState};
pub use workers::{WorkerContext, WorkerKind};
