//! arboretum-state — persistent state store for Arboretum.
//!
//! Backed by SQLite through [rusqlite](https://docs.rs/rusqlite), holds the
//! three logical tables every other component reads and writes:
//!
//! - `branches`: one row per building or running instance, keyed by group
//! - `groups`: the capability catalogue, replaced wholesale on refresh
//! - `info`: the singleton change stamp
//!
//! # Change stamp
//!
//! Every insert, update, or delete of a branch row rewrites the stamp in the
//! same transaction, so a poller that sees an unchanged stamp knows the
//! branch table is unchanged.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by
//! `Arc<Mutex<Connection>>`) and can be shared across async tasks. Separate
//! processes open their own store on the same file; SQLite's file locking
//! arbitrates between them.

pub mod error;
pub mod schema;
pub mod store;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
