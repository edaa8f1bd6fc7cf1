//! arboretum-lifecycle — what happens to a branch between "create" and
//! "gone".
//!
//! [`InstanceManager`] creates, polls, destroys, and prunes branches against
//! the state store; [`CatalogueBuilder`] keeps the group catalogue in step
//! with the published index. Both talk to the outside world only through
//! the collaborator traits in `arboretum-provider` and report user-facing
//! outcomes through a [`Reporter`].

pub mod catalogue;
pub mod error;
pub mod lifetime;
pub mod manager;
pub mod reporter;
pub mod sizing;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use catalogue::{CatalogueBuilder, format_build_time, parse_index};
pub use error::{LifecycleError, LifecycleResult};
pub use lifetime::Lifetime;
pub use manager::{
    Backends, DestroyOutcome, InstanceManager, PollSummary, ServerTemplate, epoch_secs,
    render_table, server_name,
};
pub use reporter::{ConsoleReporter, LogReporter, Reporter};
pub use sizing::SizingPolicy;
