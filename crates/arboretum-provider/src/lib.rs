//! arboretum-provider — the capabilities the orchestration core invokes
//! but does not own.
//!
//! Each capability is a narrow trait with one production adapter:
//!
//! ```text
//! Provisioner         ── OpenStackCli   (openstack server/flavor commands)
//! IndexFetcher        ── S3cmdFetcher   (s3cmd get)
//! ReadinessProber     ── HttpProber     (hyper HTTP/1 GET)
//! BootScriptRenderer  ── TemplateRenderer (file template)
//! ```
//!
//! The traits are object safe so the lifecycle manager can hold them as
//! `Arc<dyn _>` and tests can substitute in-memory doubles.

pub mod bootscript;
pub mod compute;
pub mod error;
pub mod index;
pub mod openstack;
pub mod probe;

pub use bootscript::{BootScriptRenderer, TemplateFile, TemplateRenderer};
pub use compute::{ProvisionedServer, Provisioner, ServerRequest, Tier, smallest_tier_at_least};
pub use error::{ProbeError, ProviderError, ProviderResult, RenderError, TransferError};
pub use index::{DEFAULT_FETCH_TIMEOUT, IndexFetcher, S3cmdFetcher};
pub use openstack::{DEFAULT_COMMAND_TIMEOUT, OpenStackCli};
pub use probe::{HttpProber, Readiness, ReadinessProber};
