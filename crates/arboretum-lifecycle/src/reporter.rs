//! Reporting sinks for user-facing lifecycle messages.
//!
//! The CLI prints outcomes to the terminal; the daemon records them in its
//! log. Operations take the sink at construction and never print directly.

use tracing::{info, warn};

pub trait Reporter: Send + Sync {
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
}

/// Writes to stdout and stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    fn info(&self, message: &str) {
        println!("{message}");
    }

    fn warn(&self, message: &str) {
        eprintln!("{message}");
    }
}

/// Forwards to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn info(&self, message: &str) {
        info!(target: "arboretum::report", "{message}");
    }

    fn warn(&self, message: &str) {
        warn!(target: "arboretum::report", "{message}");
    }
}
