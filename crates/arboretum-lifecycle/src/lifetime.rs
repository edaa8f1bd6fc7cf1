//! Branch lifetime strings such as `"8 hours"`, `"25 minutes"`, `"forever"`.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use arboretum_state::PruneTime;

use crate::error::LifecycleError;

static LIFETIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,3})\s+(minute|hour|day)s?$").expect("lifetime pattern is valid")
});

/// How long a branch lives before the pruner destroys it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifetime {
    For(Duration),
    Forever,
}

impl Lifetime {
    /// Prune time for a branch created at `now` (epoch seconds).
    pub fn prune_time(self, now: u64) -> PruneTime {
        match self {
            Lifetime::For(d) => PruneTime::At(now.saturating_add(d.as_secs())),
            Lifetime::Forever => PruneTime::Never,
        }
    }
}

impl FromStr for Lifetime {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "forever" {
            return Ok(Lifetime::Forever);
        }
        let invalid = || {
            LifecycleError::Validation(format!(
                "invalid lifetime {s:?}: expected e.g. \"8 hours\", \"25 minutes\", \"2 days\" or \"forever\""
            ))
        };
        let caps = LIFETIME.captures(s).ok_or_else(invalid)?;
        let magnitude: u64 = caps[1].parse().map_err(|_| invalid())?;
        let unit_secs = match &caps[2] {
            "minute" => 60,
            "hour" => 60 * 60,
            "day" => 24 * 60 * 60,
            _ => return Err(invalid()),
        };
        Ok(Lifetime::For(Duration::from_secs(magnitude * unit_secs)))
    }
}

impl fmt::Display for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifetime::Forever => f.write_str("forever"),
            Lifetime::For(d) => {
                let secs = d.as_secs();
                let (n, unit) = if secs % 86_400 == 0 && secs > 0 {
                    (secs / 86_400, "day")
                } else if secs % 3600 == 0 && secs > 0 {
                    (secs / 3600, "hour")
                } else {
                    (secs / 60, "minute")
                };
                write!(f, "{n} {unit}{}", if n == 1 { "" } else { "s" })
            }
        }
    }
}
