//! Per-binding timeout values.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// A connect or idle timeout: either unbounded ("none") or a number of
/// whole seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnTimeout {
    /// No timeout configured; the behavior it guards never triggers.
    #[default]
    None,
    /// Timeout after this many seconds.
    Secs(u32),
}

impl ConnTimeout {
    /// Returns the timeout as a `Duration`, or `None` when unbounded.
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            ConnTimeout::None => None,
            ConnTimeout::Secs(s) => Some(Duration::from_secs(u64::from(*s))),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, ConnTimeout::None)
    }
}

impl fmt::Display for ConnTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnTimeout::None => f.write_str("none"),
            ConnTimeout::Secs(s) => write!(f, "{}s", s),
        }
    }
}

impl FromStr for ConnTimeout {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "none" {
            return Ok(ConnTimeout::None);
        }
        s.trim_end_matches('s')
            .parse::<u32>()
            .map(ConnTimeout::Secs)
            .map_err(|_| ParseError::InvalidTimeout(s.to_string()))
    }
}
