//! Daemon configuration.

use crate::error::{ConnMgrError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Which active reachability probe the online checker uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStrategy {
    /// One ICMP echo per check attempt.
    Ping,
    /// One HTTP GET; 200 or 301 counts as online.
    #[default]
    Http,
}

/// Online reachability verifier settings (process-wide).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OnlineCheckConfig {
    /// Enables the verifier; when false, L4 readiness is reported
    /// without active confirmation.
    pub enabled: bool,
    pub strategy: CheckStrategy,
    /// Probe target: `host[:port]` or `http(s)://host[:port][/path]`.
    pub target: String,
    /// Bounded wait for one probe reply, in seconds.
    pub timeout_secs: u64,
    /// Trickle minimum interval, in milliseconds.
    pub trickle_imin_ms: u64,
    /// Trickle interval doubling cap (Imax = Imin * 2^doublings).
    pub trickle_doublings: u32,
    /// Trickle redundancy constant k.
    pub trickle_redundancy: u32,
    /// When true, traffic from private (RFC 1918 / ULA) sources does
    /// not count as a consistent observation.
    pub private_addr_check: bool,
}

impl Default for OnlineCheckConfig {
    fn default() -> Self {
        OnlineCheckConfig {
            enabled: true,
            strategy: CheckStrategy::Http,
            target: "http://connectivity-check.ubuntu.com".to_string(),
            timeout_secs: 5,
            trickle_imin_ms: 4_000,
            trickle_doublings: 9,
            trickle_redundancy: 1,
            private_addr_check: false,
        }
    }
}

impl OnlineCheckConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn trickle_imin(&self) -> Duration {
        Duration::from_millis(self.trickle_imin_ms)
    }
}

/// Top-level connmgrd configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnMgrConfig {
    /// Maximum number of managed interfaces (state-table capacity).
    pub max_interfaces: usize,
    pub online_check: OnlineCheckConfig,
}

impl Default for ConnMgrConfig {
    fn default() -> Self {
        ConnMgrConfig {
            max_interfaces: 16,
            online_check: OnlineCheckConfig::default(),
        }
    }
}

impl ConnMgrConfig {
    /// Loads the configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: ConnMgrConfig = serde_yaml::from_str(&text)
            .map_err(|e| ConnMgrError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_interfaces == 0 {
            return Err(ConnMgrError::Config(
                "max_interfaces must be at least 1".to_string(),
            ));
        }
        if self.online_check.trickle_imin_ms == 0 {
            return Err(ConnMgrError::Config(
                "trickle_imin_ms must be nonzero".to_string(),
            ));
        }
        if self.online_check.enabled {
            crate::probe::HttpTarget::parse(&self.online_check.target)?;
        }
        Ok(())
    }
}
