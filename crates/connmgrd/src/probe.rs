//! Reachability transports for the online checker.
//!
//! The actual probe primitives (ICMP echo, HTTP request, DNS lookup)
//! are external collaborators behind [`ReachabilityProbe`].
//! [`SystemProbe`] is the stock implementation for platforms with a
//! regular sockets stack; raw-ICMP ping needs a platform-specific
//! implementation and is reported unsupported here.

use crate::error::{ConnMgrError, Result};
use async_trait::async_trait;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Scheme of an HTTP online-check target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpScheme {
    Http,
    Https,
}

impl HttpScheme {
    pub const fn default_port(&self) -> u16 {
        match self {
            HttpScheme::Http => 80,
            HttpScheme::Https => 443,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            HttpScheme::Http => "http",
            HttpScheme::Https => "https",
        }
    }
}

/// A parsed online-check target.
///
/// Accepts a bare `host[:port]` or a full
/// `http(s)://host[:port][/path]` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpTarget {
    pub scheme: HttpScheme,
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl HttpTarget {
    pub fn parse(s: &str) -> Result<Self> {
        let (scheme, rest) = if let Some(rest) = s.strip_prefix("https://") {
            (HttpScheme::Https, rest)
        } else if let Some(rest) = s.strip_prefix("http://") {
            (HttpScheme::Http, rest)
        } else if s.contains("://") {
            return Err(ConnMgrError::InvalidTarget(s.to_string()));
        } else {
            (HttpScheme::Http, s)
        };

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };

        let (host, port) = match authority.rsplit_once(':') {
            // A second ':' means a bare IPv6 literal, which needs
            // bracket syntax we do not support as a check target.
            Some((host, port_str)) if !host.contains(':') => {
                let port = port_str
                    .parse::<u16>()
                    .map_err(|_| ConnMgrError::InvalidTarget(s.to_string()))?;
                (host, port)
            }
            Some(_) => return Err(ConnMgrError::InvalidTarget(s.to_string())),
            None => (authority, scheme.default_port()),
        };

        if host.is_empty() {
            return Err(ConnMgrError::InvalidTarget(s.to_string()));
        }

        Ok(HttpTarget {
            scheme,
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }

    /// The full URL for an HTTP client.
    pub fn url(&self) -> String {
        if self.port == self.scheme.default_port() {
            format!("{}://{}{}", self.scheme.name(), self.host, self.path)
        } else {
            format!(
                "{}://{}:{}{}",
                self.scheme.name(),
                self.host,
                self.port,
                self.path
            )
        }
    }
}

impl fmt::Display for HttpTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

/// Transport primitives used by the online checker.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// Resolves a host name to one or more socket addresses.
    async fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>>;

    /// Sends one ICMP echo and waits up to `timeout` for the matching
    /// reply. `Ok(())` means a reply arrived.
    async fn icmp_echo(&self, addr: IpAddr, timeout: Duration) -> Result<()>;

    /// Performs one GET against the target and returns the HTTP status
    /// code.
    async fn http_get(&self, target: &HttpTarget, timeout: Duration) -> Result<u16>;
}

/// Stock probe over the platform sockets stack.
pub struct SystemProbe {
    client: reqwest::Client,
}

impl SystemProbe {
    pub fn new() -> Self {
        SystemProbe {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        SystemProbe::new()
    }
}

#[async_trait]
impl ReachabilityProbe for SystemProbe {
    async fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port)).await?.collect();
        if addrs.is_empty() {
            return Err(ConnMgrError::Resolve(host.to_string()));
        }
        Ok(addrs)
    }

    async fn icmp_echo(&self, _addr: IpAddr, _timeout: Duration) -> Result<()> {
        // Raw ICMP needs elevated privileges and a platform transport;
        // deployments wanting the ping strategy inject their own probe.
        Err(ConnMgrError::NotSupported)
    }

    async fn http_get(&self, target: &HttpTarget, timeout: Duration) -> Result<u16> {
        let response = self
            .client
            .get(target.url())
            .timeout(timeout)
            .send()
            .await?;
        Ok(response.status().as_u16())
    }
}
