//! Interface handles, address families and link-layer technology tags.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

/// A stable handle identifying one managed network interface.
///
/// External callers (the interface registry, event sources, operators)
/// identify interfaces with 1-based indices; the manager's state table
/// stores them in a 0-based array. [`InterfaceId::slot`] and
/// [`InterfaceId::from_slot`] are the only places that translation is
/// allowed to happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InterfaceId(NonZeroU32);

impl InterfaceId {
    /// Creates a handle from a raw 1-based index. Returns `None` for 0.
    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(InterfaceId)
    }

    /// The raw 1-based external index.
    pub const fn get(&self) -> u32 {
        self.0.get()
    }

    /// The 0-based state-table slot for this handle.
    ///
    /// Invariant: `slot == external index - 1`.
    pub const fn slot(&self) -> usize {
        self.0.get() as usize - 1
    }

    /// Builds the handle owning the given 0-based state-table slot.
    ///
    /// # Panics
    ///
    /// Panics if `slot + 1` overflows `u32`; table capacities are far
    /// below that in practice.
    pub fn from_slot(slot: usize) -> Self {
        let raw = u32::try_from(slot + 1).expect("slot index out of range");
        InterfaceId(NonZeroU32::new(raw).unwrap())
    }
}

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "if{}", self.0)
    }
}

impl FromStr for InterfaceId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("if").unwrap_or(s);
        digits
            .parse::<u32>()
            .ok()
            .and_then(InterfaceId::new)
            .ok_or_else(|| ParseError::InvalidInterfaceId(s.to_string()))
    }
}

/// IP address family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    pub const fn name(&self) -> &'static str {
        match self {
            AddressFamily::Ipv4 => "ipv4",
            AddressFamily::Ipv6 => "ipv6",
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Link-layer technology of an interface, used for bulk ignore/watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    Ethernet,
    Wifi,
    Cellular,
    Ieee802154,
    Ppp,
    Virtual,
}

impl LinkType {
    pub const fn name(&self) -> &'static str {
        match self {
            LinkType::Ethernet => "ethernet",
            LinkType::Wifi => "wifi",
            LinkType::Cellular => "cellular",
            LinkType::Ieee802154 => "ieee802154",
            LinkType::Ppp => "ppp",
            LinkType::Virtual => "virtual",
        }
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LinkType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ethernet" => Ok(LinkType::Ethernet),
            "wifi" => Ok(LinkType::Wifi),
            "cellular" => Ok(LinkType::Cellular),
            "ieee802154" => Ok(LinkType::Ieee802154),
            "ppp" => Ok(LinkType::Ppp),
            "virtual" => Ok(LinkType::Virtual),
            _ => Err(ParseError::InvalidLinkType(s.to_string())),
        }
    }
}
