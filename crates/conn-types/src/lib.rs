//! Shared primitive types for the connectivity manager.
//!
//! These types carry no behavior beyond validation, parsing and
//! conversion. Everything that acts on them lives in `connmgrd`.

mod iface;
mod timeout;

pub use iface::{AddressFamily, InterfaceId, LinkType};
pub use timeout::ConnTimeout;

use thiserror::Error;

/// Errors from parsing the primitive types in this crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid interface id: {0}")]
    InvalidInterfaceId(String),

    #[error("invalid link type: {0}")]
    InvalidLinkType(String),

    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
}
