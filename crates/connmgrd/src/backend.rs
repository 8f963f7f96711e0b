//! The connectivity-backend capability trait.
//!
//! One implementation per connectivity technology (Wi-Fi supplicant,
//! cellular modem, ...). The manager never cares how a backend brings
//! its link online, only when to ask it to.

use crate::error::{ConnMgrError, Result};
use async_trait::async_trait;
use conn_types::InterfaceId;

/// Capability set a pluggable connectivity backend must provide.
///
/// `connect`/`disconnect` are mandatory; option access and `init` have
/// not-supported/no-op defaults. Calls for one interface are
/// serialized by the binding lock, but a backend may be shared by
/// several interfaces and must be `Send + Sync`.
#[async_trait]
pub trait ConnectivityBackend: Send + Sync {
    /// Called once per binding when the manager is constructed.
    async fn init(&self, _iface: InterfaceId) -> Result<()> {
        Ok(())
    }

    /// Starts establishing connectivity on the interface. Returns once
    /// the attempt is underway; actual oper-up arrives as an event.
    async fn connect(&self, iface: InterfaceId) -> Result<()>;

    /// Gracefully tears connectivity down.
    async fn disconnect(&self, iface: InterfaceId) -> Result<()>;

    /// Reads a backend-specific option value.
    async fn get_option(&self, _iface: InterfaceId, _name: &str) -> Result<String> {
        Err(ConnMgrError::NotSupported)
    }

    /// Writes a backend-specific option value.
    async fn set_option(&self, _iface: InterfaceId, _name: &str, _value: &str) -> Result<()> {
        Err(ConnMgrError::NotSupported)
    }
}
