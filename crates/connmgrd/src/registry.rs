//! The interface registry seam.
//!
//! The surrounding system owns the interface object model (existence,
//! addressing, link layer). The manager only consumes it through this
//! trait: querying current state during ingestion and resync, and
//! requesting admin-state changes from the binding layer.

use crate::error::{ConnMgrError, Result};
use async_trait::async_trait;
use conn_types::{AddressFamily, InterfaceId, LinkType};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

/// Read/control access to the platform's interface table.
#[async_trait]
pub trait IfaceRegistry: Send + Sync {
    /// All interfaces currently known to the platform.
    fn interfaces(&self) -> Vec<InterfaceId>;

    /// Link-layer technology of the interface, if known.
    fn link_type(&self, iface: InterfaceId) -> Option<LinkType>;

    /// True if the interface is administratively up.
    fn is_admin_up(&self, iface: InterfaceId) -> bool;

    /// True if the interface is operationally up (has carrier).
    fn is_oper_up(&self, iface: InterfaceId) -> bool;

    /// True if the interface holds at least one usable global address
    /// of the family.
    fn has_global_addr(&self, iface: InterfaceId, family: AddressFamily) -> bool;

    /// Takes the interface administratively up.
    async fn set_admin_up(&self, iface: InterfaceId) -> Result<()>;

    /// Takes the interface administratively down.
    async fn set_admin_down(&self, iface: InterfaceId) -> Result<()>;
}

#[derive(Debug, Default, Clone)]
struct IfaceState {
    link_type: Option<LinkType>,
    admin_up: bool,
    oper_up: bool,
    v4_addrs: usize,
    v6_addrs: usize,
}

/// An in-memory registry for tests and platform bring-up.
///
/// Production deployments implement [`IfaceRegistry`] over the real
/// platform interface table; this one just records what it is told.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    ifaces: Mutex<HashMap<InterfaceId, IfaceState>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an interface with the given link type.
    pub fn add_interface(&self, iface: InterfaceId, link_type: LinkType) {
        self.ifaces.lock().unwrap().insert(
            iface,
            IfaceState {
                link_type: Some(link_type),
                ..IfaceState::default()
            },
        );
    }

    pub fn set_oper_up(&self, iface: InterfaceId, up: bool) {
        if let Some(state) = self.ifaces.lock().unwrap().get_mut(&iface) {
            state.oper_up = up;
        }
    }

    /// Adds or removes one global address of the family.
    pub fn set_addr_count(&self, iface: InterfaceId, family: AddressFamily, count: usize) {
        if let Some(state) = self.ifaces.lock().unwrap().get_mut(&iface) {
            match family {
                AddressFamily::Ipv4 => state.v4_addrs = count,
                AddressFamily::Ipv6 => state.v6_addrs = count,
            }
        }
    }
}

#[async_trait]
impl IfaceRegistry for InMemoryRegistry {
    fn interfaces(&self) -> Vec<InterfaceId> {
        let mut ids: Vec<_> = self.ifaces.lock().unwrap().keys().copied().collect();
        ids.sort();
        ids
    }

    fn link_type(&self, iface: InterfaceId) -> Option<LinkType> {
        self.ifaces
            .lock()
            .unwrap()
            .get(&iface)
            .and_then(|s| s.link_type)
    }

    fn is_admin_up(&self, iface: InterfaceId) -> bool {
        self.ifaces
            .lock()
            .unwrap()
            .get(&iface)
            .map(|s| s.admin_up)
            .unwrap_or(false)
    }

    fn is_oper_up(&self, iface: InterfaceId) -> bool {
        self.ifaces
            .lock()
            .unwrap()
            .get(&iface)
            .map(|s| s.oper_up)
            .unwrap_or(false)
    }

    fn has_global_addr(&self, iface: InterfaceId, family: AddressFamily) -> bool {
        self.ifaces
            .lock()
            .unwrap()
            .get(&iface)
            .map(|s| match family {
                AddressFamily::Ipv4 => s.v4_addrs > 0,
                AddressFamily::Ipv6 => s.v6_addrs > 0,
            })
            .unwrap_or(false)
    }

    async fn set_admin_up(&self, iface: InterfaceId) -> Result<()> {
        debug!(%iface, "registry: admin up");
        let mut ifaces = self.ifaces.lock().unwrap();
        let state = ifaces
            .get_mut(&iface)
            .ok_or_else(|| ConnMgrError::Registry(format!("unknown interface {iface}")))?;
        state.admin_up = true;
        Ok(())
    }

    async fn set_admin_down(&self, iface: InterfaceId) -> Result<()> {
        debug!(%iface, "registry: admin down");
        let mut ifaces = self.ifaces.lock().unwrap();
        let state = ifaces
            .get_mut(&iface)
            .ok_or_else(|| ConnMgrError::Registry(format!("unknown interface {iface}")))?;
        state.admin_up = false;
        state.oper_up = false;
        Ok(())
    }
}
