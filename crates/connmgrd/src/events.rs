//! Event payloads flowing in and out of the manager.
//!
//! [`NetEvent`] is what the external interface registry delivers to us;
//! [`ConnEvent`] is what we publish to consumers. Both are plain tagged
//! unions so that handlers can be a single `match` instead of chained
//! bit tests.

use conn_types::{AddressFamily, InterfaceId};
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// A raw per-interface event ingested from the interface registry's
/// notification bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetEvent {
    /// Interface became operationally up (carrier, link established).
    IfaceUp(InterfaceId),
    /// Interface went administratively or operationally down.
    IfaceDown(InterfaceId),
    /// Interface was taken administratively up (may not have carrier yet).
    IfaceAdminUp(InterfaceId),
    /// A global address of the given family was added to the interface.
    AddrAdded {
        iface: InterfaceId,
        family: AddressFamily,
    },
    /// A global address of the given family was removed.
    AddrRemoved {
        iface: InterfaceId,
        family: AddressFamily,
    },
    /// IPv6 duplicate address detection confirmed an address usable.
    DadSucceeded(InterfaceId),
    /// IPv6 duplicate address detection failed for an address.
    DadFailed(InterfaceId),
    /// IPv4 address conflict detection confirmed an address usable.
    AcdSucceeded(InterfaceId),
    /// IPv4 address conflict detection failed for an address.
    AcdFailed(InterfaceId),
}

impl NetEvent {
    /// The interface this event refers to.
    pub fn iface(&self) -> InterfaceId {
        match *self {
            NetEvent::IfaceUp(i)
            | NetEvent::IfaceDown(i)
            | NetEvent::IfaceAdminUp(i)
            | NetEvent::DadSucceeded(i)
            | NetEvent::DadFailed(i)
            | NetEvent::AcdSucceeded(i)
            | NetEvent::AcdFailed(i) => i,
            NetEvent::AddrAdded { iface, .. } | NetEvent::AddrRemoved { iface, .. } => iface,
        }
    }
}

/// An aggregate connectivity event published by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnEvent {
    /// Aggregate readiness went 0 -> N; `cause` is the interface whose
    /// transition crossed the edge.
    L4Connected(InterfaceId),
    /// Aggregate readiness went N -> 0.
    L4Disconnected(InterfaceId),
    /// At least one interface became IPv4-ready (previously none were).
    Ipv4Connected(InterfaceId),
    /// The last IPv4-ready interface lost IPv4 readiness.
    Ipv4Disconnected(InterfaceId),
    /// At least one interface became IPv6-ready.
    Ipv6Connected(InterfaceId),
    /// The last IPv6-ready interface lost IPv6 readiness.
    Ipv6Disconnected(InterfaceId),
    /// An active reachability check confirmed real internet access,
    /// attributed to the interface that caused the readiness edge.
    Online(InterfaceId),
    /// Reachability is no longer confirmed (readiness lost, or the
    /// Trickle verifier suspected silent loss).
    Offline,
    /// A binding's connect attempt exceeded its connect timeout.
    IfTimeout(InterfaceId),
    /// A binding's backend reported an unrecoverable error.
    IfFatalError { iface: InterfaceId, code: i32 },
}

/// Broadcast fan-out of [`ConnEvent`]s to any number of subscribers.
///
/// Publishing never fails: with no subscribers the event is dropped,
/// which matches "emit and forget" semantics for aggregate events.
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<ConnEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        EventBus { tx }
    }

    /// Publishes one event to all current subscribers.
    pub fn publish(&self, event: ConnEvent) {
        debug!(?event, "publishing connectivity event");
        if self.tx.send(event).is_err() {
            trace!(?event, "no subscribers for event");
        }
    }

    /// Creates a new subscription receiving all subsequently published
    /// events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new(64)
    }
}
