//! Event ingestion: folding raw interface events into the state table.
//!
//! This is a pure projection. Unknown or out-of-range interface
//! handles are dropped, bits that would not change are left alone, and
//! nothing here ever fails visibly. The caller wakes the monitor when
//! this returns true.

use crate::events::NetEvent;
use crate::registry::IfaceRegistry;
use crate::state_table::StateTable;
use conn_types::AddressFamily;
use tracing::trace;

/// Applies one event to the table. Returns true if a tracked bit
/// actually changed (the slot was also marked `changed`).
pub(crate) fn apply_net_event(
    table: &mut StateTable,
    registry: &dyn IfaceRegistry,
    event: &NetEvent,
) -> bool {
    let iface = event.iface();
    let Some(slot) = table.slot_mut(iface) else {
        trace!(%iface, ?event, "event for untracked interface handle, dropping");
        return false;
    };

    let mutated = match *event {
        NetEvent::IfaceUp(_) => {
            let was = slot.admin_up;
            slot.admin_up = true;
            !was
        }
        NetEvent::IfaceDown(_) => {
            let was = slot.admin_up;
            slot.admin_up = false;
            was
        }
        // Admin-up alone does not make the interface usable; the
        // binding layer reacts to it, the table does not.
        NetEvent::IfaceAdminUp(_) => false,
        NetEvent::AddrAdded { family, .. } => set_family_bit(slot, registry, iface, family),
        NetEvent::AddrRemoved { family, .. } => clear_family_bit(slot, registry, iface, family),
        // DAD confirms/retracts IPv6 addresses, ACD IPv4 ones.
        NetEvent::DadSucceeded(_) => set_family_bit(slot, registry, iface, AddressFamily::Ipv6),
        NetEvent::DadFailed(_) => clear_family_bit(slot, registry, iface, AddressFamily::Ipv6),
        NetEvent::AcdSucceeded(_) => set_family_bit(slot, registry, iface, AddressFamily::Ipv4),
        NetEvent::AcdFailed(_) => clear_family_bit(slot, registry, iface, AddressFamily::Ipv4),
    };

    if mutated {
        slot.changed = true;
    }
    mutated
}

fn family_bit(slot: &mut crate::state_table::InterfaceSlot, family: AddressFamily) -> &mut bool {
    match family {
        AddressFamily::Ipv4 => &mut slot.ipv4,
        AddressFamily::Ipv6 => &mut slot.ipv6,
    }
}

/// Sets the family bit if the interface now holds at least one usable
/// global address of that family.
fn set_family_bit(
    slot: &mut crate::state_table::InterfaceSlot,
    registry: &dyn IfaceRegistry,
    iface: conn_types::InterfaceId,
    family: AddressFamily,
) -> bool {
    if !registry.has_global_addr(iface, family) {
        return false;
    }
    let bit = family_bit(slot, family);
    let was = *bit;
    *bit = true;
    !was
}

/// Clears the family bit if the interface now holds no usable global
/// address of that family.
fn clear_family_bit(
    slot: &mut crate::state_table::InterfaceSlot,
    registry: &dyn IfaceRegistry,
    iface: conn_types::InterfaceId,
    family: AddressFamily,
) -> bool {
    if registry.has_global_addr(iface, family) {
        return false;
    }
    let bit = family_bit(slot, family);
    let was = *bit;
    *bit = false;
    was
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemoryRegistry;
    use conn_types::{InterfaceId, LinkType};

    fn id(n: u32) -> InterfaceId {
        InterfaceId::new(n).unwrap()
    }

    fn setup() -> (StateTable, InMemoryRegistry) {
        let reg = InMemoryRegistry::new();
        reg.add_interface(id(1), LinkType::Ethernet);
        reg.add_interface(id(2), LinkType::Wifi);
        (StateTable::new(4), reg)
    }

    #[test]
    fn test_iface_up_down_sets_admin_bit() {
        let (mut table, reg) = setup();

        assert!(apply_net_event(&mut table, &reg, &NetEvent::IfaceUp(id(1))));
        assert!(table.slot(id(1)).unwrap().admin_up);
        assert!(table.slot(id(1)).unwrap().changed);

        // Second up is a no-op, no spurious wake.
        table.slot_mut(id(1)).unwrap().changed = false;
        assert!(!apply_net_event(&mut table, &reg, &NetEvent::IfaceUp(id(1))));
        assert!(!table.slot(id(1)).unwrap().changed);

        assert!(apply_net_event(
            &mut table,
            &reg,
            &NetEvent::IfaceDown(id(1))
        ));
        assert!(!table.slot(id(1)).unwrap().admin_up);
    }

    #[test]
    fn test_addr_added_consults_registry() {
        let (mut table, reg) = setup();

        // Event without a backing address: bit stays clear.
        assert!(!apply_net_event(
            &mut table,
            &reg,
            &NetEvent::AddrAdded {
                iface: id(1),
                family: AddressFamily::Ipv4
            }
        ));
        assert!(!table.slot(id(1)).unwrap().ipv4);

        reg.set_addr_count(id(1), AddressFamily::Ipv4, 1);
        assert!(apply_net_event(
            &mut table,
            &reg,
            &NetEvent::AddrAdded {
                iface: id(1),
                family: AddressFamily::Ipv4
            }
        ));
        assert!(table.slot(id(1)).unwrap().ipv4);
    }

    #[test]
    fn test_addr_removed_keeps_bit_while_addrs_remain() {
        let (mut table, reg) = setup();
        reg.set_addr_count(id(1), AddressFamily::Ipv6, 2);
        apply_net_event(
            &mut table,
            &reg,
            &NetEvent::AddrAdded {
                iface: id(1),
                family: AddressFamily::Ipv6,
            },
        );

        // One address removed, one left: bit stays set.
        reg.set_addr_count(id(1), AddressFamily::Ipv6, 1);
        assert!(!apply_net_event(
            &mut table,
            &reg,
            &NetEvent::AddrRemoved {
                iface: id(1),
                family: AddressFamily::Ipv6
            }
        ));
        assert!(table.slot(id(1)).unwrap().ipv6);

        // Last address gone: bit clears.
        reg.set_addr_count(id(1), AddressFamily::Ipv6, 0);
        assert!(apply_net_event(
            &mut table,
            &reg,
            &NetEvent::AddrRemoved {
                iface: id(1),
                family: AddressFamily::Ipv6
            }
        ));
        assert!(!table.slot(id(1)).unwrap().ipv6);
    }

    #[test]
    fn test_dad_acd_map_to_families() {
        let (mut table, reg) = setup();
        reg.set_addr_count(id(2), AddressFamily::Ipv6, 1);
        reg.set_addr_count(id(2), AddressFamily::Ipv4, 1);

        assert!(apply_net_event(
            &mut table,
            &reg,
            &NetEvent::DadSucceeded(id(2))
        ));
        assert!(table.slot(id(2)).unwrap().ipv6);
        assert!(!table.slot(id(2)).unwrap().ipv4);

        assert!(apply_net_event(
            &mut table,
            &reg,
            &NetEvent::AcdSucceeded(id(2))
        ));
        assert!(table.slot(id(2)).unwrap().ipv4);

        reg.set_addr_count(id(2), AddressFamily::Ipv6, 0);
        assert!(apply_net_event(
            &mut table,
            &reg,
            &NetEvent::DadFailed(id(2))
        ));
        assert!(!table.slot(id(2)).unwrap().ipv6);
    }

    #[test]
    fn test_foreign_handle_dropped() {
        let (mut table, reg) = setup();
        // Handle beyond table capacity: silently ignored.
        assert!(!apply_net_event(
            &mut table,
            &reg,
            &NetEvent::IfaceUp(id(99))
        ));
    }

    #[test]
    fn test_admin_up_event_does_not_touch_table() {
        let (mut table, reg) = setup();
        assert!(!apply_net_event(
            &mut table,
            &reg,
            &NetEvent::IfaceAdminUp(id(1))
        ));
        assert!(table.slot(id(1)).unwrap().is_untracked());
    }
}
