//! The shared interface state table and its readiness aggregation.
//!
//! One [`InterfaceSlot`] per managed interface, held in a
//! capacity-bounded array owned by the manager. Event ingestion only
//! flips raw signal bits and marks slots changed; the derived `ready`
//! bits and the aggregate counters are recomputed exclusively by
//! [`StateTable::rescan`], called from the readiness monitor while the
//! table lock is held.

use conn_types::InterfaceId;

/// Readiness is a pure function of the four governing bits.
///
/// This is the single source of truth for the transition table; both
/// the aggregate and the per-family recomputation go through it.
pub fn compute_ready(admin_up: bool, has_addr: bool, ignored: bool) -> bool {
    admin_up && has_addr && !ignored
}

/// Per-interface state bits.
///
/// A slot equal to `InterfaceSlot::default()` is untracked; slots are
/// lazily brought into use by the first event referencing them and are
/// only reset wholesale at manager (re)initialization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterfaceSlot {
    /// External signal: interface is up (admin and carrier).
    pub admin_up: bool,
    /// Has at least one usable global IPv4 address.
    pub ipv4: bool,
    /// Has at least one usable global IPv6 address.
    pub ipv6: bool,
    /// Excluded from aggregation by configuration.
    pub ignored: bool,
    /// Dirty flag requesting monitor recomputation.
    pub changed: bool,
    /// Derived: contributes to aggregate readiness. Monitor-owned.
    pub ready: bool,
    /// Derived: contributes to IPv4 readiness. Monitor-owned.
    pub ready_v4: bool,
    /// Derived: contributes to IPv6 readiness. Monitor-owned.
    pub ready_v6: bool,
    /// Derived: a reachability probe is currently attributed here.
    pub online_check_in_flight: bool,
}

impl InterfaceSlot {
    pub fn is_untracked(&self) -> bool {
        *self == InterfaceSlot::default()
    }
}

/// One aggregate readiness edge observed during a rescan pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateEdge {
    /// The count went 0 -> N; the interface is the attributed cause.
    Connected(InterfaceId),
    /// The count went N -> 0.
    Disconnected(InterfaceId),
}

/// Edges produced by a single rescan pass, one per aggregate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RescanOutcome {
    pub l4: Option<AggregateEdge>,
    pub ipv4: Option<AggregateEdge>,
    pub ipv6: Option<AggregateEdge>,
}

impl RescanOutcome {
    pub fn is_empty(&self) -> bool {
        self.l4.is_none() && self.ipv4.is_none() && self.ipv6.is_none()
    }
}

/// Running counters for one aggregate (overall, IPv4, IPv6) plus the
/// cause pointers used to attribute the coalesced edge event.
#[derive(Debug, Default)]
struct Aggregate {
    count: usize,
    last_gain: Option<InterfaceId>,
    last_loss: Option<InterfaceId>,
}

impl Aggregate {
    fn apply(&mut self, iface: InterfaceId, became_ready: bool) {
        if became_ready {
            self.count += 1;
            self.last_gain = Some(iface);
        } else {
            debug_assert!(self.count > 0);
            self.count = self.count.saturating_sub(1);
            self.last_loss = Some(iface);
        }
    }

    fn edge(&self, count_before: usize) -> Option<AggregateEdge> {
        if count_before == 0 && self.count > 0 {
            self.last_gain.map(AggregateEdge::Connected)
        } else if count_before > 0 && self.count == 0 {
            self.last_loss.map(AggregateEdge::Disconnected)
        } else {
            None
        }
    }
}

/// Capacity-bounded map from interface handle to slot, plus the
/// monitor-owned aggregate counters.
#[derive(Debug)]
pub struct StateTable {
    slots: Vec<InterfaceSlot>,
    l4: Aggregate,
    ipv4: Aggregate,
    ipv6: Aggregate,
}

impl StateTable {
    /// Creates a table with room for `capacity` interfaces, all
    /// untracked.
    pub fn new(capacity: usize) -> Self {
        StateTable {
            slots: vec![InterfaceSlot::default(); capacity],
            l4: Aggregate::default(),
            ipv4: Aggregate::default(),
            ipv6: Aggregate::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of interfaces currently contributing to readiness.
    pub fn ready_count(&self) -> usize {
        self.l4.count
    }

    pub fn ready_v4_count(&self) -> usize {
        self.ipv4.count
    }

    pub fn ready_v6_count(&self) -> usize {
        self.ipv6.count
    }

    /// Looks up a slot; `None` for handles beyond capacity (foreign
    /// interfaces are ignored, never an error).
    pub fn slot(&self, iface: InterfaceId) -> Option<&InterfaceSlot> {
        self.slots.get(iface.slot())
    }

    pub fn slot_mut(&mut self, iface: InterfaceId) -> Option<&mut InterfaceSlot> {
        self.slots.get_mut(iface.slot())
    }

    /// Iterates all slots with their handles, untracked ones included.
    pub fn iter(&self) -> impl Iterator<Item = (InterfaceId, &InterfaceSlot)> {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, s)| (InterfaceId::from_slot(i), s))
    }

    /// Resets every slot and counter to the initial state.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            *slot = InterfaceSlot::default();
        }
        self.l4 = Aggregate::default();
        self.ipv4 = Aggregate::default();
        self.ipv6 = Aggregate::default();
    }

    /// Recomputes readiness for every changed slot in one pass and
    /// reports which aggregates crossed the zero/nonzero edge.
    ///
    /// Many interfaces may flip within one pass; only the edge of each
    /// aggregate is reported, so racing interfaces during boot or link
    /// flap produce at most one event per aggregate.
    pub fn rescan(&mut self) -> RescanOutcome {
        let before_l4 = self.l4.count;
        let before_v4 = self.ipv4.count;
        let before_v6 = self.ipv6.count;

        for idx in 0..self.slots.len() {
            if !self.slots[idx].changed {
                continue;
            }
            let iface = InterfaceId::from_slot(idx);
            let slot = &mut self.slots[idx];

            let is_ready = compute_ready(slot.admin_up, slot.ipv4 || slot.ipv6, slot.ignored);
            let is_ready_v4 = compute_ready(slot.admin_up, slot.ipv4, slot.ignored);
            let is_ready_v6 = compute_ready(slot.admin_up, slot.ipv6, slot.ignored);

            if slot.ready != is_ready {
                slot.ready = is_ready;
                self.l4.apply(iface, is_ready);
            }
            if slot.ready_v4 != is_ready_v4 {
                slot.ready_v4 = is_ready_v4;
                self.ipv4.apply(iface, is_ready_v4);
            }
            if slot.ready_v6 != is_ready_v6 {
                slot.ready_v6 = is_ready_v6;
                self.ipv6.apply(iface, is_ready_v6);
            }
            self.slots[idx].changed = false;
        }

        RescanOutcome {
            l4: self.l4.edge(before_l4),
            ipv4: self.ipv4.edge(before_v4),
            ipv6: self.ipv6.edge(before_v6),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn id(n: u32) -> InterfaceId {
        InterfaceId::new(n).unwrap()
    }

    fn mark(table: &mut StateTable, iface: InterfaceId, f: impl FnOnce(&mut InterfaceSlot)) {
        let slot = table.slot_mut(iface).unwrap();
        f(slot);
        slot.changed = true;
    }

    #[test]
    fn test_readiness_truth_table() {
        // Ready iff admin_up && (ipv4 || ipv6) && !ignored, regardless
        // of the order bits were set in.
        for admin in [false, true] {
            for v4 in [false, true] {
                for v6 in [false, true] {
                    for ignored in [false, true] {
                        let expected = admin && (v4 || v6) && !ignored;
                        assert_eq!(
                            compute_ready(admin, v4 || v6, ignored),
                            expected,
                            "admin={admin} v4={v4} v6={v6} ignored={ignored}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_untracked_default() {
        let table = StateTable::new(4);
        assert!(table.slot(id(1)).unwrap().is_untracked());
        assert_eq!(table.ready_count(), 0);
        // Beyond capacity: not an error, just absent.
        assert!(table.slot(id(5)).is_none());
    }

    #[test]
    fn test_rescan_single_edge() {
        let mut table = StateTable::new(4);
        mark(&mut table, id(1), |s| {
            s.admin_up = true;
            s.ipv4 = true;
        });

        let out = table.rescan();
        assert_eq!(out.l4, Some(AggregateEdge::Connected(id(1))));
        assert_eq!(out.ipv4, Some(AggregateEdge::Connected(id(1))));
        assert_eq!(out.ipv6, None);
        assert_eq!(table.ready_count(), 1);
        assert!(table.slot(id(1)).unwrap().ready);
        assert!(!table.slot(id(1)).unwrap().changed);
    }

    #[test]
    fn test_rescan_edge_only_no_event_within_nonzero() {
        let mut table = StateTable::new(4);
        mark(&mut table, id(1), |s| {
            s.admin_up = true;
            s.ipv4 = true;
        });
        assert!(table.rescan().l4.is_some());

        // Second interface comes up: readyCount 1 -> 2, no edge.
        mark(&mut table, id(2), |s| {
            s.admin_up = true;
            s.ipv6 = true;
        });
        let out = table.rescan();
        assert_eq!(out.l4, None);
        // But IPv6 readiness crossed its own zero edge.
        assert_eq!(out.ipv6, Some(AggregateEdge::Connected(id(2))));
        assert_eq!(table.ready_count(), 2);

        // One of them drops: 2 -> 1, still no aggregate edge.
        mark(&mut table, id(2), |s| s.admin_up = false);
        let out = table.rescan();
        assert_eq!(out.l4, None);
        assert_eq!(out.ipv6, Some(AggregateEdge::Disconnected(id(2))));
        assert_eq!(table.ready_count(), 1);
    }

    #[test]
    fn test_rescan_attribution_with_unrelated_change() {
        let mut table = StateTable::new(4);
        // B changes state in the same batch without affecting
        // readiness; the edge must still be attributed to A.
        mark(&mut table, id(2), |s| s.ipv6 = true); // B: addr but down
        mark(&mut table, id(1), |s| {
            s.admin_up = true;
            s.ipv4 = true;
        });

        let out = table.rescan();
        assert_eq!(out.l4, Some(AggregateEdge::Connected(id(1))));
    }

    #[test]
    fn test_ignored_never_contributes() {
        let mut table = StateTable::new(4);
        mark(&mut table, id(1), |s| {
            s.admin_up = true;
            s.ipv4 = true;
            s.ipv6 = true;
            s.ignored = true;
        });
        assert_eq!(table.rescan(), RescanOutcome::default());
        assert_eq!(table.ready_count(), 0);

        // Toggle another interface around it; the ignored one still
        // never becomes the cause.
        mark(&mut table, id(2), |s| {
            s.admin_up = true;
            s.ipv4 = true;
        });
        assert_eq!(table.rescan().l4, Some(AggregateEdge::Connected(id(2))));
        mark(&mut table, id(2), |s| s.admin_up = false);
        assert_eq!(table.rescan().l4, Some(AggregateEdge::Disconnected(id(2))));
    }

    #[test]
    fn test_rescan_coalesces_flap() {
        let mut table = StateTable::new(4);
        // A slot that flapped and settled back before the monitor ran:
        // no net change, no event.
        mark(&mut table, id(1), |s| s.changed = true);
        assert_eq!(table.rescan(), RescanOutcome::default());
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut table = StateTable::new(4);
        mark(&mut table, id(1), |s| {
            s.admin_up = true;
            s.ipv4 = true;
        });
        table.rescan();
        assert_eq!(table.ready_count(), 1);

        table.reset();
        assert_eq!(table.ready_count(), 0);
        assert!(table.slot(id(1)).unwrap().is_untracked());
    }
}
