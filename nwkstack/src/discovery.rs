//! Route discovery table.
//!
//! Bookkeeping for discovery floods in progress, keyed by (request id,
//! originator). The flood itself is run by an external route-request /
//! route-reply handler; this table provides duplicate suppression, the
//! backward hop for replies, and timeout cleanup.

use alloc::vec::Vec;

use crate::collections::{Handle, SlotTable};
use crate::route_table::RoutingTable;
use crate::types::{
    NwkError, RouteStatus, ShortAddr, DISCOVERY_EXPIRY_TICKS, INVALID_PATH_COST,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryEntry {
    pub rreq_id: u8,
    pub src_addr: ShortAddr,
    /// Neighbor that relayed the request to us; replies go back through it.
    pub sender_addr: ShortAddr,
    pub dest_addr: ShortAddr,
    pub forward_cost: u8,
    pub residual_cost: u8,
    pub expiry: u8,
}

/// A discovery that timed out during `periodic`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiredDiscovery {
    pub entry: DiscoveryEntry,
    /// The destination's routing entry never became active and was removed.
    pub route_purged: bool,
}

pub struct DiscoveryTable {
    entries: SlotTable<DiscoveryEntry>,
}

impl DiscoveryTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: SlotTable::with_capacity(capacity),
        }
    }

    pub fn find(&self, rreq_id: u8, src_addr: ShortAddr) -> Option<Handle> {
        self.entries
            .find(|e| e.rreq_id == rreq_id && e.src_addr == src_addr)
    }

    pub fn get(&self, handle: Handle) -> Option<&DiscoveryEntry> {
        self.entries.get(handle)
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut DiscoveryEntry> {
        self.entries.get_mut(handle)
    }

    /// Track a newly observed request. The residual cost starts unknown.
    pub fn add_new(
        &mut self,
        rreq_id: u8,
        src_addr: ShortAddr,
        sender_addr: ShortAddr,
        dest_addr: ShortAddr,
        forward_cost: u8,
    ) -> Result<Handle, NwkError> {
        if self.find(rreq_id, src_addr).is_some() {
            return Err(NwkError::AlreadyExists);
        }
        self.entries
            .insert(DiscoveryEntry {
                rreq_id,
                src_addr,
                sender_addr,
                dest_addr,
                forward_cost,
                residual_cost: INVALID_PATH_COST,
                expiry: DISCOVERY_EXPIRY_TICKS,
            })
            .ok_or(NwkError::TableFull)
    }

    pub fn free(&mut self, handle: Handle) -> Option<DiscoveryEntry> {
        self.entries.remove(handle)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// One slow tick. Entries whose expiry reaches zero are removed, and a
    /// routing entry for their destination that never became active goes
    /// with them.
    pub fn periodic(&mut self, routes: &mut RoutingTable) -> Vec<ExpiredDiscovery> {
        let expired = self.entries.retain(|e| {
            e.expiry = e.expiry.saturating_sub(1);
            e.expiry > 0
        });

        expired
            .into_iter()
            .map(|entry| {
                let never_active = routes
                    .find(entry.dest_addr)
                    .is_some_and(|r| r.status != RouteStatus::Active);
                if never_active {
                    routes.remove(entry.dest_addr);
                }
                ExpiredDiscovery {
                    entry,
                    route_purged: never_active,
                }
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DiscoveryEntry> + '_ {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_new_defaults() {
        let mut t = DiscoveryTable::new(4);
        let h = t.add_new(7, 0x10, 0x11, 0x40, 3).unwrap();
        let e = t.get(h).unwrap();
        assert_eq!(e.residual_cost, INVALID_PATH_COST);
        assert_eq!(e.expiry, DISCOVERY_EXPIRY_TICKS);
        assert_eq!(t.find(7, 0x10), Some(h));
        assert_eq!(t.find(7, 0x12), None);
    }

    #[test]
    fn test_duplicate_request_rejected() {
        let mut t = DiscoveryTable::new(4);
        t.add_new(7, 0x10, 0x11, 0x40, 3).unwrap();
        assert_eq!(
            t.add_new(7, 0x10, 0x12, 0x40, 1),
            Err(NwkError::AlreadyExists)
        );
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_expiry_decreases_until_removal() {
        let mut t = DiscoveryTable::new(4);
        let mut routes = RoutingTable::new(4);
        let h = t.add_new(1, 0x10, 0x11, 0x40, 0).unwrap();

        let mut last = t.get(h).unwrap().expiry;
        for _ in 0..DISCOVERY_EXPIRY_TICKS - 1 {
            assert!(t.periodic(&mut routes).is_empty());
            let now = t.get(h).unwrap().expiry;
            assert!(now < last);
            assert!(now > 0);
            last = now;
        }
        let expired = t.periodic(&mut routes);
        assert_eq!(expired.len(), 1);
        assert!(t.get(h).is_none());
    }

    #[test]
    fn test_expiry_purges_inactive_route_only() {
        let mut t = DiscoveryTable::new(4);
        let mut routes = RoutingTable::new(4);
        t.add_new(1, 0x10, 0x11, 0x40, 0).unwrap();
        t.add_new(2, 0x10, 0x11, 0x50, 0).unwrap();
        routes.add_or_update(0x40, RouteStatus::DiscoveryUnderway).unwrap();
        routes.add_route(0x50, 0x11, RouteStatus::Active).unwrap();

        let mut expired = Vec::new();
        for _ in 0..DISCOVERY_EXPIRY_TICKS {
            expired.extend(t.periodic(&mut routes));
        }

        assert_eq!(expired.len(), 2);
        assert_eq!(expired[0].entry.dest_addr, 0x40);
        assert!(expired[0].route_purged);
        assert!(!expired[1].route_purged);
        assert!(routes.find(0x40).is_none());
        assert!(routes.find(0x50).is_some());
    }

    #[test]
    fn test_free_and_clear() {
        let mut t = DiscoveryTable::new(2);
        let h = t.add_new(1, 0x10, 0x11, 0x40, 0).unwrap();
        assert!(t.free(h).is_some());
        assert!(t.free(h).is_none());
        t.add_new(2, 0x10, 0x11, 0x40, 0).unwrap();
        t.clear();
        assert!(t.is_empty());
    }
}
