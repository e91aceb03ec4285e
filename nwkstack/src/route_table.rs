//! Mesh routing table: destination to next hop.
//!
//! Entries are created by the route-discovery protocol. A route found by
//! discovery carries its next hop once the reply arrives (`set_next_hop` or
//! `add_route`); until then the entry is tracked but unusable.

use crate::collections::SlotTable;
use crate::types::{NwkError, RouteStatus, ShortAddr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteEntry {
    pub dest: ShortAddr,
    pub status: RouteStatus,
    pub next_hop: Option<ShortAddr>,
}

pub struct RoutingTable {
    entries: SlotTable<RouteEntry>,
}

impl RoutingTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: SlotTable::with_capacity(capacity),
        }
    }

    pub fn find(&self, dest: ShortAddr) -> Option<&RouteEntry> {
        self.entries.values().find(|e| e.dest == dest)
    }

    /// Create an entry for `dest` or update the status of the existing one.
    pub fn add_or_update(&mut self, dest: ShortAddr, status: RouteStatus) -> Result<(), NwkError> {
        if let Some(entry) = self.entries.find_mut(|e| e.dest == dest) {
            entry.status = status;
            return Ok(());
        }
        self.entries
            .insert(RouteEntry {
                dest,
                status,
                next_hop: None,
            })
            .map(|_| ())
            .ok_or(NwkError::TableFull)
    }

    /// `add_or_update` plus the next hop, as delivered by a route reply.
    pub fn add_route(
        &mut self,
        dest: ShortAddr,
        next_hop: ShortAddr,
        status: RouteStatus,
    ) -> Result<(), NwkError> {
        self.add_or_update(dest, status)?;
        self.set_next_hop(dest, next_hop);
        Ok(())
    }

    /// Record the next hop for an existing entry. Returns false if there is none.
    pub fn set_next_hop(&mut self, dest: ShortAddr, next_hop: ShortAddr) -> bool {
        match self.entries.find_mut(|e| e.dest == dest) {
            Some(entry) => {
                entry.next_hop = Some(next_hop);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, dest: ShortAddr) -> Option<RouteEntry> {
        let handle = self.entries.find(|e| e.dest == dest)?;
        self.entries.remove(handle)
    }

    /// Whether `dest` has an active or validation-underway entry.
    pub fn rte_exists(&self, dest: ShortAddr) -> bool {
        self.find(dest).is_some_and(|e| e.status.is_usable())
    }

    /// Next hop toward `dest` if the entry is usable.
    ///
    /// Using a validation-underway entry promotes it to active.
    pub fn get_next_hop(&mut self, dest: ShortAddr) -> Option<ShortAddr> {
        let entry = self.entries.find_mut(|e| e.dest == dest)?;
        if !entry.status.is_usable() {
            return None;
        }
        entry.status = RouteStatus::Active;
        entry.next_hop
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &RouteEntry> + '_ {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
