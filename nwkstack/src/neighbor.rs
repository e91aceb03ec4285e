//! Neighbor table: single-hop peers.
//!
//! Entries are keyed by (short address, PAN id). Adding an entry whose key
//! already exists overwrites it in place, so re-association never leaves a
//! stale duplicate behind.

use alloc::vec::Vec;

use crate::collections::SlotTable;
use crate::types::{DeviceType, ExtAddr, NwkError, PanId, Relationship, ShortAddr};

/// Either address form of a neighbor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighborAddr {
    Short(ShortAddr),
    Ext(ExtAddr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborEntry {
    pub ext_addr: ExtAddr,
    pub short_addr: ShortAddr,
    pub pan_id: PanId,
    pub device_type: DeviceType,
    pub relationship: Relationship,
    pub rx_on_when_idle: bool,
    pub permit_join: bool,
    pub depth: u8,
    pub lqi: u8,
    pub ext_pan_id: u64,
    pub potential_parent: bool,
}

impl NeighborEntry {
    /// Entry with neutral defaults; callers fill in the rest.
    pub fn new(short_addr: ShortAddr, pan_id: PanId, device_type: DeviceType) -> Self {
        Self {
            ext_addr: 0,
            short_addr,
            pan_id,
            device_type,
            relationship: Relationship::None,
            rx_on_when_idle: device_type != DeviceType::EndDevice,
            permit_join: false,
            depth: 0,
            lqi: 0,
            ext_pan_id: 0,
            potential_parent: false,
        }
    }

    fn matches(&self, addr: NeighborAddr, pan_id: PanId) -> bool {
        self.pan_id == pan_id
            && match addr {
                NeighborAddr::Short(short) => self.short_addr == short,
                NeighborAddr::Ext(ext) => self.ext_addr == ext,
            }
    }
}

pub struct NeighborTable {
    entries: SlotTable<NeighborEntry>,
}

impl NeighborTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: SlotTable::with_capacity(capacity),
        }
    }

    /// Insert or overwrite. A new parent demotes any previous one; a
    /// rejected entry leaves the table untouched.
    pub fn add(&mut self, entry: NeighborEntry) -> Result<(), NwkError> {
        let key = NeighborAddr::Short(entry.short_addr);
        let pan = entry.pan_id;
        let existing = self.entries.find(|e| e.matches(key, pan));
        if existing.is_none() && self.entries.is_full() {
            return Err(NwkError::TableFull);
        }

        if entry.relationship == Relationship::Parent {
            while let Some(old) = self
                .entries
                .find_mut(|e| e.relationship == Relationship::Parent && !e.matches(key, pan))
            {
                old.relationship = Relationship::None;
            }
        }

        match existing.and_then(|handle| self.entries.get_mut(handle)) {
            Some(slot) => {
                *slot = entry;
                Ok(())
            }
            None => self.entries.insert(entry).map(|_| ()).ok_or(NwkError::TableFull),
        }
    }

    pub fn find(&self, addr: NeighborAddr, pan_id: PanId) -> Option<&NeighborEntry> {
        self.entries.values().find(|e| e.matches(addr, pan_id))
    }

    pub fn find_mut(&mut self, addr: NeighborAddr, pan_id: PanId) -> Option<&mut NeighborEntry> {
        self.entries.find_mut(|e| e.matches(addr, pan_id))
    }

    pub fn remove(&mut self, addr: NeighborAddr, pan_id: PanId) -> Option<NeighborEntry> {
        let handle = self.entries.find(|e| e.matches(addr, pan_id))?;
        self.entries.remove(handle)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn get_parent(&self) -> Option<&NeighborEntry> {
        self.entries
            .values()
            .find(|e| e.relationship == Relationship::Parent)
    }

    /// Whether `short_addr` is a known neighbor on the local PAN.
    pub fn addr_exists(&self, short_addr: ShortAddr, pan_id: PanId) -> bool {
        self.find(NeighborAddr::Short(short_addr), pan_id).is_some()
    }

    /// Neighbors in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &NeighborEntry> + '_ {
        self.entries.values()
    }

    pub fn children(&self) -> Vec<ShortAddr> {
        self.entries
            .values()
            .filter(|e| e.relationship == Relationship::Child)
            .map(|e| e.short_addr)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
