//! Short/extended address correlation for the layers above.

use hashbrown::HashMap;

use crate::types::{ExtAddr, NwkError, ShortAddr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressMapEntry {
    pub short_addr: ShortAddr,
    pub ext_addr: ExtAddr,
    pub capability: u8,
}

/// Bounded map keyed by extended address. A short address belongs to at
/// most one device: recording it for a new device evicts the old mapping.
pub struct AddressMap {
    entries: HashMap<ExtAddr, AddressMapEntry>,
    capacity: usize,
}

impl AddressMap {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            capacity,
        }
    }

    pub fn add(
        &mut self,
        short_addr: ShortAddr,
        ext_addr: ExtAddr,
        capability: u8,
    ) -> Result<(), NwkError> {
        self.entries
            .retain(|ext, e| *ext == ext_addr || e.short_addr != short_addr);

        if let Some(entry) = self.entries.get_mut(&ext_addr) {
            entry.short_addr = short_addr;
            entry.capability = capability;
            return Ok(());
        }
        if self.entries.len() >= self.capacity {
            return Err(NwkError::TableFull);
        }
        self.entries.insert(
            ext_addr,
            AddressMapEntry {
                short_addr,
                ext_addr,
                capability,
            },
        );
        Ok(())
    }

    /// Update the short address seen for `ext_addr`, keeping its capability.
    pub fn refresh(&mut self, short_addr: ShortAddr, ext_addr: ExtAddr) -> Result<(), NwkError> {
        let capability = self.entries.get(&ext_addr).map_or(0, |e| e.capability);
        self.add(short_addr, ext_addr, capability)
    }

    pub fn find_by_short(&self, short_addr: ShortAddr) -> Option<&AddressMapEntry> {
        self.entries.values().find(|e| e.short_addr == short_addr)
    }

    pub fn find_by_ext(&self, ext_addr: ExtAddr) -> Option<&AddressMapEntry> {
        self.entries.get(&ext_addr)
    }

    pub fn remove(&mut self, ext_addr: ExtAddr) -> Option<AddressMapEntry> {
        self.entries.remove(&ext_addr)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
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
    fn test_lookup_both_ways() {
        let mut m = AddressMap::new(4);
        m.add(0x0034, 0xDEAD_BEEF, 0x8E).unwrap();
        assert_eq!(m.find_by_short(0x0034).unwrap().ext_addr, 0xDEAD_BEEF);
        assert_eq!(m.find_by_ext(0xDEAD_BEEF).unwrap().capability, 0x8E);
        assert!(m.find_by_short(0x0035).is_none());
    }

    #[test]
    fn test_rejoin_updates_short_address() {
        let mut m = AddressMap::new(4);
        m.add(0x0034, 0xAA, 1).unwrap();
        m.refresh(0x0050, 0xAA).unwrap();
        assert_eq!(m.len(), 1);
        assert_eq!(m.find_by_ext(0xAA).unwrap().short_addr, 0x0050);
        assert_eq!(m.find_by_ext(0xAA).unwrap().capability, 1);
        assert!(m.find_by_short(0x0034).is_none());
    }

    #[test]
    fn test_short_address_conflict_evicts_old_device() {
        let mut m = AddressMap::new(4);
        m.add(0x0034, 0xAA, 0).unwrap();
        m.add(0x0034, 0xBB, 0).unwrap();
        assert_eq!(m.len(), 1);
        assert_eq!(m.find_by_short(0x0034).unwrap().ext_addr, 0xBB);
    }

    #[test]
    fn test_capacity_bound() {
        let mut m = AddressMap::new(1);
        m.add(1, 0xAA, 0).unwrap();
        assert_eq!(m.add(2, 0xBB, 0), Err(NwkError::TableFull));
        assert!(m.remove(0xAA).is_some());
        assert!(m.add(2, 0xBB, 0).is_ok());
        m.clear();
        assert!(m.is_empty());
    }
}
