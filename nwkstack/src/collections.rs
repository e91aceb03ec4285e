//! Fixed-capacity slot table backing every NWK table.
//!
//! Entries live in a slab allocated once up to the configured capacity.
//! A separate order list keeps occupied slots in insertion order, so scans
//! and periodic sweeps visit entries the way they were added. Handles carry
//! a generation counter: a handle to a freed slot never resolves to the
//! entry that later reuses it.

use alloc::vec::Vec;

/// Stable reference to an occupied slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u16,
    generation: u16,
}

struct Slot<T> {
    generation: u16,
    value: Option<T>,
}

/// Bounded table with O(1) insert/remove by handle and insertion-ordered iteration.
pub struct SlotTable<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u16>,
    order: Vec<u16>,
    capacity: usize,
}

impl<T> SlotTable<T> {
    /// Create a table holding at most `capacity` entries (clamped to `u16` indices).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.min(u16::MAX as usize);
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::with_capacity(capacity),
            order: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.order.len() >= self.capacity
    }

    /// Store `value` in a free slot. Returns `None` when the table is full.
    pub fn insert(&mut self, value: T) -> Option<Handle> {
        let index = match self.free.pop() {
            Some(index) => index,
            None if self.slots.len() < self.capacity => {
                self.slots.push(Slot {
                    generation: 0,
                    value: None,
                });
                (self.slots.len() - 1) as u16
            }
            None => return None,
        };
        let slot = &mut self.slots[index as usize];
        slot.value = Some(value);
        self.order.push(index);
        Some(Handle {
            index,
            generation: slot.generation,
        })
    }

    pub fn get(&self, handle: Handle) -> Option<&T> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    /// Free the slot behind `handle`, returning its value.
    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        if let Some(pos) = self.order.iter().position(|&i| i == handle.index) {
            self.order.remove(pos);
        }
        Some(value)
    }

    /// First entry, in insertion order, matching `pred`.
    pub fn find<F>(&self, mut pred: F) -> Option<Handle>
    where
        F: FnMut(&T) -> bool,
    {
        self.iter().find(|(_, v)| pred(v)).map(|(h, _)| h)
    }

    pub fn find_mut<F>(&mut self, pred: F) -> Option<&mut T>
    where
        F: FnMut(&T) -> bool,
    {
        let handle = self.find(pred)?;
        self.get_mut(handle)
    }

    /// Iterate occupied slots in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> + '_ {
        self.order.iter().filter_map(move |&index| {
            let slot = &self.slots[index as usize];
            slot.value.as_ref().map(|v| {
                (
                    Handle {
                        index,
                        generation: slot.generation,
                    },
                    v,
                )
            })
        })
    }

    pub fn values(&self) -> impl Iterator<Item = &T> + '_ {
        self.iter().map(|(_, v)| v)
    }

    /// Visit every entry once in insertion order; entries for which `keep`
    /// returns false are removed and handed back.
    pub fn retain<F>(&mut self, mut keep: F) -> Vec<T>
    where
        F: FnMut(&mut T) -> bool,
    {
        let mut removed = Vec::new();
        let mut pos = 0;
        while pos < self.order.len() {
            let index = self.order[pos];
            let slot = &mut self.slots[index as usize];
            let kept = match slot.value.as_mut() {
                Some(v) => keep(v),
                None => false,
            };
            if kept {
                pos += 1;
                continue;
            }
            if let Some(v) = slot.value.take() {
                removed.push(v);
            }
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(index);
            self.order.remove(pos);
        }
        removed
    }

    /// Free every slot. Outstanding handles stop resolving.
    pub fn clear(&mut self) {
        for &index in &self.order {
            let slot = &mut self.slots[index as usize];
            slot.value = None;
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(index);
        }
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_until_full() {
        let mut t = SlotTable::with_capacity(2);
        assert!(t.insert(1).is_some());
        assert!(t.insert(2).is_some());
        assert!(t.is_full());
        assert!(t.insert(3).is_none());
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn test_iteration_follows_insertion_order() {
        let mut t = SlotTable::with_capacity(4);
        let a = t.insert('a').unwrap();
        t.insert('b').unwrap();
        t.insert('c').unwrap();
        t.remove(a);
        // Reuses slot 0 but lands at the end of the order.
        t.insert('d').unwrap();
        let seen: Vec<char> = t.values().copied().collect();
        assert_eq!(seen, vec!['b', 'c', 'd']);
    }

    #[test]
    fn test_stale_handle_does_not_resolve() {
        let mut t = SlotTable::with_capacity(1);
        let old = t.insert(10).unwrap();
        assert_eq!(t.remove(old), Some(10));
        let new = t.insert(20).unwrap();
        assert_ne!(old, new);
        assert_eq!(t.get(old), None);
        assert_eq!(t.remove(old), None);
        assert_eq!(t.get(new), Some(&20));
    }

    #[test]
    fn test_retain_returns_removed_in_order() {
        let mut t = SlotTable::with_capacity(5);
        for v in 1..=5 {
            t.insert(v).unwrap();
        }
        let removed = t.retain(|v| *v % 2 == 1);
        assert_eq!(removed, vec![2, 4]);
        assert_eq!(t.values().copied().collect::<Vec<_>>(), vec![1, 3, 5]);
        // Freed slots are reusable.
        assert!(t.insert(6).is_some());
        assert!(t.insert(7).is_some());
        assert!(t.is_full());
    }

    #[test]
    fn test_clear_invalidates_handles() {
        let mut t = SlotTable::with_capacity(3);
        let h = t.insert("x").unwrap();
        t.clear();
        assert!(t.is_empty());
        assert_eq!(t.get(h), None);
        assert!(t.insert("y").is_some());
    }

    #[test]
    fn test_find_mut() {
        let mut t = SlotTable::with_capacity(3);
        t.insert((1u16, 0u8)).unwrap();
        t.insert((2u16, 0u8)).unwrap();
        if let Some(e) = t.find_mut(|e| e.0 == 2) {
            e.1 = 9;
        }
        assert_eq!(t.values().find(|e| e.0 == 2).map(|e| e.1), Some(9));
    }
}
