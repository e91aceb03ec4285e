//! Frames parked while route discovery runs.

use alloc::vec::Vec;

use crate::buffer::FrameBuf;
use crate::collections::SlotTable;
use crate::route_table::RoutingTable;
use crate::types::{NwkError, ShortAddr, PENDING_EXPIRY_TICKS};
use crate::wire::NwkHeader;

/// A queued frame with the header it will be re-sent with.
#[derive(Debug, Clone)]
pub struct PendingFrame {
    pub frame: FrameBuf,
    pub header: NwkHeader,
    /// Confirm handle for locally originated frames.
    pub handle: Option<u8>,
    pub expiry: u8,
}

pub struct PendingQueue {
    entries: SlotTable<PendingFrame>,
}

impl PendingQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: SlotTable::with_capacity(capacity),
        }
    }

    /// Take ownership of `frame`. On a full queue the frame is dropped.
    pub fn add_new(
        &mut self,
        frame: FrameBuf,
        header: NwkHeader,
        handle: Option<u8>,
    ) -> Result<(), NwkError> {
        self.entries
            .insert(PendingFrame {
                frame,
                header,
                handle,
                expiry: PENDING_EXPIRY_TICKS,
            })
            .map(|_| ())
            .ok_or(NwkError::TableFull)
    }

    /// Remove and return, in queue order, every frame whose destination now
    /// has a usable route.
    pub fn take_routable(&mut self, routes: &RoutingTable) -> Vec<PendingFrame> {
        self.entries.retain(|p| !routes.rte_exists(p.header.dest_addr))
    }

    /// One slow tick; returns frames whose discovery timed out.
    pub fn periodic(&mut self) -> Vec<PendingFrame> {
        self.entries.retain(|p| {
            p.expiry = p.expiry.saturating_sub(1);
            p.expiry > 0
        })
    }

    pub fn contains(&self, dest: ShortAddr) -> bool {
        self.entries.values().any(|p| p.header.dest_addr == dest)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingFrame> + '_ {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
