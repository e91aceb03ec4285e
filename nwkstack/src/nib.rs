//! Network information base: this node's identity and tree parameters.

use crate::config::NibConfig;
use crate::tree::{calc_cskip, TreeLimits, TreePosition};
use crate::types::{DeviceType, ShortAddr, COORDINATOR_ADDR, UNASSIGNED_ADDR};

#[derive(Debug, Clone)]
pub struct Nib {
    pub short_addr: ShortAddr,
    pub ext_pan_id: u64,
    pub device_type: DeviceType,
    pub rx_on_when_idle: bool,
    pub max_routers: u8,
    pub max_children: u8,
    pub max_depth: u8,
    /// Router children handed an address so far.
    pub router_count: u8,
    /// End-device children handed an address so far.
    pub end_device_count: u8,
    pub joined: bool,
    depth: u8,
    cskip: u16,
    seq: u8,
}

impl Nib {
    pub fn new(config: &NibConfig) -> Self {
        let mut nib = Self {
            short_addr: UNASSIGNED_ADDR,
            ext_pan_id: config.ext_pan_id,
            device_type: config.device_type,
            rx_on_when_idle: config.rx_on_when_idle,
            max_routers: config.max_routers,
            max_children: config.max_children,
            max_depth: config.max_depth,
            router_count: 0,
            end_device_count: 0,
            joined: false,
            depth: 0,
            cskip: 0,
            seq: 0,
        };
        nib.set_depth(0);
        nib
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// Cskip at this node's depth, cached from the last `set_depth`.
    pub fn cskip(&self) -> u16 {
        self.cskip
    }

    pub fn set_depth(&mut self, depth: u8) {
        self.depth = depth;
        self.cskip = if self.device_type == DeviceType::EndDevice {
            0
        } else {
            calc_cskip(self.tree_limits(), depth)
        };
    }

    pub fn tree_limits(&self) -> TreeLimits {
        TreeLimits {
            max_routers: self.max_routers,
            max_children: self.max_children,
            max_depth: self.max_depth,
        }
    }

    pub fn tree_position(&self) -> TreePosition {
        TreePosition {
            addr: self.short_addr,
            depth: self.depth,
            is_coordinator: self.is_coordinator(),
            limits: self.tree_limits(),
        }
    }

    pub fn is_coordinator(&self) -> bool {
        self.device_type == DeviceType::Coordinator && self.short_addr == COORDINATOR_ADDR
    }

    /// Radius used when the caller passes 0.
    pub fn default_radius(&self) -> u8 {
        self.max_depth.saturating_mul(2)
    }

    /// Last sequence number handed out.
    pub fn seq(&self) -> u8 {
        self.seq
    }

    pub fn next_seq(&mut self) -> u8 {
        self.seq = self.seq.wrapping_add(1);
        self.seq
    }

    /// Forget membership; configuration and the sequence counter are kept.
    pub fn reset(&mut self) {
        self.short_addr = UNASSIGNED_ADDR;
        self.router_count = 0;
        self.end_device_count = 0;
        self.joined = false;
        self.set_depth(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_nib_is_unjoined() {
        let nib = Nib::new(&NibConfig::router());
        assert_eq!(nib.short_addr, UNASSIGNED_ADDR);
        assert!(!nib.joined);
        assert!(!nib.is_coordinator());
    }

    #[test]
    fn test_cskip_follows_depth() {
        let mut nib = Nib::new(&NibConfig::coordinator().with_tree(4, 10, 3));
        assert_eq!(nib.cskip(), 51);
        nib.set_depth(1);
        assert_eq!(nib.cskip(), 11);
        nib.set_depth(3);
        assert_eq!(nib.cskip(), 0);
    }

    #[test]
    fn test_end_device_has_no_block() {
        let nib = Nib::new(&NibConfig::end_device());
        assert_eq!(nib.cskip(), 0);
    }

    #[test]
    fn test_seq_wraps() {
        let mut nib = Nib::new(&NibConfig::router());
        for _ in 0..255 {
            nib.next_seq();
        }
        assert_eq!(nib.seq(), 255);
        assert_eq!(nib.next_seq(), 0);
    }

    #[test]
    fn test_default_radius_is_twice_depth() {
        let nib = Nib::new(&NibConfig::router().with_tree(4, 10, 3));
        assert_eq!(nib.default_radius(), 6);
    }
}
