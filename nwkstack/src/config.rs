//! Configuration: table capacities fixed at compile time, tree parameters
//! fixed at network formation.
//!
//! The `NwkConfig` trait sizes every bounded table. Pick `DefaultConfig`
//! for routers on larger parts and `SmallConfig` for constrained end
//! devices, or implement the trait for your own target:
//!
//! ```ignore
//! use nwkstack::{Nwk, NibConfig, NwkConfig};
//!
//! struct TinyConfig;
//! impl NwkConfig for TinyConfig {
//!     const MAX_NEIGHBORS: usize = 6;
//!     // ...
//! }
//!
//! let nwk = Nwk::<_, _, _, TinyConfig>::new(mac, random, clock, NibConfig::end_device());
//! ```

use crate::types::DeviceType;

/// Compile-time table capacities. All bounds must be non-zero.
pub trait NwkConfig {
    /// Neighbor table entries.
    const MAX_NEIGHBORS: usize;

    /// Routing table entries.
    const MAX_ROUTES: usize;

    /// Concurrent route discoveries tracked.
    const MAX_DISCOVERY: usize;

    /// Frames parked while waiting for a route.
    const MAX_PENDING: usize;

    /// Passive-ack (broadcast transaction) records.
    const MAX_PASSIVE_ACKS: usize;

    /// Short/extended address correlations.
    const MAX_ADDRESS_MAP: usize;
}

/// Capacities for routers and coordinators.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConfig;

impl NwkConfig for DefaultConfig {
    const MAX_NEIGHBORS: usize = 32;
    const MAX_ROUTES: usize = 32;
    const MAX_DISCOVERY: usize = 8;
    const MAX_PENDING: usize = 8;
    const MAX_PASSIVE_ACKS: usize = 16;
    const MAX_ADDRESS_MAP: usize = 32;
}

/// Capacities for constrained devices.
#[derive(Debug, Clone, Copy, Default)]
pub struct SmallConfig;

impl NwkConfig for SmallConfig {
    const MAX_NEIGHBORS: usize = 8;
    const MAX_ROUTES: usize = 4;
    const MAX_DISCOVERY: usize = 2;
    const MAX_PENDING: usize = 2;
    const MAX_PASSIVE_ACKS: usize = 4;
    const MAX_ADDRESS_MAP: usize = 8;
}

/// Runtime network parameters loaded into the NIB.
///
/// `max_routers`, `max_children` and `max_depth` define the tree address
/// allocation and must match across the whole network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NibConfig {
    pub device_type: DeviceType,
    pub max_routers: u8,
    pub max_children: u8,
    pub max_depth: u8,
    pub rx_on_when_idle: bool,
    pub ext_pan_id: u64,
}

impl NibConfig {
    pub fn coordinator() -> Self {
        Self {
            device_type: DeviceType::Coordinator,
            ..Self::default()
        }
    }

    pub fn router() -> Self {
        Self::default()
    }

    pub fn end_device() -> Self {
        Self {
            device_type: DeviceType::EndDevice,
            rx_on_when_idle: false,
            ..Self::default()
        }
    }

    /// Override the tree parameters.
    pub fn with_tree(mut self, max_routers: u8, max_children: u8, max_depth: u8) -> Self {
        self.max_routers = max_routers;
        self.max_children = max_children;
        self.max_depth = max_depth;
        self
    }
}

impl Default for NibConfig {
    fn default() -> Self {
        Self {
            device_type: DeviceType::Router,
            max_routers: 6,
            max_children: 20,
            max_depth: 5,
            rx_on_when_idle: true,
            ext_pan_id: 0,
        }
    }
}
