//! Core types and constants for the network layer.

use crate::buffer::FrameBuf;
use crate::time::Duration;
use crate::wire::{DecodeError, NwkHeader};

/// 16-bit network (short) address assigned on join.
pub type ShortAddr = u16;

/// 64-bit IEEE extended address.
pub type ExtAddr = u64;

/// 16-bit PAN identifier.
pub type PanId = u16;

// Well-known addresses
pub const COORDINATOR_ADDR: ShortAddr = 0x0000;
/// Short address of a node that has not joined yet.
pub const UNASSIGNED_ADDR: ShortAddr = 0xFFFE;
/// Link-layer broadcast destination.
pub const MAC_BROADCAST_ADDR: ShortAddr = 0xFFFF;
/// Lowest address of the reserved broadcast range (0xFFF8..=0xFFFF).
pub const NWK_BROADCAST_MASK: ShortAddr = 0xFFF8;
pub const NWK_BROADCAST_ALL: ShortAddr = 0xFFFF;
pub const NWK_BROADCAST_RX_ON_WHEN_IDLE: ShortAddr = 0xFFFD;
pub const NWK_BROADCAST_ROUTERS: ShortAddr = 0xFFFC;
pub const NWK_BROADCAST_LOW_POWER_ROUTERS: ShortAddr = 0xFFFB;

/// Sentinel for an unknown residual path cost in route discovery.
pub const INVALID_PATH_COST: u8 = 0xFF;

// Frame sizing
pub const NWK_PROTOCOL_VERSION: u8 = 2;
/// Fixed part of the NWK header (fcf + dest + src + radius + seq).
pub const NWK_HEADER_MIN_LEN: usize = 8;
/// Header with both IEEE addresses present.
pub const NWK_HEADER_MAX_LEN: usize = NWK_HEADER_MIN_LEN + 16;
/// Headroom reserved in locally built frames for the NWK and MAC headers.
pub const FRAME_HEADROOM: usize = 40;
/// Largest NWK frame (header + payload) a MAC data request may carry.
pub const DEFAULT_MTU: usize = 102;

// Timing. Expiry counters count slow ticks.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);
pub const DISCOVERY_EXPIRY_TICKS: u8 = 10;
pub const PENDING_EXPIRY_TICKS: u8 = 10;
pub const PASSIVE_ACK_EXPIRY_TICKS: u8 = 9;
/// Window during which neighbors are expected to relay a broadcast.
pub const PASSIVE_ACK_TIMEOUT: Duration = Duration::from_millis(500);
pub const MAX_BROADCAST_RETRIES: u8 = 3;
pub const MAX_BROADCAST_JITTER_MS: u64 = 64;

/// Role of a device in the network tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeviceType {
    Coordinator,
    Router,
    EndDevice,
}

impl DeviceType {
    /// Coordinators and routers relay traffic and own address blocks.
    pub fn is_router_capable(self) -> bool {
        matches!(self, DeviceType::Coordinator | DeviceType::Router)
    }
}

/// Relationship of a neighbor to this node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Relationship {
    Parent,
    Child,
    None,
}

/// Routing-table entry status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RouteStatus {
    Active,
    DiscoveryUnderway,
    ValidationUnderway,
}

impl RouteStatus {
    /// Active and validation-underway entries may carry traffic.
    pub fn is_usable(self) -> bool {
        matches!(self, RouteStatus::Active | RouteStatus::ValidationUnderway)
    }
}

/// Device-class filter encoded in a broadcast destination address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BroadcastClass {
    /// 0xFFFF: every device.
    All,
    /// 0xFFFD: devices with the receiver on when idle.
    RxOnWhenIdle,
    /// 0xFFFC: coordinator and routers.
    Routers,
    /// 0xFFFB: low-power routers.
    LowPowerRouters,
}

impl BroadcastClass {
    /// Decode the class of a broadcast address. Reserved addresses in the
    /// broadcast range yield `None`.
    pub fn from_addr(addr: ShortAddr) -> Option<Self> {
        match addr {
            NWK_BROADCAST_ALL => Some(BroadcastClass::All),
            NWK_BROADCAST_RX_ON_WHEN_IDLE => Some(BroadcastClass::RxOnWhenIdle),
            NWK_BROADCAST_ROUTERS => Some(BroadcastClass::Routers),
            NWK_BROADCAST_LOW_POWER_ROUTERS => Some(BroadcastClass::LowPowerRouters),
            _ => None,
        }
    }

    /// Whether a device of this type and receiver mode is addressed by the class.
    pub fn matches(self, device_type: DeviceType, rx_on_when_idle: bool) -> bool {
        match self {
            BroadcastClass::All => true,
            BroadcastClass::RxOnWhenIdle => rx_on_when_idle || device_type.is_router_capable(),
            BroadcastClass::Routers => device_type.is_router_capable(),
            BroadcastClass::LowPowerRouters => device_type == DeviceType::Router,
        }
    }
}

/// True for any address in the reserved broadcast range.
pub fn is_broadcast(addr: ShortAddr) -> bool {
    addr >= NWK_BROADCAST_MASK
}

/// Status reported to the layer above in a confirm.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NwkStatus {
    Success,
    InvalidRequest,
    NotPermitted,
    /// Tree routing could not compute a next hop.
    RouteError,
    /// Route discovery never completed for a queued frame.
    RouteDiscoveryFailed,
    FrameTooLong,
    /// Link-layer delivery failed (no ack, channel access failure, ...).
    MacFailure,
}

/// Link-layer confirm status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MacStatus {
    Success,
    NoAck,
    ChannelAccessFailure,
    TransactionExpired,
}

impl From<MacStatus> for NwkStatus {
    fn from(status: MacStatus) -> Self {
        match status {
            MacStatus::Success => NwkStatus::Success,
            _ => NwkStatus::MacFailure,
        }
    }
}

/// Route-discovery request for a destination: whether the frame may wait for one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DiscoverRoute {
    #[default]
    Suppress,
    Enable,
}

/// Error type for table and engine operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum NwkError {
    /// Table or pool is at capacity.
    #[error("table full")]
    TableFull,
    /// Entry keyed the same way already exists.
    #[error("entry already exists")]
    AlreadyExists,
    /// Operation not permitted in the current state.
    #[error("operation not permitted")]
    NotPermitted,
    /// Request parameters are invalid for this node.
    #[error("invalid request")]
    InvalidRequest,
    /// No next hop could be computed.
    #[error("no route to destination")]
    NoRoute,
    /// Frame does not fit the link-layer MTU.
    #[error("frame too large")]
    FrameTooLarge,
    /// Received frame could not be decoded.
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),
}

/// Outbound request from the layer above.
#[derive(Clone, Debug)]
pub struct DataRequest {
    /// Destination short address (unicast or broadcast form).
    pub dest: ShortAddr,
    /// Hop budget; 0 selects the default radius (twice the maximum depth).
    pub radius: u8,
    pub discover_route: DiscoverRoute,
    /// Handle echoed back in the confirm.
    pub handle: u8,
    /// Network-layer payload, with headroom for headers.
    pub payload: FrameBuf,
}

/// Data delivered to the layer above.
#[derive(Clone, Debug)]
pub struct DataIndication {
    pub src_addr: ShortAddr,
    pub dest_addr: ShortAddr,
    /// Neighbor the frame was received from.
    pub link_src: ShortAddr,
    pub seq: u8,
    pub radius: u8,
    pub lqi: u8,
    pub payload: FrameBuf,
}

/// Messages from the network layer to the layer above.
#[derive(Clone, Debug)]
pub enum Indication {
    Data(DataIndication),
    Confirm { handle: u8, status: NwkStatus },
}

/// Events for external collaborators (route-discovery flood protocol,
/// command handlers, management).
#[derive(Clone, Debug)]
pub enum Event {
    /// Start route discovery toward `dest`; queued frames wait in the
    /// pending queue until `send_pending` finds a route.
    RouteDiscovery { dest: ShortAddr, radius: u8 },
    /// A NWK command frame was received. The buffer has been released; the
    /// payload is copied out for the command handler.
    Command {
        header: NwkHeader,
        link_src: ShortAddr,
        payload: alloc::vec::Vec<u8>,
    },
    /// Discovery for `dest` timed out; `route_purged` tells whether a
    /// never-activated routing-table entry was removed with it.
    DiscoveryTimeout { dest: ShortAddr, route_purged: bool },
    /// The active broadcast stopped retrying.
    BroadcastFinished { seq: u8, all_relayed: bool },
}

/// Counters kept by the engine. Every dropped frame lands in one of them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NwkMetrics {
    /// Frames handed to the link layer (first transmissions and relays).
    pub frames_sent: u32,
    /// Frames relayed on behalf of another source.
    pub frames_relayed: u32,
    /// Frames delivered to the layer above.
    pub frames_delivered: u32,
    /// Frames received from the link layer.
    pub frames_received: u32,
    /// Received frames that failed to decode or were not for a serviced class.
    pub rx_dropped: u32,
    /// Broadcasts already seen from the same neighbor.
    pub duplicates: u32,
    /// Frames dropped because their radius ran out.
    pub radius_exhausted: u32,
    /// Tree routing produced no next hop.
    pub tree_route_failures: u32,
    /// Frames that could not be queued for discovery.
    pub pending_dropped: u32,
    /// Queued frames whose discovery timed out.
    pub pending_expired: u32,
    pub broadcast_rejected: u32,
    pub broadcast_retries: u32,
    /// Frames larger than the link MTU.
    pub oversize_dropped: u32,
    /// Link-layer failures for frames without a confirm handle.
    pub relay_failures: u32,
}

impl NwkMetrics {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_range() {
        assert!(is_broadcast(0xFFFF));
        assert!(is_broadcast(0xFFF8));
        assert!(!is_broadcast(0xFFF7));
        assert!(!is_broadcast(COORDINATOR_ADDR));
    }

    #[test]
    fn test_broadcast_class_decoding() {
        assert_eq!(BroadcastClass::from_addr(0xFFFF), Some(BroadcastClass::All));
        assert_eq!(BroadcastClass::from_addr(0xFFFD), Some(BroadcastClass::RxOnWhenIdle));
        assert_eq!(BroadcastClass::from_addr(0xFFFC), Some(BroadcastClass::Routers));
        assert_eq!(BroadcastClass::from_addr(0xFFFE), None);
        assert_eq!(BroadcastClass::from_addr(0x1234), None);
    }

    #[test]
    fn test_broadcast_class_matching() {
        assert!(BroadcastClass::Routers.matches(DeviceType::Coordinator, true));
        assert!(!BroadcastClass::Routers.matches(DeviceType::EndDevice, true));
        assert!(BroadcastClass::RxOnWhenIdle.matches(DeviceType::EndDevice, true));
        assert!(!BroadcastClass::RxOnWhenIdle.matches(DeviceType::EndDevice, false));
        assert!(BroadcastClass::All.matches(DeviceType::EndDevice, false));
    }

    #[test]
    fn test_route_status_usable() {
        assert!(RouteStatus::Active.is_usable());
        assert!(RouteStatus::ValidationUnderway.is_usable());
        assert!(!RouteStatus::DiscoveryUnderway.is_usable());
    }

    #[test]
    fn test_mac_status_maps_to_nwk_status() {
        assert_eq!(NwkStatus::from(MacStatus::Success), NwkStatus::Success);
        assert_eq!(NwkStatus::from(MacStatus::NoAck), NwkStatus::MacFailure);
    }
}
