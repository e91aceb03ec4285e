#![forbid(unsafe_code)]
//! nwkstack - network layer for IEEE 802.15.4 mesh networks
//!
//! Forwarding and routing core of a Zigbee-class network layer: it decides
//! how every data frame leaves a node and what happens to every frame that
//! arrives.
//!
//! This crate is `no_std` but **requires the `alloc` crate**. Tables are
//! heap-allocated with capacities fixed at construction, see
//! [`NwkConfig`](config::NwkConfig).
//!
//! # Key Properties
//!
//! - Hierarchical (Cskip) address assignment lets any router compute a
//!   tree next hop from addresses alone
//! - Mesh routes, once discovered, take precedence over the tree
//! - Frames to unknown destinations wait in a bounded queue while route
//!   discovery runs
//! - Broadcasts are flooded with passive acknowledgement and jittered
//!   retries, one at a time per node
//! - All timers are driven by a single one-second tick plus the broadcast
//!   ack window
//!
//! # Example (basic usage)
//!
//! ```ignore
//! use nwkstack::{DefaultConfig, NibConfig, Nwk, Timestamp};
//! use nwkstack::traits::test_impls::{MockClock, MockMac, MockRandom};
//!
//! let mut nwk = Nwk::<_, _, _, DefaultConfig>::new(
//!     MockMac::default(),
//!     MockRandom::new(),
//!     MockClock::new(),
//!     NibConfig::coordinator(),
//! );
//! nwk.form_network(Timestamp::ZERO).unwrap();
//!
//! assert!(nwk.nib().is_coordinator());
//! assert_eq!(nwk.assign_router_address(), Some(1));
//! ```
//!
//! # Example (integration pattern)
//!
//! ```text
//! use nwkstack::{Nwk, Mac, Clock, Random, DataRequest};
//!
//! // Implement Mac, Clock and Random for your platform...
//!
//! // let mut nwk = Nwk::new(mac, random, clock, NibConfig::router());
//! // nwk.join_network(parent, short_addr, depth, clock.now())?;
//!
//! // spawn(async move {
//! //     nwk.run().await;
//! // });
//!
//! // nwk.outgoing().send(DataRequest { .. }).await;
//! // let indication = nwk.incoming().receive().await;
//! ```
//!
//! # Module Structure
//!
//! - [`types`] - Addresses, statuses, requests, indications and events
//! - [`wire`] - NWK header encoding
//! - [`buffer`] - Frame buffers with header headroom
//! - [`traits`] - Mac, Clock and Random traits
//! - [`node`] - The `Nwk` engine: lifecycle, timers, channels
//! - [`routing`] - Forwarding decisions and inbound dispatch
//! - [`tree`] - Cskip address arithmetic and tree next hop
//! - [`neighbor`], [`route_table`], [`discovery`], [`pending`],
//!   [`broadcast`], [`address_map`] - NWK tables
//! - [`nib`] - Network information base
//! - [`time`] - Timestamp and Duration types
//! - [`config`] - Table capacities and device presets

#![cfg_attr(not(test), no_std)]

// Prevent test/debug features from being used in release builds.
#[cfg(all(feature = "test-support", not(test), not(debug_assertions)))]
compile_error!(
    "The `test-support` feature must not be enabled in release builds. \
     It includes a mock link layer and a predictable random source."
);

#[cfg(all(feature = "debug", not(test), not(debug_assertions)))]
compile_error!(
    "The `debug` feature must not be enabled in release builds. \
     It adds protocol tracing overhead intended only for development and simulation."
);

extern crate alloc;

pub mod address_map;
pub mod broadcast;
pub mod buffer;
pub mod collections;
pub mod config;
#[macro_use]
pub mod debug;
pub mod discovery;
pub mod neighbor;
pub mod nib;
pub mod node;
pub mod pending;
pub mod route_table;
pub mod routing;
pub mod time;
pub mod traits;
pub mod tree;
pub mod types;
pub mod wire;

// Re-export main types at crate root
pub use buffer::FrameBuf;
pub use config::{DefaultConfig, NibConfig, NwkConfig, SmallConfig};
pub use node::Nwk;
pub use routing::{ForwardOutcome, ForwardPath};
pub use time::{Duration, Timestamp};
pub use traits::{Clock, Mac, MacDataIndication, MacDataRequest, MacEvent, Random};
pub use types::{
    DataIndication, DataRequest, DeviceType, DiscoverRoute, Event, ExtAddr, Indication,
    MacStatus, NwkError, NwkMetrics, NwkStatus, PanId, RouteStatus, ShortAddr,
};
pub use wire::{DecodeError, NwkHeader};

// Re-export constants
pub use types::{
    COORDINATOR_ADDR, MAC_BROADCAST_ADDR, NWK_BROADCAST_ALL, NWK_BROADCAST_LOW_POWER_ROUTERS,
    NWK_BROADCAST_ROUTERS, NWK_BROADCAST_RX_ON_WHEN_IDLE, UNASSIGNED_ADDR,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neighbor::NeighborEntry;
    use crate::traits::test_impls::{MockClock, MockMac, MockRandom};

    type TestNwk = Nwk<MockMac, MockRandom, MockClock, DefaultConfig>;

    fn node(config: NibConfig) -> TestNwk {
        Nwk::new(
            MockMac::default(),
            MockRandom::new(),
            MockClock::new(),
            config.with_tree(4, 10, 3),
        )
    }

    /// Move every frame `from` sent onto `to`, as a link would.
    fn deliver(from: &mut TestNwk, to: &mut TestNwk) -> usize {
        let pan_id = from.mac().pan_id;
        let src = from.short_addr();
        let frames = from.mac_mut().take_sent();
        let count = frames.len();
        for (req, frame) in frames {
            let indication = MacDataIndication {
                src_addr: src,
                dest_addr: req.dest_addr,
                pan_id,
                lqi: 255,
            };
            to.handle_mac_rx(indication, frame, Timestamp::ZERO);
        }
        count
    }

    fn received(nwk: &TestNwk) -> Vec<DataIndication> {
        let mut out = Vec::new();
        while let Ok(i) = nwk.incoming().try_receive() {
            if let Indication::Data(d) = i {
                out.push(d);
            }
        }
        out
    }

    fn child_of(parent: &mut TestNwk, child: &TestNwk) {
        let mut entry = NeighborEntry::new(child.short_addr(), 0x1a62, child.nib().device_type);
        entry.relationship = types::Relationship::Child;
        entry.rx_on_when_idle = child.nib().rx_on_when_idle;
        parent.neighbors_mut().add(entry).unwrap();
    }

    #[test]
    fn test_two_hop_tree_delivery_and_reply() {
        let mut coord = node(NibConfig::coordinator());
        coord.form_network(Timestamp::ZERO).unwrap();

        let router_addr = coord.assign_router_address().unwrap();
        assert_eq!(router_addr, 1);
        let mut router = node(NibConfig::router());
        router
            .join_network(
                NeighborEntry::new(COORDINATOR_ADDR, 0x1a62, DeviceType::Coordinator),
                router_addr,
                1,
                Timestamp::ZERO,
            )
            .unwrap();
        child_of(&mut coord, &router);

        // Cskip(1) = 11: router 1's end devices start at 1 + 4 * 11 + 1.
        let ed_addr = router.assign_end_device_address().unwrap();
        assert_eq!(ed_addr, 46);
        let mut ed = node(NibConfig::end_device());
        ed.join_network(
            NeighborEntry::new(router_addr, 0x1a62, DeviceType::Router),
            ed_addr,
            2,
            Timestamp::ZERO,
        )
        .unwrap();
        child_of(&mut router, &ed);

        coord.handle_data_request(
            DataRequest {
                dest: ed_addr,
                radius: 0,
                discover_route: DiscoverRoute::Suppress,
                handle: 1,
                payload: FrameBuf::from_payload(b"down"),
            },
            Timestamp::ZERO,
        );
        assert_eq!(deliver(&mut coord, &mut router), 1);
        assert_eq!(deliver(&mut router, &mut ed), 1);

        let got = received(&ed);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].src_addr, COORDINATOR_ADDR);
        assert_eq!(got[0].link_src, router_addr);
        assert_eq!(got[0].radius, 5);
        assert_eq!(got[0].payload.payload(), b"down");

        ed.handle_data_request(
            DataRequest {
                dest: COORDINATOR_ADDR,
                radius: 0,
                discover_route: DiscoverRoute::Suppress,
                handle: 2,
                payload: FrameBuf::from_payload(b"up"),
            },
            Timestamp::ZERO,
        );
        assert_eq!(deliver(&mut ed, &mut router), 1);
        assert_eq!(deliver(&mut router, &mut coord), 1);
        let got = received(&coord);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].src_addr, ed_addr);
        assert_eq!(router.metrics().frames_relayed, 2);
    }
}
