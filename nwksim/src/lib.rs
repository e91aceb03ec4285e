//! nwksim - Discrete event simulator for nwkstack networks.
//!
//! Runs whole networks of `nwkstack` engines in one process without
//! real-time delays, so forwarding and flooding behavior can be tested
//! end to end and deterministically.
//!
//! # Features
//!
//! - **Discrete event simulation**: events ordered by (time, sequence number)
//! - **Tree construction**: nodes join under a parent and receive Cskip addresses
//! - **Radio links**: per-link LQI, loss and delay; extra non-tree links for mesh
//! - **Link-layer semantics**: broadcasts reach every node in range, unicasts
//!   are acknowledged and confirmed to the sender
//! - **Scenario builder**: index-based setup with scheduled sends and actions
//! - **Metrics**: per-node counter snapshots and link-level totals
//!
//! # Example
//!
//! ```
//! use nwksim::{star_scenario, Duration};
//!
//! // Coordinator with three routers, idle for five seconds
//! let result = star_scenario(3).run_for(Duration::from_secs(5)).unwrap();
//!
//! assert!(result.settled());
//! assert_eq!(result.total_delivered(), 0);
//! ```
//!
//! # Architecture
//!
//! The main loop:
//! 1. Pop next event from queue
//! 2. Advance simulation time
//! 3. Call the node handler (`handle_mac_rx`, `handle_mac_confirm`,
//!    `handle_timer` or `handle_data_request`)
//! 4. Collect the node's transmit requests and schedule link deliveries
//! 5. Re-arm the node's timer from `next_wake`
//!
//! Handlers are called directly instead of through the async `Nwk::run`.

pub mod event;
pub mod metrics;
pub mod node;
pub mod scenario;
pub mod sim;
pub mod topology;

// Re-export main types
pub use event::{AppSend, Event, ScenarioAction, ScheduledEvent};
pub use metrics::{NetworkSnapshot, NodeSnapshot, SimMetrics, SimulationResult};
pub use node::{SimClock, SimMac, SimNode, SIM_PAN_ID};
pub use nwkstack::{Duration, ShortAddr, Timestamp};
pub use scenario::{chain_scenario, star_scenario, ScenarioBuilder, Target};
pub use sim::Simulator;
pub use topology::{Link, Topology};
