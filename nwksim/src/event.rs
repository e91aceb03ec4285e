//! Event types and priority queue ordering for discrete event simulation.

use std::cmp::Ordering;

use nwkstack::{DiscoverRoute, MacStatus, ShortAddr, Timestamp};

/// Unique sequence number for deterministic event ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Scenario actions that can be scheduled during simulation.
#[derive(Debug, Clone)]
pub enum ScenarioAction {
    /// Take down every link crossing between groups.
    Partition { groups: Vec<Vec<ShortAddr>> },
    /// Bring every link back up.
    HealPartition,
    /// Take a radio link down.
    DisableLink { a: ShortAddr, b: ShortAddr },
    /// Bring a radio link back up.
    EnableLink { a: ShortAddr, b: ShortAddr },
    /// Set loss rate on a link.
    SetLossRate { a: ShortAddr, b: ShortAddr, rate: f64 },
    /// Install an active mesh route on `node` and resubmit its parked
    /// frames, as a completed route discovery would.
    InstallRoute {
        node: ShortAddr,
        dest: ShortAddr,
        next_hop: ShortAddr,
    },
    /// Take a network snapshot for metrics.
    TakeSnapshot,
}

/// Data the upper layer of `from` asks its network layer to send.
#[derive(Debug, Clone)]
pub struct AppSend {
    pub from: ShortAddr,
    pub dest: ShortAddr,
    pub payload: Vec<u8>,
    pub radius: u8,
    pub discover_route: DiscoverRoute,
}

/// Events in the discrete event simulation.
#[derive(Debug, Clone)]
pub enum Event {
    /// A frame arrives at `to` over the link from `from`.
    FrameDelivery {
        to: ShortAddr,
        from: ShortAddr,
        mac_dest: ShortAddr,
        frame: Vec<u8>,
        lqi: u8,
    },
    /// The link layer of `node` reports a transmission outcome.
    MacConfirm {
        node: ShortAddr,
        handle: Option<u8>,
        status: MacStatus,
    },
    /// Fire timer for a node.
    TimerFire { node: ShortAddr },
    /// Application data request.
    AppSend(AppSend),
    /// Execute a scenario action.
    ScenarioAction(ScenarioAction),
}

/// A scheduled event with timestamp and sequence number for ordering.
#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    /// When the event should occur.
    pub time: Timestamp,
    /// Sequence number for deterministic ordering of same-time events.
    pub seq: SequenceNumber,
    /// The event to process.
    pub event: Event,
}

impl ScheduledEvent {
    pub fn new(time: Timestamp, seq: SequenceNumber, event: Event) -> Self {
        Self { time, seq, event }
    }
}

// Implement ordering for min-heap (BinaryHeap is max-heap, so we reverse).
impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Earlier time first, then lower sequence number.
        match other.time.cmp(&self.time) {
            Ordering::Equal => other.seq.cmp(&self.seq),
            ord => ord,
        }
    }
}
