//! Metrics collection for simulation analysis.

use hashbrown::HashMap;
use nwkstack::{NwkMetrics, ShortAddr, Timestamp};

/// Per-node state captured by a snapshot.
#[derive(Debug, Clone, Default)]
pub struct NodeSnapshot {
    pub counters: NwkMetrics,
    /// Frames parked waiting for a route.
    pub pending: usize,
    pub routes: usize,
    pub broadcast_active: bool,
}

/// Network state at a point in time.
#[derive(Debug, Clone)]
pub struct NetworkSnapshot {
    /// When this snapshot was taken.
    pub time: Timestamp,
    pub nodes: HashMap<ShortAddr, NodeSnapshot>,
}

impl NetworkSnapshot {
    pub fn new(time: Timestamp) -> Self {
        Self {
            time,
            nodes: HashMap::new(),
        }
    }

    pub fn record_node(&mut self, addr: ShortAddr, node: NodeSnapshot) {
        self.nodes.insert(addr, node);
    }

    /// No node has parked frames or an unfinished broadcast.
    pub fn is_settled(&self) -> bool {
        self.nodes
            .values()
            .all(|n| n.pending == 0 && !n.broadcast_active)
    }

    /// Frames delivered to upper layers across the network.
    pub fn total_delivered(&self) -> u32 {
        self.nodes.values().map(|n| n.counters.frames_delivered).sum()
    }

    pub fn total_relayed(&self) -> u32 {
        self.nodes.values().map(|n| n.counters.frames_relayed).sum()
    }

    pub fn total_duplicates(&self) -> u32 {
        self.nodes.values().map(|n| n.counters.duplicates).sum()
    }
}

/// Link-level counters collected over a run.
#[derive(Debug, Clone, Default)]
pub struct SimMetrics {
    /// Transmit requests taken from nodes.
    pub frames_sent: u64,
    /// Copies lost to link loss.
    pub frames_dropped: u64,
    /// Copies handed to a receiving node.
    pub frames_delivered: u64,
    /// Unicasts whose addressee was out of reach.
    pub no_ack: u64,
    /// Snapshots taken at intervals.
    pub snapshots: Vec<NetworkSnapshot>,
}

impl SimMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_snapshot(&mut self, snapshot: NetworkSnapshot) {
        self.snapshots.push(snapshot);
    }

    /// First snapshot time at which the network was settled.
    pub fn settle_time(&self) -> Option<Timestamp> {
        self.snapshots
            .iter()
            .find(|s| s.is_settled())
            .map(|s| s.time)
    }

    pub fn latest_snapshot(&self) -> Option<&NetworkSnapshot> {
        self.snapshots.last()
    }
}

/// Result of running a simulation.
#[derive(Debug, Clone)]
pub struct SimulationResult {
    /// Final simulation time.
    pub end_time: Timestamp,
    pub metrics: SimMetrics,
    /// Whether simulation ended due to event queue exhaustion (vs time limit).
    pub queue_exhausted: bool,
}

impl SimulationResult {
    /// Network settled at the end of the run.
    pub fn settled(&self) -> bool {
        self.metrics
            .latest_snapshot()
            .is_some_and(|s| s.is_settled())
    }

    pub fn total_delivered(&self) -> u32 {
        self.metrics
            .latest_snapshot()
            .map(|s| s.total_delivered())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(delivered: u32, pending: usize) -> NodeSnapshot {
        NodeSnapshot {
            counters: NwkMetrics {
                frames_delivered: delivered,
                ..NwkMetrics::new()
            },
            pending,
            ..NodeSnapshot::default()
        }
    }

    #[test]
    fn test_snapshot_totals() {
        let mut snapshot = NetworkSnapshot::new(Timestamp::ZERO);
        snapshot.record_node(0, node(2, 0));
        snapshot.record_node(1, node(3, 0));
        assert_eq!(snapshot.total_delivered(), 5);
        assert!(snapshot.is_settled());
    }

    #[test]
    fn test_pending_frames_mean_unsettled() {
        let mut snapshot = NetworkSnapshot::new(Timestamp::ZERO);
        snapshot.record_node(0, node(0, 1));
        assert!(!snapshot.is_settled());

        let mut busy = NetworkSnapshot::new(Timestamp::ZERO);
        busy.record_node(
            0,
            NodeSnapshot {
                broadcast_active: true,
                ..NodeSnapshot::default()
            },
        );
        assert!(!busy.is_settled());
    }

    #[test]
    fn test_settle_time() {
        let mut metrics = SimMetrics::new();

        let mut s1 = NetworkSnapshot::new(Timestamp::from_secs(1));
        s1.record_node(0, node(0, 1));
        metrics.add_snapshot(s1);

        let mut s2 = NetworkSnapshot::new(Timestamp::from_secs(2));
        s2.record_node(0, node(1, 0));
        metrics.add_snapshot(s2);

        assert_eq!(metrics.settle_time(), Some(Timestamp::from_secs(2)));
        assert_eq!(metrics.latest_snapshot().unwrap().total_delivered(), 1);
    }
}
