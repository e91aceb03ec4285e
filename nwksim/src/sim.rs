//! Discrete event simulator for nwkstack networks.

use std::collections::BinaryHeap;

use hashbrown::HashMap;
use nwkstack::neighbor::NeighborEntry;
use nwkstack::types::Relationship;
use nwkstack::{
    DeviceType, DiscoverRoute, Duration, MacDataIndication, MacStatus, NibConfig, NwkError,
    ShortAddr, Timestamp, COORDINATOR_ADDR, MAC_BROADCAST_ADDR,
};
use tracing::{debug, info, trace, warn};

use crate::event::{AppSend, Event, ScenarioAction, ScheduledEvent, SequenceNumber};
use crate::metrics::{NetworkSnapshot, NodeSnapshot, SimMetrics, SimulationResult};
use crate::node::{SimNode, SIM_PAN_ID};
use crate::topology::Topology;

/// Tree parameters used unless overridden: Cskip(0) = 51, Cskip(1) = 11.
pub const DEFAULT_TREE: (u8, u8, u8) = (4, 10, 3);

/// Discrete event simulator for nwkstack networks.
pub struct Simulator {
    nodes: HashMap<ShortAddr, SimNode>,
    topology: Topology,
    current_time: Timestamp,
    event_queue: BinaryHeap<ScheduledEvent>,
    metrics: SimMetrics,
    /// Next sequence number for event ordering.
    next_seq: u64,
    /// RNG state for frame loss.
    rng_state: u64,
    /// Outstanding timer per node. A `TimerFire` whose time differs is stale.
    timer_at: HashMap<ShortAddr, Timestamp>,
    /// (max_routers, max_children, max_depth) for every node.
    tree: (u8, u8, u8),
    next_node_seed: u64,
    snapshot_interval: Option<Duration>,
    next_snapshot: Option<Timestamp>,
}

impl Simulator {
    /// Create a new simulator with given RNG seed.
    pub fn new(seed: u64) -> Self {
        Self {
            nodes: HashMap::new(),
            topology: Topology::new(),
            current_time: Timestamp::ZERO,
            event_queue: BinaryHeap::new(),
            metrics: SimMetrics::new(),
            next_seq: 0,
            rng_state: seed,
            timer_at: HashMap::new(),
            tree: DEFAULT_TREE,
            next_node_seed: seed.wrapping_mul(1000),
            snapshot_interval: None,
            next_snapshot: None,
        }
    }

    /// Tree parameters for nodes added after this call.
    pub fn with_tree(mut self, max_routers: u8, max_children: u8, max_depth: u8) -> Self {
        self.tree = (max_routers, max_children, max_depth);
        self
    }

    /// Replace the topology. Links for nodes added later are still created.
    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = Some(interval);
        self.next_snapshot = Some(self.current_time + interval);
        self
    }

    // --- Building the network ---

    /// Add the coordinator and form the network.
    pub fn add_coordinator(&mut self) -> Result<ShortAddr, NwkError> {
        if self.nodes.contains_key(&COORDINATOR_ADDR) {
            return Err(NwkError::AlreadyExists);
        }
        let mut node = self.new_node(NibConfig::coordinator());
        node.form_network(self.current_time)?;
        info!(addr = COORDINATOR_ADDR, "coordinator formed network");
        self.insert_node(COORDINATOR_ADDR, node);
        Ok(COORDINATOR_ADDR)
    }

    /// Join a router under `parent`. Returns the address the parent assigned.
    pub fn add_router(&mut self, parent: ShortAddr) -> Result<ShortAddr, NwkError> {
        self.add_child(parent, NibConfig::router())
    }

    /// Join an end device under `parent`.
    pub fn add_end_device(
        &mut self,
        parent: ShortAddr,
        rx_on_when_idle: bool,
    ) -> Result<ShortAddr, NwkError> {
        let mut config = NibConfig::end_device();
        config.rx_on_when_idle = rx_on_when_idle;
        self.add_child(parent, config)
    }

    fn add_child(&mut self, parent_addr: ShortAddr, config: NibConfig) -> Result<ShortAddr, NwkError> {
        let now = self.current_time;
        let parent = self
            .nodes
            .get_mut(&parent_addr)
            .ok_or(NwkError::InvalidRequest)?;
        let addr = match config.device_type {
            DeviceType::EndDevice => parent.inner_mut().assign_end_device_address(),
            _ => parent.inner_mut().assign_router_address(),
        }
        .ok_or(NwkError::TableFull)?;

        let parent_depth = parent.inner().nib().depth();
        let mut parent_entry =
            NeighborEntry::new(parent_addr, SIM_PAN_ID, parent.inner().nib().device_type);
        parent_entry.ext_addr = parent.ext_addr();
        parent_entry.depth = parent_depth;
        parent_entry.lqi = self.topology.default_link().lqi;

        let mut child = self.new_node(config);
        child.join_network(parent_entry, addr, parent_depth + 1, now)?;

        let mut child_entry = NeighborEntry::new(addr, SIM_PAN_ID, config.device_type);
        child_entry.relationship = Relationship::Child;
        child_entry.rx_on_when_idle = config.rx_on_when_idle;
        child_entry.ext_addr = child.ext_addr();
        child_entry.depth = parent_depth + 1;
        child_entry.lqi = self.topology.default_link().lqi;
        if let Some(parent) = self.nodes.get_mut(&parent_addr) {
            parent.inner_mut().neighbors_mut().add(child_entry)?;
        }

        self.topology.connect(parent_addr, addr);
        info!(addr, parent = parent_addr, depth = parent_depth + 1, "node joined");
        self.insert_node(addr, child);
        Ok(addr)
    }

    /// Put two nodes in radio range of each other and make them neighbors.
    pub fn add_radio_link(&mut self, a: ShortAddr, b: ShortAddr) -> Result<(), NwkError> {
        let entry_for = |sim: &Self, addr: ShortAddr| -> Result<NeighborEntry, NwkError> {
            let node = sim.nodes.get(&addr).ok_or(NwkError::InvalidRequest)?;
            let nib = node.inner().nib();
            let mut entry = NeighborEntry::new(addr, SIM_PAN_ID, nib.device_type);
            entry.ext_addr = node.ext_addr();
            entry.rx_on_when_idle = nib.rx_on_when_idle;
            entry.depth = nib.depth();
            entry.lqi = sim.topology.default_link().lqi;
            Ok(entry)
        };
        let entry_a = entry_for(self, a)?;
        let entry_b = entry_for(self, b)?;

        self.topology.connect(a, b);
        for (at, entry) in [(a, entry_b), (b, entry_a)] {
            if let Some(node) = self.nodes.get_mut(&at) {
                let known = node
                    .inner()
                    .neighbors()
                    .addr_exists(entry.short_addr, SIM_PAN_ID);
                if !known {
                    node.inner_mut().neighbors_mut().add(entry)?;
                }
            }
        }
        Ok(())
    }

    fn new_node(&mut self, config: NibConfig) -> SimNode {
        let (max_routers, max_children, max_depth) = self.tree;
        self.next_node_seed = self.next_node_seed.wrapping_add(1);
        SimNode::new(
            config.with_tree(max_routers, max_children, max_depth),
            self.next_node_seed,
            self.current_time,
        )
    }

    fn insert_node(&mut self, addr: ShortAddr, node: SimNode) {
        self.nodes.insert(addr, node);
        self.after_handler(addr);
    }

    // --- Accessors ---

    pub fn node(&self, addr: ShortAddr) -> Option<&SimNode> {
        self.nodes.get(&addr)
    }

    pub fn node_mut(&mut self, addr: ShortAddr) -> Option<&mut SimNode> {
        self.nodes.get_mut(&addr)
    }

    /// Node addresses in ascending order.
    pub fn node_addrs(&self) -> Vec<ShortAddr> {
        let mut addrs: Vec<_> = self.nodes.keys().copied().collect();
        addrs.sort_unstable();
        addrs
    }

    pub fn current_time(&self) -> Timestamp {
        self.current_time
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn topology_mut(&mut self) -> &mut Topology {
        &mut self.topology
    }

    pub fn metrics(&self) -> &SimMetrics {
        &self.metrics
    }

    // --- Scheduling ---

    pub fn schedule(&mut self, time: Timestamp, event: Event) {
        let seq = SequenceNumber::new(self.next_seq);
        self.next_seq += 1;
        self.event_queue.push(ScheduledEvent::new(time, seq, event));
    }

    pub fn schedule_action(&mut self, time: Timestamp, action: ScenarioAction) {
        self.schedule(time, Event::ScenarioAction(action));
    }

    /// Schedule an upper-layer send with the default radius.
    pub fn schedule_send(
        &mut self,
        time: Timestamp,
        from: ShortAddr,
        dest: ShortAddr,
        payload: &[u8],
        discover_route: DiscoverRoute,
    ) {
        self.schedule(
            time,
            Event::AppSend(AppSend {
                from,
                dest,
                payload: payload.to_vec(),
                radius: 0,
                discover_route,
            }),
        );
    }

    // --- Running ---

    /// Run simulation until specified time.
    pub fn run_until(&mut self, end_time: Timestamp) -> SimulationResult {
        loop {
            match self.event_queue.peek() {
                Some(event) if event.time <= end_time => {}
                _ => break,
            }
            let Some(event) = self.event_queue.pop() else {
                break;
            };
            self.advance_time(event.time);
            self.process_event(event.time, event.event);
            self.maybe_take_snapshot();
        }

        self.advance_time(end_time);
        self.take_snapshot();

        SimulationResult {
            end_time: self.current_time,
            metrics: self.metrics.clone(),
            queue_exhausted: self.event_queue.peek().is_none(),
        }
    }

    pub fn run_for(&mut self, duration: Duration) -> SimulationResult {
        self.run_until(self.current_time + duration)
    }

    /// Run until the queue is empty or `max_events` were processed. Nodes
    /// keep ticking while joined, so a live network never drains on its own.
    pub fn run_events(&mut self, max_events: usize) -> SimulationResult {
        let mut processed = 0;

        while let Some(event) = self.event_queue.pop() {
            self.advance_time(event.time);
            self.process_event(event.time, event.event);

            processed += 1;
            if processed >= max_events {
                break;
            }

            self.maybe_take_snapshot();
        }

        self.take_snapshot();

        SimulationResult {
            end_time: self.current_time,
            metrics: self.metrics.clone(),
            queue_exhausted: self.event_queue.is_empty(),
        }
    }

    fn advance_time(&mut self, time: Timestamp) {
        if time > self.current_time {
            self.current_time = time;
        }
    }

    fn process_event(&mut self, at: Timestamp, event: Event) {
        match event {
            Event::FrameDelivery {
                to,
                from,
                mac_dest,
                frame,
                lqi,
            } => self.deliver_frame(to, from, mac_dest, frame, lqi),
            Event::MacConfirm {
                node,
                handle,
                status,
            } => self.deliver_confirm(node, handle, status),
            Event::TimerFire { node } => self.fire_timer(node, at),
            Event::AppSend(send) => self.app_send(send),
            Event::ScenarioAction(action) => self.execute_action(action),
        }
    }

    fn deliver_frame(
        &mut self,
        to: ShortAddr,
        from: ShortAddr,
        mac_dest: ShortAddr,
        frame: Vec<u8>,
        lqi: u8,
    ) {
        let now = self.current_time;
        let Some(node) = self.nodes.get_mut(&to) else {
            return;
        };
        trace!(to, from, mac_dest, len = frame.len(), "frame delivered");
        let indication = MacDataIndication {
            src_addr: from,
            dest_addr: mac_dest,
            pan_id: SIM_PAN_ID,
            lqi,
        };
        node.handle_rx(indication, frame, now);
        self.metrics.frames_delivered += 1;
        self.after_handler(to);
    }

    fn deliver_confirm(&mut self, addr: ShortAddr, handle: Option<u8>, status: MacStatus) {
        let now = self.current_time;
        if let Some(node) = self.nodes.get_mut(&addr) {
            node.handle_mac_confirm(handle, status, now);
        }
        self.after_handler(addr);
    }

    fn fire_timer(&mut self, addr: ShortAddr, at: Timestamp) {
        if self.timer_at.get(&addr) != Some(&at) {
            return;
        }
        self.timer_at.remove(&addr);
        let now = self.current_time;
        if let Some(node) = self.nodes.get_mut(&addr) {
            node.handle_timer(now);
        }
        self.after_handler(addr);
    }

    fn app_send(&mut self, send: AppSend) {
        let now = self.current_time;
        let Some(node) = self.nodes.get_mut(&send.from) else {
            return;
        };
        let handle = node.app_send(
            send.dest,
            &send.payload,
            send.radius,
            send.discover_route,
            now,
        );
        debug!(from = send.from, dest = send.dest, handle, "app send");
        self.after_handler(send.from);
    }

    /// Move the node's transmissions onto links and re-arm its timer.
    fn after_handler(&mut self, addr: ShortAddr) {
        self.collect_outgoing(addr);
        self.reschedule_timer(addr);
    }

    fn reschedule_timer(&mut self, addr: ShortAddr) {
        let Some(wake) = self.nodes.get(&addr).and_then(|n| n.next_wake()) else {
            self.timer_at.remove(&addr);
            return;
        };
        let at = wake.max(self.current_time);
        if self.timer_at.get(&addr) == Some(&at) {
            return;
        }
        self.timer_at.insert(addr, at);
        self.schedule(at, Event::TimerFire { node: addr });
    }

    fn collect_outgoing(&mut self, sender: ShortAddr) {
        let frames = match self.nodes.get_mut(&sender) {
            Some(node) => node.take_outgoing(),
            None => return,
        };

        for (req, frame) in frames {
            self.metrics.frames_sent += 1;
            let bytes = frame.to_vec();
            if req.dest_addr == MAC_BROADCAST_ADDR {
                self.transmit_broadcast(sender, req.handle, bytes);
            } else {
                self.transmit_unicast(sender, req.dest_addr, req.handle, bytes);
            }
        }
    }

    /// Every neighbor in range gets its own copy, each subject to loss.
    /// Broadcasts are unacknowledged, so the sender's confirm is always a
    /// success.
    fn transmit_broadcast(&mut self, sender: ShortAddr, handle: Option<u8>, frame: Vec<u8>) {
        let now = self.current_time;
        let confirm_delay = self.topology.default_link().delay;
        self.schedule(
            now + confirm_delay,
            Event::MacConfirm {
                node: sender,
                handle,
                status: MacStatus::Success,
            },
        );
        for neighbor in self.topology.neighbors(sender) {
            let Some(link) = self.topology.get_link(sender, neighbor) else {
                continue;
            };
            let (loss_rate, delay, lqi) = (link.loss_rate, link.delay, link.lqi);
            if loss_rate > 0.0 && self.random_f64() < loss_rate {
                self.metrics.frames_dropped += 1;
                continue;
            }
            self.schedule(
                now + delay,
                Event::FrameDelivery {
                    to: neighbor,
                    from: sender,
                    mac_dest: MAC_BROADCAST_ADDR,
                    frame: frame.clone(),
                    lqi,
                },
            );
        }
    }

    /// Acknowledged transmission: the sender learns whether the addressee
    /// got the frame.
    fn transmit_unicast(
        &mut self,
        sender: ShortAddr,
        dest: ShortAddr,
        handle: Option<u8>,
        frame: Vec<u8>,
    ) {
        let now = self.current_time;
        let link = self
            .topology
            .get_link(sender, dest)
            .filter(|link| link.active && self.nodes.contains_key(&dest))
            .map(|link| (link.loss_rate, link.delay, link.lqi));

        let Some((loss_rate, delay, lqi)) = link else {
            warn!(sender, dest, "no link to addressee");
            self.metrics.no_ack += 1;
            let delay = self.topology.default_link().delay;
            self.schedule(
                now + delay,
                Event::MacConfirm {
                    node: sender,
                    handle,
                    status: MacStatus::NoAck,
                },
            );
            return;
        };

        let status = if loss_rate > 0.0 && self.random_f64() < loss_rate {
            self.metrics.frames_dropped += 1;
            MacStatus::NoAck
        } else {
            self.schedule(
                now + delay,
                Event::FrameDelivery {
                    to: dest,
                    from: sender,
                    mac_dest: dest,
                    frame,
                    lqi,
                },
            );
            MacStatus::Success
        };
        self.schedule(
            now + delay,
            Event::MacConfirm {
                node: sender,
                handle,
                status,
            },
        );
    }

    fn execute_action(&mut self, action: ScenarioAction) {
        info!(?action, time = self.current_time.as_millis(), "scenario action");
        match action {
            ScenarioAction::Partition { groups } => self.topology.partition(&groups),
            ScenarioAction::HealPartition => self.topology.heal(),
            ScenarioAction::DisableLink { a, b } => {
                if let Some(link) = self.topology.get_link_mut(a, b) {
                    link.active = false;
                }
            }
            ScenarioAction::EnableLink { a, b } => {
                if let Some(link) = self.topology.get_link_mut(a, b) {
                    link.active = true;
                }
            }
            ScenarioAction::SetLossRate { a, b, rate } => {
                if let Some(link) = self.topology.get_link_mut(a, b) {
                    link.loss_rate = rate.clamp(0.0, 1.0);
                }
            }
            ScenarioAction::InstallRoute {
                node,
                dest,
                next_hop,
            } => {
                let now = self.current_time;
                if let Some(sim_node) = self.nodes.get_mut(&node) {
                    let drained = sim_node.install_route(dest, next_hop, now);
                    debug!(node, dest, next_hop, drained, "route installed");
                }
                self.after_handler(node);
            }
            ScenarioAction::TakeSnapshot => self.take_snapshot(),
        }
    }

    fn maybe_take_snapshot(&mut self) {
        if let Some(next) = self.next_snapshot {
            if self.current_time >= next {
                self.take_snapshot();
                if let Some(interval) = self.snapshot_interval {
                    self.next_snapshot = Some(next + interval);
                }
            }
        }
    }

    /// Record every node's counters and queue state.
    pub fn take_snapshot(&mut self) {
        let mut snapshot = NetworkSnapshot::new(self.current_time);
        for (&addr, node) in &self.nodes {
            let inner = node.inner();
            snapshot.record_node(
                addr,
                NodeSnapshot {
                    counters: *inner.metrics(),
                    pending: inner.pending_queue().len(),
                    routes: inner.routing_table().len(),
                    broadcast_active: inner.broadcast().is_active(),
                },
            );
        }
        self.metrics.add_snapshot(snapshot);
    }

    /// Uniform value in [0, 1).
    fn random_f64(&mut self) -> f64 {
        self.rng_state = self
            .rng_state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.rng_state >> 11) as f64 / (1u64 << 53) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::Link;

    #[test]
    fn test_simulator_creation() {
        let sim = Simulator::new(42);
        assert_eq!(sim.current_time(), Timestamp::ZERO);
        assert!(sim.node_addrs().is_empty());
    }

    #[test]
    fn test_tree_addresses() {
        let mut sim = Simulator::new(42);
        sim.add_coordinator().unwrap();
        assert_eq!(sim.add_router(0).unwrap(), 1);
        assert_eq!(sim.add_router(0).unwrap(), 52);
        assert_eq!(sim.add_router(52).unwrap(), 53);
        assert_eq!(sim.add_end_device(1, false).unwrap(), 46);
        assert_eq!(sim.node_addrs(), vec![0, 1, 46, 52, 53]);

        assert!(sim.topology().is_connected(0, 52));
        assert!(sim.topology().is_connected(52, 53));
        assert!(!sim.topology().is_connected(0, 53));

        let ed = sim.node(46).unwrap().inner();
        assert_eq!(ed.nib().depth(), 2);
        assert_eq!(ed.neighbors().get_parent().unwrap().short_addr, 1);
        let router = sim.node(1).unwrap().inner();
        assert_eq!(router.neighbors().children(), vec![46]);
    }

    #[test]
    fn test_second_coordinator_rejected() {
        let mut sim = Simulator::new(42);
        sim.add_coordinator().unwrap();
        assert_eq!(sim.add_coordinator(), Err(NwkError::AlreadyExists));
        assert_eq!(sim.add_router(999), Err(NwkError::InvalidRequest));
    }

    #[test]
    fn test_end_device_cannot_parent() {
        let mut sim = Simulator::new(42);
        sim.add_coordinator().unwrap();
        let ed = sim.add_end_device(0, true).unwrap();
        assert_eq!(sim.add_router(ed), Err(NwkError::TableFull));
    }

    #[test]
    fn test_radio_link_makes_neighbors() {
        let mut sim = Simulator::new(42);
        sim.add_coordinator().unwrap();
        let a = sim.add_router(0).unwrap();
        let b = sim.add_router(0).unwrap();
        sim.add_radio_link(a, b).unwrap();
        assert!(sim.topology().is_connected(a, b));
        assert!(sim.node(a).unwrap().inner().neighbors().addr_exists(b, SIM_PAN_ID));
        assert!(sim.node(b).unwrap().inner().neighbors().addr_exists(a, SIM_PAN_ID));
    }

    #[test]
    fn test_timers_run_while_idle() {
        let mut sim = Simulator::new(42);
        sim.add_coordinator().unwrap();
        let result = sim.run_for(Duration::from_secs(5));
        assert_eq!(result.end_time, Timestamp::from_secs(5));
        assert!(!result.queue_exhausted);
        assert!(result.settled());
        assert_eq!(sim.metrics().frames_sent, 0);
    }

    #[test]
    fn test_total_loss_drops_broadcast_copies() {
        let mut sim = Simulator::new(42).with_topology(
            Topology::new().with_default_link(Link::new().with_loss_rate(1.0)),
        );
        sim.add_coordinator().unwrap();
        sim.add_router(0).unwrap();
        sim.schedule_send(Timestamp::ZERO, 0, 0xFFFF, b"lost", DiscoverRoute::Suppress);
        sim.run_for(Duration::from_millis(100));
        assert!(sim.metrics().frames_dropped >= 1);
        assert!(sim.node(1).unwrap().received.is_empty());
    }

    #[test]
    fn test_schedule_action() {
        let mut sim = Simulator::new(42);
        sim.add_coordinator().unwrap();
        let r = sim.add_router(0).unwrap();

        sim.schedule_action(
            Timestamp::from_millis(500),
            ScenarioAction::Partition {
                groups: vec![vec![0], vec![r]],
            },
        );
        sim.run_for(Duration::from_secs(1));
        assert!(!sim.topology().is_connected(0, r));
    }
}
