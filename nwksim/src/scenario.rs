//! Scenario builder for setting up and running simulations.
//!
//! Nodes are named by index: index 0 is always the coordinator and every
//! later node joins under an earlier one. Actions and sends refer to
//! indices too and are translated to tree addresses at build time.

use nwkstack::{DiscoverRoute, Duration, NwkError, ShortAddr, Timestamp};

use crate::event::ScenarioAction;
use crate::metrics::SimulationResult;
use crate::sim::{Simulator, DEFAULT_TREE};
use crate::topology::{Link, Topology};

#[derive(Debug, Clone, Copy)]
enum NodeSpec {
    Router { parent: usize },
    EndDevice { parent: usize, rx_on_when_idle: bool },
}

/// Destination of a planned send.
#[derive(Debug, Clone, Copy)]
pub enum Target {
    /// Another node, by index.
    Node(usize),
    /// A raw NWK address, e.g. a broadcast address.
    Addr(ShortAddr),
}

#[derive(Debug, Clone)]
struct PlannedSend {
    time: Timestamp,
    from: usize,
    target: Target,
    payload: Vec<u8>,
    discover_route: DiscoverRoute,
}

/// Builder for simulation scenarios.
pub struct ScenarioBuilder {
    seed: u64,
    tree: (u8, u8, u8),
    nodes: Vec<NodeSpec>,
    /// Extra radio links between non-tree neighbors.
    links: Vec<(usize, usize)>,
    loss_rate: f64,
    delay: Duration,
    /// Actions with node indices in place of addresses.
    actions: Vec<(Timestamp, ScenarioAction)>,
    sends: Vec<PlannedSend>,
    snapshot_interval: Option<Duration>,
}

impl Default for ScenarioBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ScenarioBuilder {
    /// A scenario holding only the coordinator.
    pub fn new() -> Self {
        Self {
            seed: 42,
            tree: DEFAULT_TREE,
            nodes: Vec::new(),
            links: Vec::new(),
            loss_rate: 0.0,
            delay: Link::default().delay,
            actions: Vec::new(),
            sends: Vec::new(),
            snapshot_interval: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_tree(mut self, max_routers: u8, max_children: u8, max_depth: u8) -> Self {
        self.tree = (max_routers, max_children, max_depth);
        self
    }

    /// Add a router under node `parent`. Its index is the number of nodes
    /// added before it plus one.
    pub fn router(mut self, parent: usize) -> Self {
        self.nodes.push(NodeSpec::Router { parent });
        self
    }

    /// Add an end device under node `parent`.
    pub fn end_device(mut self, parent: usize, rx_on_when_idle: bool) -> Self {
        self.nodes.push(NodeSpec::EndDevice {
            parent,
            rx_on_when_idle,
        });
        self
    }

    /// Put two nodes in radio range outside the tree.
    pub fn link(mut self, a: usize, b: usize) -> Self {
        self.links.push((a, b));
        self
    }

    pub fn with_loss_rate(mut self, rate: f64) -> Self {
        self.loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = Some(interval);
        self
    }

    /// Schedule an action. Address fields hold node indices.
    pub fn schedule(mut self, time: Timestamp, action: ScenarioAction) -> Self {
        self.actions.push((time, action));
        self
    }

    /// Schedule an upper-layer send from node `from`.
    pub fn send_at(
        mut self,
        time: Timestamp,
        from: usize,
        target: Target,
        payload: &[u8],
        discover_route: DiscoverRoute,
    ) -> Self {
        self.sends.push(PlannedSend {
            time,
            from,
            target,
            payload: payload.to_vec(),
            discover_route,
        });
        self
    }

    /// Build the simulator. Returns it with the address of every node by
    /// index.
    pub fn build(self) -> Result<(Simulator, Vec<ShortAddr>), NwkError> {
        let (max_routers, max_children, max_depth) = self.tree;
        let default_link = Link::new()
            .with_loss_rate(self.loss_rate)
            .with_delay(self.delay);
        let mut sim = Simulator::new(self.seed)
            .with_tree(max_routers, max_children, max_depth)
            .with_topology(Topology::new().with_default_link(default_link));
        if let Some(interval) = self.snapshot_interval {
            sim = sim.with_snapshot_interval(interval);
        }

        let mut addrs = vec![sim.add_coordinator()?];
        for spec in &self.nodes {
            let addr = match *spec {
                NodeSpec::Router { parent } => sim.add_router(index_to_addr(&addrs, parent)?)?,
                NodeSpec::EndDevice {
                    parent,
                    rx_on_when_idle,
                } => sim.add_end_device(index_to_addr(&addrs, parent)?, rx_on_when_idle)?,
            };
            addrs.push(addr);
        }

        for &(a, b) in &self.links {
            sim.add_radio_link(index_to_addr(&addrs, a)?, index_to_addr(&addrs, b)?)?;
        }

        for (time, action) in self.actions {
            sim.schedule_action(time, resolve_action(&addrs, action)?);
        }

        for send in self.sends {
            let dest = match send.target {
                Target::Node(index) => index_to_addr(&addrs, index)?,
                Target::Addr(addr) => addr,
            };
            sim.schedule_send(
                send.time,
                index_to_addr(&addrs, send.from)?,
                dest,
                &send.payload,
                send.discover_route,
            );
        }

        Ok((sim, addrs))
    }

    /// Build and run the simulation for the specified duration.
    pub fn run_for(self, duration: Duration) -> Result<SimulationResult, NwkError> {
        let (mut sim, _) = self.build()?;
        Ok(sim.run_for(duration))
    }

    /// Build and run until the specified time.
    pub fn run_until(self, time: Timestamp) -> Result<SimulationResult, NwkError> {
        let (mut sim, _) = self.build()?;
        Ok(sim.run_until(time))
    }
}

/// Coordinator with `routers` routers directly under it.
pub fn star_scenario(routers: usize) -> ScenarioBuilder {
    (0..routers).fold(ScenarioBuilder::new(), |b, _| b.router(0))
}

/// Coordinator followed by `hops` routers, each the child of the previous.
pub fn chain_scenario(hops: usize) -> ScenarioBuilder {
    (0..hops).fold(ScenarioBuilder::new(), |b, i| b.router(i))
}

fn index_to_addr(addrs: &[ShortAddr], index: usize) -> Result<ShortAddr, NwkError> {
    addrs.get(index).copied().ok_or(NwkError::InvalidRequest)
}

fn resolve_action(addrs: &[ShortAddr], action: ScenarioAction) -> Result<ScenarioAction, NwkError> {
    let addr = |index: ShortAddr| index_to_addr(addrs, usize::from(index));
    Ok(match action {
        ScenarioAction::Partition { groups } => ScenarioAction::Partition {
            groups: groups
                .into_iter()
                .map(|g| g.into_iter().map(addr).collect::<Result<Vec<_>, _>>())
                .collect::<Result<Vec<_>, _>>()?,
        },
        ScenarioAction::DisableLink { a, b } => ScenarioAction::DisableLink {
            a: addr(a)?,
            b: addr(b)?,
        },
        ScenarioAction::EnableLink { a, b } => ScenarioAction::EnableLink {
            a: addr(a)?,
            b: addr(b)?,
        },
        ScenarioAction::SetLossRate { a, b, rate } => ScenarioAction::SetLossRate {
            a: addr(a)?,
            b: addr(b)?,
            rate,
        },
        ScenarioAction::InstallRoute {
            node,
            dest,
            next_hop,
        } => ScenarioAction::InstallRoute {
            node: addr(node)?,
            dest: addr(dest)?,
            next_hop: addr(next_hop)?,
        },
        other @ (ScenarioAction::HealPartition | ScenarioAction::TakeSnapshot) => other,
    })
}
