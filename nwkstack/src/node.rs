//! The network-layer engine.
//!
//! `Nwk` owns every NWK table and drives them from three inputs:
//! - link-layer indications and confirms from the MAC channel
//! - data requests from the layer above
//! - timers (the one-second slow tick and the broadcast ack window)
//!
//! # Usage
//!
//! ```ignore
//! let mut nwk = Nwk::<_, _, _, DefaultConfig>::new(mac, random, clock, NibConfig::coordinator());
//! nwk.form_network(clock.now())?;
//!
//! spawn(async move {
//!     nwk.run().await;
//! });
//!
//! nwk.outgoing().send(request).await;
//! let indication = nwk.incoming().receive().await;
//! ```

use core::marker::PhantomData;

use alloc::vec::Vec;

#[cfg(any(test, feature = "debug"))]
use alloc::boxed::Box;

use embassy_sync::channel::Channel;

use crate::address_map::AddressMap;
use crate::broadcast::{BroadcastEngine, BroadcastTimer};
use crate::config::{DefaultConfig, NibConfig, NwkConfig};
#[cfg(any(test, feature = "debug"))]
use crate::debug::{DebugEmitter, DebugEvent};
use crate::discovery::DiscoveryTable;
use crate::neighbor::{NeighborEntry, NeighborTable};
use crate::nib::Nib;
use crate::pending::{PendingFrame, PendingQueue};
use crate::route_table::RoutingTable;
use crate::routing::ForwardPath;
use crate::time::{Duration, Timestamp};
use crate::traits::{AppInChannel, AppOutChannel, Clock, EventChannel, Mac, MacEvent, Random};
use crate::tree::{calc_end_device_address, calc_router_address};
use crate::types::{
    is_broadcast, DeviceType, Event, Indication, MacStatus, NwkError, NwkMetrics, NwkStatus,
    Relationship, ShortAddr, COORDINATOR_ADDR, MAC_BROADCAST_ADDR, MAX_BROADCAST_JITTER_MS,
    TICK_INTERVAL, UNASSIGNED_ADDR,
};

/// The network layer of one device.
///
/// Generic over:
/// - `M`: link layer
/// - `R`: random source (broadcast jitter)
/// - `Clk`: clock
/// - `Cfg`: table capacities
pub struct Nwk<M, R, Clk, Cfg = DefaultConfig> {
    mac: M,
    random: R,
    clock: Clk,

    app_incoming: AppInChannel,
    app_outgoing: AppOutChannel,
    events: EventChannel,

    nib: Nib,
    neighbors: NeighborTable,
    routes: RoutingTable,
    discovery: DiscoveryTable,
    pending: PendingQueue,
    broadcast: BroadcastEngine,
    address_map: AddressMap,

    /// Next slow tick; `None` while not on a network.
    next_tick: Option<Timestamp>,

    metrics: NwkMetrics,

    #[cfg(any(test, feature = "debug"))]
    debug_emitter: Option<Box<dyn DebugEmitter>>,

    _config: PhantomData<Cfg>,
}

impl<M, R, Clk, Cfg> Nwk<M, R, Clk, Cfg>
where
    M: Mac,
    R: Random,
    Clk: Clock,
    Cfg: NwkConfig,
{
    /// Cold start: every table empty, not joined.
    pub fn new(mac: M, random: R, clock: Clk, config: NibConfig) -> Self {
        Self {
            mac,
            random,
            clock,
            app_incoming: Channel::new(),
            app_outgoing: Channel::new(),
            events: Channel::new(),
            nib: Nib::new(&config),
            neighbors: NeighborTable::new(Cfg::MAX_NEIGHBORS),
            routes: RoutingTable::new(Cfg::MAX_ROUTES),
            discovery: DiscoveryTable::new(Cfg::MAX_DISCOVERY),
            pending: PendingQueue::new(Cfg::MAX_PENDING),
            broadcast: BroadcastEngine::new(Cfg::MAX_PASSIVE_ACKS),
            address_map: AddressMap::new(Cfg::MAX_ADDRESS_MAP),
            next_tick: None,
            metrics: NwkMetrics::default(),
            #[cfg(any(test, feature = "debug"))]
            debug_emitter: None,
            _config: PhantomData,
        }
    }

    /// Run the engine forever.
    pub async fn run(&mut self) -> ! {
        use embassy_futures::select::{select3, Either3};

        loop {
            let wake = self
                .next_wake()
                .unwrap_or_else(|| self.clock.now() + Duration::from_secs(60));

            let result = select3(
                self.mac.incoming().receive(),
                self.app_outgoing.receive(),
                self.clock.sleep_until(wake),
            )
            .await;

            let now = self.clock.now();
            match result {
                Either3::First(event) => self.handle_mac_event(event, now),
                Either3::Second(request) => self.handle_data_request(request, now),
                Either3::Third(()) => self.handle_timer(now),
            }
        }
    }

    // --- Lifecycle ---

    /// Start a network as its coordinator.
    pub fn form_network(&mut self, now: Timestamp) -> Result<(), NwkError> {
        if self.nib.device_type != DeviceType::Coordinator {
            return Err(NwkError::InvalidRequest);
        }
        self.reset();
        self.nib.short_addr = COORDINATOR_ADDR;
        self.nib.set_depth(0);
        self.nib.joined = true;
        self.start_timers(now);
        Ok(())
    }

    /// Join under `parent` with the address it handed out.
    pub fn join_network(
        &mut self,
        mut parent: NeighborEntry,
        short_addr: ShortAddr,
        depth: u8,
        now: Timestamp,
    ) -> Result<(), NwkError> {
        if self.nib.device_type == DeviceType::Coordinator
            || short_addr == COORDINATOR_ADDR
            || short_addr == UNASSIGNED_ADDR
            || is_broadcast(short_addr)
            || depth == 0
            || depth > self.nib.max_depth
        {
            return Err(NwkError::InvalidRequest);
        }
        self.reset();
        parent.relationship = Relationship::Parent;
        self.neighbors.add(parent)?;
        self.nib.short_addr = short_addr;
        self.nib.set_depth(depth);
        self.nib.joined = true;
        self.start_timers(now);
        Ok(())
    }

    /// Leave the network and forget everything learned on it.
    pub fn leave_network(&mut self) {
        self.reset();
    }

    /// Stop timers and clear every table. The NIB keeps its configured
    /// limits but loses its address and position.
    pub fn reset(&mut self) {
        self.stop_timers();
        self.neighbors.clear();
        self.routes.clear();
        self.discovery.clear();
        self.pending.clear();
        self.address_map.clear();
        self.nib.reset();
    }

    fn start_timers(&mut self, now: Timestamp) {
        if self.next_tick.is_none() {
            self.next_tick = Some(now + TICK_INTERVAL);
        }
    }

    fn stop_timers(&mut self) {
        self.next_tick = None;
        self.broadcast.cancel();
    }

    /// Hand out the next router address under this node's block.
    pub fn assign_router_address(&mut self) -> Option<ShortAddr> {
        if !self.nib.joined || !self.nib.device_type.is_router_capable() {
            return None;
        }
        let addr = calc_router_address(
            self.nib.tree_limits(),
            self.nib.short_addr,
            self.nib.cskip(),
            self.nib.router_count,
        )?;
        self.nib.router_count += 1;
        Some(addr)
    }

    /// Hand out the next end-device address under this node's block.
    pub fn assign_end_device_address(&mut self) -> Option<ShortAddr> {
        if !self.nib.joined || !self.nib.device_type.is_router_capable() {
            return None;
        }
        let addr = calc_end_device_address(
            self.nib.tree_limits(),
            self.nib.short_addr,
            self.nib.cskip(),
            self.nib.end_device_count,
        )?;
        self.nib.end_device_count += 1;
        Some(addr)
    }

    // --- Timers ---

    /// Earliest instant the engine has timer work.
    pub fn next_wake(&self) -> Option<Timestamp> {
        match (self.next_tick, self.broadcast.next_deadline()) {
            (Some(t), Some(b)) => Some(t.min(b)),
            (t, b) => t.or(b),
        }
    }

    /// Run every timer that is due at `now`.
    pub fn handle_timer(&mut self, now: Timestamp) {
        if let Some(mut next) = self.next_tick {
            while now >= next {
                self.tick();
                next = next + TICK_INTERVAL;
            }
            self.next_tick = Some(next);
        }
        self.poll_broadcast(now);
    }

    /// One slow tick: age discovery entries, parked frames and passive acks.
    pub fn tick(&mut self) {
        for expired in self.discovery.periodic(&mut self.routes) {
            emit_debug!(
                self,
                DebugEvent::DiscoveryExpired {
                    rreq_id: expired.entry.rreq_id,
                    src: expired.entry.src_addr,
                    dest: expired.entry.dest_addr,
                    route_purged: expired.route_purged,
                }
            );
            if expired.route_purged {
                self.push_event(Event::DiscoveryTimeout {
                    dest: expired.entry.dest_addr,
                    route_purged: true,
                });
            }
        }

        for frame in self.pending.periodic() {
            self.metrics.pending_expired += 1;
            emit_debug!(
                self,
                DebugEvent::PendingExpired {
                    dest: frame.header.dest_addr,
                    seq: frame.header.seq,
                }
            );
            if let Some(handle) = frame.handle {
                self.push_confirm(handle, NwkStatus::RouteDiscoveryFailed);
            }
        }

        self.broadcast.periodic();
    }

    fn poll_broadcast(&mut self, now: Timestamp) {
        let pan_id = self.mac.pan_id();
        loop {
            let jitter = Duration::from_millis(self.random.gen_range(0, MAX_BROADCAST_JITTER_MS));
            match self.broadcast.on_timer(now, &self.neighbors, pan_id, jitter) {
                BroadcastTimer::Idle => break,
                BroadcastTimer::RetryScheduled { seq, attempt } => {
                    self.metrics.broadcast_retries += 1;
                    emit_debug!(self, DebugEvent::BroadcastRetry { seq, attempt });
                }
                BroadcastTimer::Resend { frame, header } => {
                    self.transmit(frame, header, None, ForwardPath::Broadcast, MAC_BROADCAST_ADDR);
                }
                BroadcastTimer::Finished {
                    seq,
                    all_relayed,
                    retries,
                } => {
                    emit_debug!(
                        self,
                        DebugEvent::BroadcastFinished {
                            seq,
                            all_relayed,
                            retries,
                        }
                    );
                    self.push_event(Event::BroadcastFinished { seq, all_relayed });
                    break;
                }
            }
        }
    }

    // --- Link layer ---

    fn handle_mac_event(&mut self, event: MacEvent, now: Timestamp) {
        match event {
            MacEvent::Indication { indication, frame } => {
                self.handle_mac_rx(indication, frame, now)
            }
            MacEvent::Confirm { handle, status } => self.handle_mac_confirm(handle, status),
        }
    }

    /// Outcome of a transmission. Locally originated frames carry a handle
    /// and are confirmed upward; failed relays are only counted.
    pub fn handle_mac_confirm(&mut self, handle: Option<u8>, status: MacStatus) {
        match handle {
            Some(handle) => self.push_confirm(handle, status.into()),
            None if status != MacStatus::Success => self.metrics.relay_failures += 1,
            None => {}
        }
    }

    // --- Channels ---

    /// Indications and confirms for the layer above.
    pub fn incoming(&self) -> &AppInChannel {
        &self.app_incoming
    }

    /// Data requests from the layer above.
    pub fn outgoing(&self) -> &AppOutChannel {
        &self.app_outgoing
    }

    /// Protocol events for the route-discovery and command handlers.
    pub fn events(&self) -> &EventChannel {
        &self.events
    }

    pub(crate) fn push_event(&mut self, event: Event) {
        let _ = self.events.try_send(event);
    }

    pub(crate) fn push_indication(&mut self, indication: Indication) {
        let _ = self.app_incoming.try_send(indication);
    }

    pub(crate) fn push_confirm(&mut self, handle: u8, status: NwkStatus) {
        self.push_indication(Indication::Confirm { handle, status });
    }

    // --- Debug ---

    #[cfg(any(test, feature = "debug"))]
    pub fn set_debug_emitter(&mut self, emitter: Box<dyn DebugEmitter>) {
        self.debug_emitter = Some(emitter);
    }

    #[cfg(any(test, feature = "debug"))]
    pub(crate) fn emit_debug(&mut self, event: DebugEvent) {
        if let Some(emitter) = self.debug_emitter.as_mut() {
            emitter.emit(event);
        }
    }

    // --- Accessors ---

    pub fn nib(&self) -> &Nib {
        &self.nib
    }

    pub fn nib_mut(&mut self) -> &mut Nib {
        &mut self.nib
    }

    pub fn short_addr(&self) -> ShortAddr {
        self.nib.short_addr
    }

    pub fn neighbors(&self) -> &NeighborTable {
        &self.neighbors
    }

    pub fn neighbors_mut(&mut self) -> &mut NeighborTable {
        &mut self.neighbors
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.routes
    }

    /// Route discovery installs and updates entries through this.
    pub fn routing_table_mut(&mut self) -> &mut RoutingTable {
        &mut self.routes
    }

    pub fn discovery_table(&self) -> &DiscoveryTable {
        &self.discovery
    }

    pub fn discovery_table_mut(&mut self) -> &mut DiscoveryTable {
        &mut self.discovery
    }

    pub fn pending_queue(&self) -> &PendingQueue {
        &self.pending
    }

    pub fn broadcast(&self) -> &BroadcastEngine {
        &self.broadcast
    }

    pub fn address_map(&self) -> &AddressMap {
        &self.address_map
    }

    pub fn address_map_mut(&mut self) -> &mut AddressMap {
        &mut self.address_map
    }

    pub fn metrics(&self) -> &NwkMetrics {
        &self.metrics
    }

    pub fn mac(&self) -> &M {
        &self.mac
    }

    pub fn mac_mut(&mut self) -> &mut M {
        &mut self.mac
    }

    pub fn clock(&self) -> &Clk {
        &self.clock
    }

    pub(crate) fn pending_mut(&mut self) -> &mut PendingQueue {
        &mut self.pending
    }

    pub(crate) fn take_routable_pending(&mut self) -> Vec<PendingFrame> {
        self.pending.take_routable(&self.routes)
    }

    pub(crate) fn broadcast_mut(&mut self) -> &mut BroadcastEngine {
        &mut self.broadcast
    }

    pub(crate) fn metrics_mut(&mut self) -> &mut NwkMetrics {
        &mut self.metrics
    }
}
