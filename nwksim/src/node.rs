//! SimNode wrapper for simulated nwkstack nodes.

use std::cell::Cell;
use std::future::{ready, Ready};
use std::sync::{Arc, Mutex};

use embassy_sync::channel::Channel;
use nwkstack::debug::{DebugEmitter, DebugEvent};
use nwkstack::neighbor::NeighborEntry;
use nwkstack::traits::test_impls::MockRandom;
use nwkstack::traits::MacInChannel;
use nwkstack::{
    Clock, DataIndication, DataRequest, DefaultConfig, DiscoverRoute, Duration, Event, ExtAddr,
    FrameBuf, Indication, Mac, MacDataIndication, MacDataRequest, MacStatus, NibConfig, Nwk,
    NwkError, NwkStatus, PanId, ShortAddr, Timestamp,
};

/// PAN every simulated network runs on.
pub const SIM_PAN_ID: PanId = 0x1a62;

/// Link layer for simulation. Transmit requests are collected and moved
/// onto links by the simulator.
pub struct SimMac {
    pan_id: PanId,
    ext_addr: ExtAddr,
    mtu: usize,
    sent: Vec<(MacDataRequest, FrameBuf)>,
    incoming: MacInChannel,
}

impl SimMac {
    pub fn new(pan_id: PanId, ext_addr: ExtAddr) -> Self {
        Self {
            pan_id,
            ext_addr,
            mtu: nwkstack::types::DEFAULT_MTU,
            sent: Vec::new(),
            incoming: Channel::new(),
        }
    }

    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    /// Take all transmit requests issued since the last call.
    pub fn take_sent(&mut self) -> Vec<(MacDataRequest, FrameBuf)> {
        std::mem::take(&mut self.sent)
    }
}

impl Mac for SimMac {
    fn mtu(&self) -> usize {
        self.mtu
    }

    fn pan_id(&self) -> PanId {
        self.pan_id
    }

    fn ext_addr(&self) -> ExtAddr {
        self.ext_addr
    }

    fn data_request(&mut self, req: MacDataRequest, frame: FrameBuf) {
        self.sent.push((req, frame));
    }

    fn incoming(&self) -> &MacInChannel {
        &self.incoming
    }
}

/// Mock clock for simulation.
///
/// Time is controlled externally by the simulator.
pub struct SimClock {
    current: Cell<Timestamp>,
}

impl SimClock {
    pub fn new() -> Self {
        Self::at(Timestamp::ZERO)
    }

    pub fn at(time: Timestamp) -> Self {
        Self {
            current: Cell::new(time),
        }
    }

    pub fn set(&self, time: Timestamp) {
        self.current.set(time);
    }

    pub fn advance(&self, duration: Duration) {
        self.current.set(self.current.get() + duration);
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SimClock {
    type SleepFuture<'a> = Ready<()>;

    fn now(&self) -> Timestamp {
        self.current.get()
    }

    fn sleep_until(&self, _time: Timestamp) -> Self::SleepFuture<'_> {
        ready(())
    }
}

/// Collects a node's debug events for later inspection.
#[derive(Clone, Default)]
struct DebugLog(Arc<Mutex<Vec<DebugEvent>>>);

impl DebugEmitter for DebugLog {
    fn emit(&mut self, event: DebugEvent) {
        if let Ok(mut events) = self.0.lock() {
            events.push(event);
        }
    }
}

/// Type alias for simulated nodes.
pub type SimNodeInner = Nwk<SimMac, MockRandom, SimClock, DefaultConfig>;

/// Wrapper around an nwkstack engine for simulation.
///
/// After every handler call the node's upper-layer and event channels are
/// drained into plain vectors so scenarios can inspect them afterwards.
pub struct SimNode {
    inner: SimNodeInner,
    debug: DebugLog,
    /// Data indications delivered to the layer above.
    pub received: Vec<DataIndication>,
    /// Confirms as (handle, status), in arrival order.
    pub confirms: Vec<(u8, NwkStatus)>,
    /// Protocol events raised by the engine.
    pub events: Vec<Event>,
    next_handle: u8,
    /// When the node was created.
    pub created_at: Timestamp,
}

impl SimNode {
    /// Create an unjoined node. `seed` fixes both the extended address and
    /// the broadcast jitter sequence.
    pub fn new(config: NibConfig, seed: u64, created_at: Timestamp) -> Self {
        let mac = SimMac::new(SIM_PAN_ID, 0x00124b0000000000 | seed);
        let random = MockRandom::with_seed(seed);
        let clock = SimClock::at(created_at);
        let mut inner = Nwk::new(mac, random, clock, config);

        let debug = DebugLog::default();
        inner.set_debug_emitter(Box::new(debug.clone()));

        Self {
            inner,
            debug,
            received: Vec::new(),
            confirms: Vec::new(),
            events: Vec::new(),
            next_handle: 0,
            created_at,
        }
    }

    pub fn short_addr(&self) -> ShortAddr {
        self.inner.short_addr()
    }

    pub fn ext_addr(&self) -> ExtAddr {
        self.inner.mac().ext_addr()
    }

    /// Get a reference to the inner node.
    pub fn inner(&self) -> &SimNodeInner {
        &self.inner
    }

    /// Get a mutable reference to the inner node.
    pub fn inner_mut(&mut self) -> &mut SimNodeInner {
        &mut self.inner
    }

    pub fn form_network(&mut self, now: Timestamp) -> Result<(), NwkError> {
        self.inner.clock().set(now);
        self.inner.form_network(now)
    }

    pub fn join_network(
        &mut self,
        parent: NeighborEntry,
        short_addr: ShortAddr,
        depth: u8,
        now: Timestamp,
    ) -> Result<(), NwkError> {
        self.inner.clock().set(now);
        self.inner.join_network(parent, short_addr, depth, now)
    }

    /// Handle a frame arriving over a link.
    pub fn handle_rx(&mut self, indication: MacDataIndication, frame: Vec<u8>, now: Timestamp) {
        // Update the clock so any code that reads clock.now() gets correct time
        self.inner.clock().set(now);
        self.inner
            .handle_mac_rx(indication, FrameBuf::from_vec(frame), now);
        self.drain();
    }

    pub fn handle_mac_confirm(&mut self, handle: Option<u8>, status: MacStatus, now: Timestamp) {
        self.inner.clock().set(now);
        self.inner.handle_mac_confirm(handle, status);
        self.drain();
    }

    /// Handle timer events.
    pub fn handle_timer(&mut self, now: Timestamp) {
        self.inner.clock().set(now);
        self.inner.handle_timer(now);
        self.drain();
    }

    /// Submit a data request from the layer above. Returns the handle its
    /// confirm will carry.
    pub fn app_send(
        &mut self,
        dest: ShortAddr,
        payload: &[u8],
        radius: u8,
        discover_route: DiscoverRoute,
        now: Timestamp,
    ) -> u8 {
        let handle = self.next_handle;
        self.next_handle = self.next_handle.wrapping_add(1);

        self.inner.clock().set(now);
        self.inner.handle_data_request(
            DataRequest {
                dest,
                radius,
                discover_route,
                handle,
                payload: FrameBuf::from_payload(payload),
            },
            now,
        );
        self.drain();
        handle
    }

    /// Install an active route and resubmit parked frames toward it.
    /// Returns how many frames went out.
    pub fn install_route(&mut self, dest: ShortAddr, next_hop: ShortAddr, now: Timestamp) -> usize {
        self.inner.clock().set(now);
        if self
            .inner
            .routing_table_mut()
            .add_route(dest, next_hop, nwkstack::RouteStatus::Active)
            .is_err()
        {
            return 0;
        }
        let sent = self.inner.send_pending();
        self.drain();
        sent
    }

    /// When the node next needs a timer call.
    pub fn next_wake(&self) -> Option<Timestamp> {
        self.inner.next_wake()
    }

    /// Take all outgoing transmit requests from the link layer.
    pub fn take_outgoing(&mut self) -> Vec<(MacDataRequest, FrameBuf)> {
        self.inner.mac_mut().take_sent()
    }

    /// Take all debug events recorded so far.
    pub fn take_debug_events(&self) -> Vec<DebugEvent> {
        match self.debug.0.lock() {
            Ok(mut events) => std::mem::take(&mut *events),
            Err(_) => Vec::new(),
        }
    }

    fn drain(&mut self) {
        while let Ok(indication) = self.inner.incoming().try_receive() {
            match indication {
                Indication::Data(data) => self.received.push(data),
                Indication::Confirm { handle, status } => self.confirms.push((handle, status)),
            }
        }
        while let Ok(event) = self.inner.events().try_receive() {
            self.events.push(event);
        }
    }
}
