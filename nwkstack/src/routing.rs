//! Frame forwarding and inbound dispatch.
//!
//! An outgoing frame takes the first path that applies:
//! 1. broadcast destinations go to the MAC broadcast address
//! 2. a known neighbor is addressed directly (indirectly if it sleeps)
//! 3. a usable mesh route supplies the next hop
//! 4. if the frame asks for discovery it is parked and discovery requested
//! 5. tree routing by address block
//!
//! Frames resubmitted from the pending queue skip step 4.

#[cfg(any(test, feature = "debug"))]
use crate::debug::DebugEvent;

use crate::buffer::FrameBuf;
use crate::config::NwkConfig;
use crate::neighbor::NeighborAddr;
use crate::node::Nwk;
use crate::time::Timestamp;
use crate::traits::{Clock, Mac, MacDataIndication, MacDataRequest, Random};
use crate::tree::calc_next_hop;
use crate::types::{
    is_broadcast, BroadcastClass, DataIndication, DataRequest, DeviceType, DiscoverRoute, Event,
    Indication, NwkStatus, Relationship, ShortAddr, MAC_BROADCAST_ADDR, UNASSIGNED_ADDR,
};
use crate::wire::{FrameControl, FrameType, NwkHeader};

/// How a frame left the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardPath {
    Broadcast,
    /// Direct to a neighbor; `indirect` when it sleeps and polls its parent.
    Neighbor { indirect: bool },
    Mesh,
    Tree,
}

/// Result of handing a frame to [`Nwk::forward`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    Sent { path: ForwardPath, mac_dest: ShortAddr },
    /// Parked in the pending queue until discovery finds a route.
    Queued,
    Dropped,
}

impl<M, R, Clk, Cfg> Nwk<M, R, Clk, Cfg>
where
    M: Mac,
    R: Random,
    Clk: Clock,
    Cfg: NwkConfig,
{
    /// Send `frame` (payload only; `header` is prepended here) toward
    /// `header.dest_addr`. `handle` is set for locally originated frames and
    /// selects whether failures are confirmed upward.
    pub fn forward(
        &mut self,
        frame: FrameBuf,
        header: NwkHeader,
        handle: Option<u8>,
    ) -> ForwardOutcome {
        self.forward_frame(frame, header, handle, true)
    }

    fn forward_frame(
        &mut self,
        frame: FrameBuf,
        header: NwkHeader,
        handle: Option<u8>,
        allow_discovery: bool,
    ) -> ForwardOutcome {
        let dest = header.dest_addr;
        let pan_id = self.mac().pan_id();

        let (path, mac_dest) = if is_broadcast(dest) {
            (ForwardPath::Broadcast, MAC_BROADCAST_ADDR)
        } else if let Some(rx_on) = self
            .neighbors()
            .find(NeighborAddr::Short(dest), pan_id)
            .map(|n| n.rx_on_when_idle)
        {
            (ForwardPath::Neighbor { indirect: !rx_on }, dest)
        } else if let Some(hop) = self.routing_table_mut().get_next_hop(dest) {
            (ForwardPath::Mesh, hop)
        } else if allow_discovery && header.fcf.discover_route == DiscoverRoute::Enable {
            return self.queue_for_discovery(frame, header, handle);
        } else if let Some(hop) = self.tree_next_hop(dest) {
            (ForwardPath::Tree, hop)
        } else {
            self.metrics_mut().tree_route_failures += 1;
            self.drop_frame(&header, handle, NwkStatus::RouteError, "no tree route");
            return ForwardOutcome::Dropped;
        };

        self.transmit(frame, header, handle, path, mac_dest)
    }

    /// Tree-routing next hop for `dest` from this node's position.
    pub fn tree_next_hop(&self, dest: ShortAddr) -> Option<ShortAddr> {
        let parent = self.neighbors().get_parent().map(|p| p.short_addr);
        if self.nib().device_type == DeviceType::EndDevice {
            return parent;
        }
        let pan_id = self.mac().pan_id();
        let neighbors = self.neighbors();
        calc_next_hop(&self.nib().tree_position(), dest, parent, |addr| {
            neighbors
                .find(NeighborAddr::Short(addr), pan_id)
                .is_some_and(|n| n.relationship == Relationship::Child)
        })
    }

    fn queue_for_discovery(
        &mut self,
        frame: FrameBuf,
        header: NwkHeader,
        handle: Option<u8>,
    ) -> ForwardOutcome {
        let dest = header.dest_addr;
        let radius = header.radius;
        let seq = header.seq;
        let src = header.src_addr;

        match self.pending_mut().add_new(frame, header, handle) {
            Ok(()) => {
                emit_debug!(self, DebugEvent::PendingQueued { dest, seq });
                self.push_event(Event::RouteDiscovery { dest, radius });
                ForwardOutcome::Queued
            }
            Err(_) => {
                self.metrics_mut().pending_dropped += 1;
                emit_debug!(
                    self,
                    DebugEvent::FrameDropped {
                        src,
                        dest,
                        seq,
                        reason: "pending queue full",
                    }
                );
                if let Some(handle) = handle {
                    self.push_confirm(handle, NwkStatus::RouteDiscoveryFailed);
                }
                ForwardOutcome::Dropped
            }
        }
    }

    /// Prepend the header and hand the frame to the MAC.
    pub(crate) fn transmit(
        &mut self,
        mut frame: FrameBuf,
        header: NwkHeader,
        handle: Option<u8>,
        path: ForwardPath,
        mac_dest: ShortAddr,
    ) -> ForwardOutcome {
        if frame.len() + header.encoded_len() > self.mac().mtu() {
            self.metrics_mut().oversize_dropped += 1;
            self.drop_frame(&header, handle, NwkStatus::FrameTooLong, "frame too long");
            return ForwardOutcome::Dropped;
        }

        header.prepend_to(&mut frame);
        let own = self.nib().short_addr;
        let metrics = self.metrics_mut();
        metrics.frames_sent += 1;
        if header.src_addr != own {
            metrics.frames_relayed += 1;
        }

        emit_debug!(
            self,
            DebugEvent::Forwarded {
                src: header.src_addr,
                dest: header.dest_addr,
                seq: header.seq,
                path,
                mac_dest,
            }
        );

        let req = MacDataRequest {
            src_addr: own,
            dest_addr: mac_dest,
            pan_id: self.mac().pan_id(),
            handle,
            indirect: path == ForwardPath::Neighbor { indirect: true },
            ack_request: mac_dest != MAC_BROADCAST_ADDR,
        };
        self.mac_mut().data_request(req, frame);
        ForwardOutcome::Sent { path, mac_dest }
    }

    fn drop_frame(
        &mut self,
        header: &NwkHeader,
        handle: Option<u8>,
        status: NwkStatus,
        reason: &'static str,
    ) {
        emit_debug!(
            self,
            DebugEvent::FrameDropped {
                src: header.src_addr,
                dest: header.dest_addr,
                seq: header.seq,
                reason,
            }
        );
        #[cfg(not(any(test, feature = "debug")))]
        let _ = (header, reason);
        if let Some(handle) = handle {
            self.push_confirm(handle, status);
        }
    }

    /// Resubmit every parked frame whose destination now has a route.
    /// Returns how many were resubmitted.
    pub fn send_pending(&mut self) -> usize {
        let ready = self.take_routable_pending();
        let count = ready.len();
        for pending in ready {
            emit_debug!(
                self,
                DebugEvent::PendingDrained {
                    dest: pending.header.dest_addr,
                    seq: pending.header.seq,
                }
            );
            self.forward_frame(pending.frame, pending.header, pending.handle, false);
        }
        count
    }

    // --- Upper layer ---

    /// Originate a data frame. The outcome is reported as an
    /// [`Indication::Confirm`] carrying `req.handle`, either right away for
    /// local rejections or once the MAC confirms the transmission.
    pub fn handle_data_request(&mut self, req: DataRequest, now: Timestamp) {
        let DataRequest {
            dest,
            radius,
            discover_route,
            handle,
            payload,
        } = req;

        let own = self.nib().short_addr;
        if !self.nib().joined || dest == own || dest == UNASSIGNED_ADDR {
            self.push_confirm(handle, NwkStatus::InvalidRequest);
            return;
        }

        let broadcast = is_broadcast(dest);
        let radius = if radius == 0 {
            self.nib().default_radius()
        } else {
            radius
        };
        let discover_route = if broadcast {
            DiscoverRoute::Suppress
        } else {
            discover_route
        };
        let header = NwkHeader {
            fcf: FrameControl::data(discover_route),
            dest_addr: dest,
            src_addr: own,
            radius,
            seq: self.nib_mut().next_seq(),
            dest_ext: None,
            src_ext: None,
        };

        if !broadcast {
            self.forward(payload, header, Some(handle));
            return;
        }

        let device_type = self.nib().device_type;
        let rx_on = self.nib().rx_on_when_idle;
        match self
            .broadcast_mut()
            .start(payload, &header, device_type, rx_on, now)
        {
            Ok(frame) => {
                emit_debug!(self, DebugEvent::BroadcastStarted { seq: header.seq });
                self.forward_frame(frame, header, Some(handle), false);
            }
            Err(_) => {
                self.metrics_mut().broadcast_rejected += 1;
                self.push_confirm(handle, NwkStatus::NotPermitted);
            }
        }
    }

    // --- Link layer ---

    /// A frame arrived from the MAC.
    pub fn handle_mac_rx(&mut self, indication: MacDataIndication, mut frame: FrameBuf, now: Timestamp) {
        self.metrics_mut().frames_received += 1;
        if !self.nib().joined || indication.pan_id != self.mac().pan_id() {
            self.metrics_mut().rx_dropped += 1;
            return;
        }

        let header = match NwkHeader::strip_from(&mut frame) {
            Ok(header) => header,
            Err(_) => {
                self.metrics_mut().rx_dropped += 1;
                return;
            }
        };

        if let Some(ext) = header.src_ext {
            let _ = self.address_map_mut().refresh(header.src_addr, ext);
        }

        if is_broadcast(header.dest_addr) {
            let device_type = self.nib().device_type;
            let rx_on = self.nib().rx_on_when_idle;
            let serviced = BroadcastClass::from_addr(header.dest_addr)
                .is_some_and(|class| class.matches(device_type, rx_on));
            if !serviced {
                self.metrics_mut().rx_dropped += 1;
                self.drop_frame(&header, None, NwkStatus::InvalidRequest, "broadcast class not serviced");
                return;
            }
        }

        match header.fcf.frame_type {
            FrameType::Command => self.push_event(Event::Command {
                header,
                link_src: indication.src_addr,
                payload: frame.to_vec(),
            }),
            FrameType::Data if is_broadcast(header.dest_addr) => {
                self.handle_broadcast_rx(indication, header, frame, now)
            }
            FrameType::Data => self.handle_unicast_rx(indication, header, frame),
        }
    }

    fn handle_unicast_rx(
        &mut self,
        indication: MacDataIndication,
        mut header: NwkHeader,
        frame: FrameBuf,
    ) {
        if header.dest_addr == self.nib().short_addr {
            self.deliver(&indication, &header, frame);
            return;
        }
        if header.radius == 0 {
            self.metrics_mut().radius_exhausted += 1;
            self.drop_frame(&header, None, NwkStatus::RouteError, "radius exhausted");
            return;
        }
        header.radius -= 1;
        self.forward(frame, header, None);
    }

    // The link-layer sender is a passive ack for our own copy; duplicates are
    // filtered by (originator, seq) alone.
    fn handle_broadcast_rx(
        &mut self,
        indication: MacDataIndication,
        mut header: NwkHeader,
        frame: FrameBuf,
        now: Timestamp,
    ) {
        let seq = header.seq;
        // A full ack table only costs a retransmission.
        let _ = self.broadcast_mut().add_new_sender(indication.src_addr, seq);
        if header.src_addr == self.nib().short_addr {
            return;
        }
        match self.broadcast_mut().mark_seen(header.src_addr, seq) {
            Ok(true) => {}
            Ok(false) => {
                self.metrics_mut().duplicates += 1;
                return;
            }
            Err(_) => {
                self.metrics_mut().rx_dropped += 1;
                self.drop_frame(&header, None, NwkStatus::InvalidRequest, "seen-broadcast table full");
                return;
            }
        }

        self.deliver(&indication, &header, frame.clone());

        let device_type = self.nib().device_type;
        if !device_type.is_router_capable() {
            return;
        }
        header.radius = header.radius.saturating_sub(1);
        if header.radius == 0 {
            return;
        }

        let rx_on = self.nib().rx_on_when_idle;
        match self
            .broadcast_mut()
            .start(frame, &header, device_type, rx_on, now)
        {
            Ok(frame) => {
                emit_debug!(self, DebugEvent::BroadcastStarted { seq });
                self.forward_frame(frame, header, None, false);
            }
            Err(_) => {
                self.metrics_mut().broadcast_rejected += 1;
                self.drop_frame(&header, None, NwkStatus::NotPermitted, "broadcast in progress");
            }
        }
    }

    fn deliver(&mut self, indication: &MacDataIndication, header: &NwkHeader, payload: FrameBuf) {
        self.metrics_mut().frames_delivered += 1;
        emit_debug!(
            self,
            DebugEvent::Delivered {
                src: header.src_addr,
                seq: header.seq,
            }
        );
        self.push_indication(Indication::Data(DataIndication {
            src_addr: header.src_addr,
            dest_addr: header.dest_addr,
            link_src: indication.src_addr,
            seq: header.seq,
            radius: header.radius,
            lqi: indication.lqi,
            payload,
        }));
    }
}
