//! Broadcast flooding with passive acknowledgement.
//!
//! At most one broadcast is in flight. While it is, neighbors that relay
//! the same (source, sequence) are recorded as passive acks. When the ack
//! window closes the broadcast is either re-sent after a random jitter or,
//! once every addressed neighbor has relayed it or the retry ceiling is
//! reached, finished.
//!
//! Received broadcasts are filtered by (originator, sequence) in a separate
//! table. Both kinds of record age out on the slow tick; passive acks are
//! also dropped whenever a broadcast finishes.

use alloc::vec::Vec;

use crate::buffer::FrameBuf;
use crate::collections::SlotTable;
use crate::neighbor::NeighborTable;
use crate::time::{Duration, Timestamp};
use crate::types::{
    BroadcastClass, DeviceType, NwkError, PanId, ShortAddr, MAX_BROADCAST_RETRIES,
    PASSIVE_ACK_EXPIRY_TICKS, PASSIVE_ACK_TIMEOUT,
};
use crate::wire::NwkHeader;

/// A neighbor observed relaying broadcast `seq`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassiveAck {
    pub addr: ShortAddr,
    pub seq: u8,
    pub expiry: u8,
}

/// A broadcast originated by `src_addr` that this node has already handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeenBroadcast {
    pub src_addr: ShortAddr,
    pub seq: u8,
    pub expiry: u8,
}

struct ActiveBroadcast {
    seq: u8,
    class: BroadcastClass,
    retries: u8,
    snapshot: FrameBuf,
    header: NwkHeader,
    /// End of the current passive-ack window.
    ack_deadline: Timestamp,
    /// Set while a jittered retransmission is waiting.
    retry_at: Option<Timestamp>,
}

/// What the engine must do after a broadcast timer fired.
#[derive(Debug)]
pub enum BroadcastTimer {
    /// Nothing due.
    Idle,
    /// A retransmission was scheduled after jitter.
    RetryScheduled { seq: u8, attempt: u8 },
    /// Transmit this copy of the snapshot again.
    Resend { frame: FrameBuf, header: NwkHeader },
    /// The broadcast is over.
    Finished { seq: u8, all_relayed: bool, retries: u8 },
}

pub struct BroadcastEngine {
    acks: SlotTable<PassiveAck>,
    seen: SlotTable<SeenBroadcast>,
    active: Option<ActiveBroadcast>,
    accepting: bool,
}

impl BroadcastEngine {
    /// `capacity` bounds the passive-ack and the seen-broadcast tables each.
    pub fn new(capacity: usize) -> Self {
        Self {
            acks: SlotTable::with_capacity(capacity),
            seen: SlotTable::with_capacity(capacity),
            active: None,
            accepting: true,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_seq(&self) -> Option<u8> {
        self.active.as_ref().map(|a| a.seq)
    }

    /// Start flooding `frame`. On success the caller gets `frame` back for
    /// the first transmission while a deep copy is kept for retries. On
    /// rejection the frame is dropped.
    pub fn start(
        &mut self,
        frame: FrameBuf,
        header: &NwkHeader,
        device_type: DeviceType,
        rx_on_when_idle: bool,
        now: Timestamp,
    ) -> Result<FrameBuf, NwkError> {
        if self.active.is_some() || !self.accepting || header.radius == 0 {
            return Err(NwkError::NotPermitted);
        }
        let class = BroadcastClass::from_addr(header.dest_addr).ok_or(NwkError::NotPermitted)?;
        if !class.matches(device_type, rx_on_when_idle) {
            return Err(NwkError::NotPermitted);
        }

        self.accepting = false;
        self.active = Some(ActiveBroadcast {
            seq: header.seq,
            class,
            retries: 0,
            snapshot: frame.clone(),
            header: header.clone(),
            ack_deadline: now + PASSIVE_ACK_TIMEOUT,
            retry_at: None,
        });
        Ok(frame)
    }

    /// Record that `src_addr` relayed broadcast `seq`. Returns `Ok(false)` if
    /// this pair was already seen.
    pub fn add_new_sender(&mut self, src_addr: ShortAddr, seq: u8) -> Result<bool, NwkError> {
        if self.has_ack(src_addr, seq) {
            return Ok(false);
        }
        self.acks
            .insert(PassiveAck {
                addr: src_addr,
                seq,
                expiry: PASSIVE_ACK_EXPIRY_TICKS,
            })
            .map(|_| true)
            .ok_or(NwkError::TableFull)
    }

    pub fn has_ack(&self, addr: ShortAddr, seq: u8) -> bool {
        self.acks.values().any(|a| a.addr == addr && a.seq == seq)
    }

    /// Record broadcast `seq` from originator `src_addr`. Returns `Ok(false)`
    /// for a copy already handled.
    pub fn mark_seen(&mut self, src_addr: ShortAddr, seq: u8) -> Result<bool, NwkError> {
        if self.is_seen(src_addr, seq) {
            return Ok(false);
        }
        self.seen
            .insert(SeenBroadcast {
                src_addr,
                seq,
                expiry: PASSIVE_ACK_EXPIRY_TICKS,
            })
            .map(|_| true)
            .ok_or(NwkError::TableFull)
    }

    pub fn is_seen(&self, src_addr: ShortAddr, seq: u8) -> bool {
        self.seen
            .values()
            .any(|s| s.src_addr == src_addr && s.seq == seq)
    }

    /// Whether every neighbor addressed by `class` has relayed `seq`.
    pub fn check_all_relayed(
        &self,
        class: BroadcastClass,
        seq: u8,
        neighbors: &NeighborTable,
        pan_id: PanId,
    ) -> bool {
        neighbors
            .iter()
            .filter(|n| n.pan_id == pan_id && class.matches(n.device_type, n.rx_on_when_idle))
            .all(|n| self.has_ack(n.short_addr, seq))
    }

    /// Earliest instant `on_timer` has work to do.
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.active
            .as_ref()
            .map(|a| a.retry_at.unwrap_or(a.ack_deadline))
    }

    /// Drive the active broadcast. `jitter` delays a retransmission when
    /// one is scheduled.
    pub fn on_timer(
        &mut self,
        now: Timestamp,
        neighbors: &NeighborTable,
        pan_id: PanId,
        jitter: Duration,
    ) -> BroadcastTimer {
        let (seq, class, retries, retry_due, window_closed) = match self.active.as_ref() {
            Some(a) => (
                a.seq,
                a.class,
                a.retries,
                a.retry_at.is_some_and(|t| now >= t),
                a.retry_at.is_none() && now >= a.ack_deadline,
            ),
            None => return BroadcastTimer::Idle,
        };

        if retry_due {
            if let Some(active) = self.active.as_mut() {
                active.retry_at = None;
                active.ack_deadline = now + PASSIVE_ACK_TIMEOUT;
                return BroadcastTimer::Resend {
                    frame: active.snapshot.clone(),
                    header: active.header.clone(),
                };
            }
        }
        if !window_closed {
            return BroadcastTimer::Idle;
        }

        let retries = retries.saturating_add(1);
        let all_relayed = self.check_all_relayed(class, seq, neighbors, pan_id);
        if retries < MAX_BROADCAST_RETRIES && !all_relayed {
            if let Some(active) = self.active.as_mut() {
                active.retries = retries;
                active.retry_at = Some(now + jitter);
            }
            return BroadcastTimer::RetryScheduled {
                seq,
                attempt: retries,
            };
        }

        self.finish();
        BroadcastTimer::Finished {
            seq,
            all_relayed,
            retries,
        }
    }

    // Seen records stay behind and keep filtering late copies.
    fn finish(&mut self) {
        self.active = None;
        self.acks.clear();
        self.accepting = true;
    }

    /// Abandon any active broadcast and forget every record.
    pub fn cancel(&mut self) {
        self.finish();
        self.seen.clear();
    }

    /// One slow tick: age passive-ack and seen records. Returns the expired
    /// passive acks.
    pub fn periodic(&mut self) -> Vec<PassiveAck> {
        self.seen.retain(|s| {
            s.expiry = s.expiry.saturating_sub(1);
            s.expiry > 0
        });
        self.acks.retain(|a| {
            a.expiry = a.expiry.saturating_sub(1);
            a.expiry > 0
        })
    }

    pub fn acks(&self) -> impl Iterator<Item = &PassiveAck> + '_ {
        self.acks.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neighbor::NeighborEntry;
    use crate::types::{DiscoverRoute, NWK_BROADCAST_ALL, NWK_BROADCAST_ROUTERS};
    use crate::wire::FrameControl;

    const PAN: PanId = 0x1a62;

    fn header(dest: ShortAddr, seq: u8, radius: u8) -> NwkHeader {
        NwkHeader {
            fcf: FrameControl::data(DiscoverRoute::Suppress),
            dest_addr: dest,
            src_addr: 0,
            radius,
            seq,
            dest_ext: None,
            src_ext: None,
        }
    }

    fn neighbors(addrs: &[ShortAddr]) -> NeighborTable {
        let mut t = NeighborTable::new(8);
        for &a in addrs {
            t.add(NeighborEntry::new(a, PAN, DeviceType::Router)).unwrap();
        }
        t
    }

    fn started(engine: &mut BroadcastEngine, seq: u8) {
        let frame = FrameBuf::from_payload(b"flood");
        engine
            .start(frame, &header(NWK_BROADCAST_ALL, seq, 4), DeviceType::Router, true, Timestamp::ZERO)
            .unwrap();
    }

    #[test]
    fn test_start_returns_frame_and_keeps_copy() {
        let mut e = BroadcastEngine::new(8);
        let frame = FrameBuf::from_payload(b"flood");
        let back = e
            .start(frame, &header(NWK_BROADCAST_ALL, 1, 4), DeviceType::Router, true, Timestamp::ZERO)
            .unwrap();
        assert_eq!(back.payload(), b"flood");
        assert!(e.is_active());
        assert_eq!(e.next_deadline(), Some(Timestamp::ZERO + PASSIVE_ACK_TIMEOUT));
    }

    #[test]
    fn test_single_flight() {
        let mut e = BroadcastEngine::new(8);
        started(&mut e, 1);
        let deadline = e.next_deadline();
        let second = e.start(
            FrameBuf::from_payload(b"other"),
            &header(NWK_BROADCAST_ALL, 2, 4),
            DeviceType::Router,
            true,
            Timestamp::from_millis(100),
        );
        assert_eq!(second.err(), Some(NwkError::NotPermitted));
        assert_eq!(e.active_seq(), Some(1));
        assert_eq!(e.next_deadline(), deadline);
    }

    #[test]
    fn test_start_rejections() {
        let mut e = BroadcastEngine::new(8);
        let zero_radius = e.start(
            FrameBuf::from_payload(b"x"),
            &header(NWK_BROADCAST_ALL, 1, 0),
            DeviceType::Router,
            true,
            Timestamp::ZERO,
        );
        assert!(zero_radius.is_err());
        let wrong_class = e.start(
            FrameBuf::from_payload(b"x"),
            &header(NWK_BROADCAST_ROUTERS, 1, 4),
            DeviceType::EndDevice,
            true,
            Timestamp::ZERO,
        );
        assert!(wrong_class.is_err());
        assert!(!e.is_active());
    }

    #[test]
    fn test_add_new_sender_deduplicates() {
        let mut e = BroadcastEngine::new(8);
        assert_eq!(e.add_new_sender(5, 1), Ok(true));
        assert_eq!(e.add_new_sender(5, 1), Ok(false));
        assert_eq!(e.add_new_sender(5, 2), Ok(true));
        assert_eq!(e.add_new_sender(6, 1), Ok(true));
    }

    #[test]
    fn test_check_all_relayed() {
        let mut e = BroadcastEngine::new(8);
        let nbrs = neighbors(&[1, 2]);
        e.add_new_sender(1, 9).unwrap();
        assert!(!e.check_all_relayed(BroadcastClass::All, 9, &nbrs, PAN));
        e.add_new_sender(2, 9).unwrap();
        assert!(e.check_all_relayed(BroadcastClass::All, 9, &nbrs, PAN));
        assert!(!e.check_all_relayed(BroadcastClass::All, 10, &nbrs, PAN));
    }

    #[test]
    fn test_sleepy_neighbors_excluded_from_rx_on_class() {
        let e = BroadcastEngine::new(8);
        let mut nbrs = NeighborTable::new(4);
        nbrs.add(NeighborEntry::new(7, PAN, DeviceType::EndDevice)).unwrap();
        assert!(e.check_all_relayed(BroadcastClass::RxOnWhenIdle, 1, &nbrs, PAN));
        assert!(!e.check_all_relayed(BroadcastClass::All, 1, &nbrs, PAN));
    }

    #[test]
    fn test_finishes_when_all_relayed() {
        let mut e = BroadcastEngine::new(8);
        let nbrs = neighbors(&[1]);
        started(&mut e, 3);
        e.add_new_sender(1, 3).unwrap();

        let t = Timestamp::ZERO + PASSIVE_ACK_TIMEOUT;
        match e.on_timer(t, &nbrs, PAN, Duration::ZERO) {
            BroadcastTimer::Finished { seq, all_relayed, .. } => {
                assert_eq!(seq, 3);
                assert!(all_relayed);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(!e.is_active());
        assert_eq!(e.acks().count(), 0);
        assert!(!e.has_ack(1, 3));
    }

    #[test]
    fn test_seen_records_survive_finish() {
        let mut e = BroadcastEngine::new(8);
        let nbrs = neighbors(&[1]);
        assert_eq!(e.mark_seen(0, 3), Ok(true));
        started(&mut e, 3);
        e.add_new_sender(1, 3).unwrap();

        let t = Timestamp::ZERO + PASSIVE_ACK_TIMEOUT;
        assert!(matches!(
            e.on_timer(t, &nbrs, PAN, Duration::ZERO),
            BroadcastTimer::Finished { .. }
        ));
        assert_eq!(e.acks().count(), 0);
        assert_eq!(e.mark_seen(0, 3), Ok(false));

        e.cancel();
        assert!(!e.is_seen(0, 3));
    }

    #[test]
    fn test_relayer_ack_does_not_mark_its_own_broadcast_seen() {
        let mut e = BroadcastEngine::new(8);
        // Node 1 relayed node 0's broadcast 1...
        e.add_new_sender(1, 1).unwrap();
        assert_eq!(e.mark_seen(0, 1), Ok(true));
        // ...and then originates its own broadcast 1.
        assert_eq!(e.mark_seen(1, 1), Ok(true));
        assert_eq!(e.mark_seen(1, 1), Ok(false));
    }

    #[test]
    fn test_full_seen_table() {
        let mut e = BroadcastEngine::new(1);
        e.mark_seen(0, 1).unwrap();
        assert_eq!(e.mark_seen(0, 2), Err(NwkError::TableFull));
        assert_eq!(e.mark_seen(0, 1), Ok(false));
    }

    #[test]
    fn test_retries_until_ceiling() {
        let mut e = BroadcastEngine::new(8);
        let nbrs = neighbors(&[1]);
        started(&mut e, 4);

        let jitter = Duration::from_millis(20);
        let mut resends = 0;
        loop {
            let now = e.next_deadline().expect("active broadcast");
            match e.on_timer(now, &nbrs, PAN, jitter) {
                BroadcastTimer::RetryScheduled { .. } => {}
                BroadcastTimer::Resend { frame, .. } => {
                    assert_eq!(frame.payload(), b"flood");
                    resends += 1;
                }
                BroadcastTimer::Finished { all_relayed, retries, .. } => {
                    assert!(!all_relayed);
                    assert_eq!(retries, MAX_BROADCAST_RETRIES);
                    break;
                }
                BroadcastTimer::Idle => panic!("deadline reached but nothing to do"),
            }
        }
        assert_eq!(resends, usize::from(MAX_BROADCAST_RETRIES - 1));
        // Unlocked again.
        started(&mut e, 5);
    }

    #[test]
    fn test_timer_before_deadline_is_idle() {
        let mut e = BroadcastEngine::new(8);
        let nbrs = neighbors(&[1]);
        started(&mut e, 1);
        assert!(matches!(
            e.on_timer(Timestamp::from_millis(10), &nbrs, PAN, Duration::ZERO),
            BroadcastTimer::Idle
        ));
    }

    #[test]
    fn test_periodic_ages_acks() {
        let mut e = BroadcastEngine::new(8);
        e.add_new_sender(1, 1).unwrap();
        e.mark_seen(2, 1).unwrap();
        for _ in 0..PASSIVE_ACK_EXPIRY_TICKS - 1 {
            assert!(e.periodic().is_empty());
            assert!(e.is_seen(2, 1));
        }
        assert_eq!(e.periodic().len(), 1);
        assert!(!e.has_ack(1, 1));
        assert!(!e.is_seen(2, 1));
    }
}
