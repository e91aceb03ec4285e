//! Seams to the platform: link layer, time and randomness.
//!
//! These traits let the same engine run on:
//! - an 802.15.4 MAC driver on hardware
//! - the discrete-event simulator in `nwksim`
//! - the mocks in [`test_impls`] for unit tests

use core::future::Future;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use crate::buffer::FrameBuf;
use crate::time::Timestamp;
use crate::types::{
    DataRequest, Event, ExtAddr, Indication, MacStatus, PanId, ShortAddr, DEFAULT_MTU,
};

/// Queue size for link-layer indications.
pub(crate) const MAC_QUEUE_SIZE: usize = 8;

/// Queue size for upper-layer channels.
pub(crate) const APP_QUEUE_SIZE: usize = 8;

/// Queue size for the event channel.
pub(crate) const EVENT_QUEUE_SIZE: usize = 16;

/// Mutex type used for channels.
pub(crate) type ChannelMutex = CriticalSectionRawMutex;

/// Link-layer parameters of a received frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacDataIndication {
    /// Neighbor that transmitted the frame.
    pub src_addr: ShortAddr,
    /// Link-layer destination (own address or the MAC broadcast address).
    pub dest_addr: ShortAddr,
    pub pan_id: PanId,
    pub lqi: u8,
}

/// Transmit request handed to the link layer together with the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacDataRequest {
    pub src_addr: ShortAddr,
    pub dest_addr: ShortAddr,
    pub pan_id: PanId,
    /// Echoed back in the confirm; `None` for relayed frames.
    pub handle: Option<u8>,
    /// Hold the frame until the (sleeping) destination polls for it.
    pub indirect: bool,
    pub ack_request: bool,
}

/// Everything the link layer reports upward.
#[derive(Debug, Clone)]
pub enum MacEvent {
    Indication {
        indication: MacDataIndication,
        frame: FrameBuf,
    },
    Confirm {
        handle: Option<u8>,
        status: MacStatus,
    },
}

/// Link-layer event channel (radio task -> network layer).
pub type MacInChannel = Channel<ChannelMutex, MacEvent, MAC_QUEUE_SIZE>;

/// Indications and confirms for the layer above.
pub type AppInChannel = Channel<ChannelMutex, Indication, APP_QUEUE_SIZE>;

/// Data requests from the layer above.
pub type AppOutChannel = Channel<ChannelMutex, DataRequest, APP_QUEUE_SIZE>;

/// Protocol events for external collaborators.
pub type EventChannel = Channel<ChannelMutex, Event, EVENT_QUEUE_SIZE>;

/// IEEE 802.15.4-style MAC data service.
pub trait Mac {
    /// Largest NWK frame (header + payload) the MAC accepts.
    fn mtu(&self) -> usize {
        DEFAULT_MTU
    }

    /// PAN this node is operating on.
    fn pan_id(&self) -> PanId;

    /// This node's extended address.
    fn ext_addr(&self) -> ExtAddr;

    /// Queue `frame` for transmission. The outcome comes back as a
    /// [`MacEvent::Confirm`] carrying `req.handle`.
    fn data_request(&mut self, req: MacDataRequest, frame: FrameBuf);

    /// Channel the MAC posts indications and confirms to.
    ///
    /// - Radio task calls `incoming().try_send(event)`
    /// - `Nwk::run` calls `incoming().receive().await`
    fn incoming(&self) -> &MacInChannel;
}

/// Time source for real or simulated time.
///
/// # Example (embedded with embassy)
///
/// ```text
/// struct EmbassyClock;
///
/// impl Clock for EmbassyClock {
///     type SleepFuture<'a> = embassy_time::Timer;
///
///     fn now(&self) -> Timestamp {
///         Timestamp::from_millis(embassy_time::Instant::now().as_millis())
///     }
///
///     fn sleep_until(&self, time: Timestamp) -> Self::SleepFuture<'_> {
///         embassy_time::Timer::at(embassy_time::Instant::from_millis(time.as_millis()))
///     }
/// }
/// ```
pub trait Clock {
    /// Future type returned by sleep_until.
    type SleepFuture<'a>: Future<Output = ()>
    where
        Self: 'a;

    fn now(&self) -> Timestamp;

    /// Sleep until the given timestamp.
    fn sleep_until(&self, time: Timestamp) -> Self::SleepFuture<'_>;
}

/// Random number source (broadcast jitter).
pub trait Random {
    /// Uniform value in `[min, max)`.
    fn gen_range(&mut self, min: u64, max: u64) -> u64;
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_impls {
    //! Mock implementations for unit tests and simulation.

    use alloc::vec::Vec;
    use core::cell::Cell;
    use core::future::{ready, Ready};

    use super::*;
    use crate::wire::NwkHeader;

    /// MAC that records every transmit request.
    pub struct MockMac {
        pub pan_id: PanId,
        pub ext_addr: ExtAddr,
        pub mtu: usize,
        sent: Vec<(MacDataRequest, FrameBuf)>,
        incoming: MacInChannel,
    }

    impl Default for MockMac {
        fn default() -> Self {
            Self::new(0x1a62, 0x00124b0000000001)
        }
    }

    impl MockMac {
        pub fn new(pan_id: PanId, ext_addr: ExtAddr) -> Self {
            Self {
                pan_id,
                ext_addr,
                mtu: DEFAULT_MTU,
                sent: Vec::new(),
                incoming: Channel::new(),
            }
        }

        /// Post an event as if the radio produced it.
        pub fn inject(&self, event: MacEvent) {
            let _ = self.incoming.try_send(event);
        }

        /// Drain recorded transmit requests, oldest first.
        pub fn take_sent(&mut self) -> Vec<(MacDataRequest, FrameBuf)> {
            core::mem::take(&mut self.sent)
        }

        /// Drain recorded requests and decode their NWK headers.
        pub fn take_sent_headers(&mut self) -> Vec<(MacDataRequest, NwkHeader, FrameBuf)> {
            self.take_sent()
                .into_iter()
                .filter_map(|(req, mut frame)| {
                    let header = NwkHeader::strip_from(&mut frame).ok()?;
                    Some((req, header, frame))
                })
                .collect()
        }

        pub fn sent_count(&self) -> usize {
            self.sent.len()
        }
    }

    impl Mac for MockMac {
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

    /// Mock clock for testing (synchronous, time advances manually).
    pub struct MockClock {
        current: Cell<Timestamp>,
    }

    impl Default for MockClock {
        fn default() -> Self {
            Self {
                current: Cell::new(Timestamp::ZERO),
            }
        }
    }

    impl MockClock {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set(&self, time: Timestamp) {
            self.current.set(time);
        }

        pub fn advance(&self, duration: crate::time::Duration) {
            self.current.set(self.current.get() + duration);
        }
    }

    impl Clock for MockClock {
        type SleepFuture<'a> = Ready<()>;

        fn now(&self) -> Timestamp {
            self.current.get()
        }

        fn sleep_until(&self, _time: Timestamp) -> Self::SleepFuture<'_> {
            // Tests advance time by hand.
            ready(())
        }
    }

    /// Deterministic LCG.
    pub struct MockRandom {
        pub state: u64,
    }

    impl Default for MockRandom {
        fn default() -> Self {
            Self { state: 12345 }
        }
    }

    impl MockRandom {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_seed(seed: u64) -> Self {
            Self { state: seed }
        }
    }

    impl Random for MockRandom {
        fn gen_range(&mut self, min: u64, max: u64) -> u64 {
            self.state = self
                .state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            let range = max.saturating_sub(min);
            if range == 0 {
                return min;
            }
            min + (self.state >> 33) % range
        }
    }
}
