//! Debug events for protocol tracing.
//!
//! Enabled in test builds and with the `debug` feature. The simulator
//! installs an emitter per node to trace forwarding decisions.

use crate::routing::ForwardPath;
use crate::types::ShortAddr;

/// Sink for debug events. Implemented by test harnesses.
pub trait DebugEmitter: Send {
    fn emit(&mut self, event: DebugEvent);
}

/// Emit a debug event from inside the engine. Compiles to nothing unless
/// tracing is enabled.
macro_rules! emit_debug {
    ($node:expr, $event:expr) => {{
        #[cfg(any(test, feature = "debug"))]
        {
            let event = $event;
            $node.emit_debug(event);
        }
    }};
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugEvent {
    /// A frame was handed to the MAC.
    Forwarded {
        src: ShortAddr,
        dest: ShortAddr,
        seq: u8,
        path: ForwardPath,
        mac_dest: ShortAddr,
    },
    /// A frame was dropped.
    FrameDropped {
        src: ShortAddr,
        dest: ShortAddr,
        seq: u8,
        reason: &'static str,
    },
    /// A data frame was delivered to the layer above.
    Delivered { src: ShortAddr, seq: u8 },
    /// Frame parked until a route to `dest` is found.
    PendingQueued { dest: ShortAddr, seq: u8 },
    /// Parked frame resubmitted after a route appeared.
    PendingDrained { dest: ShortAddr, seq: u8 },
    /// Parked frame dropped after discovery timed out.
    PendingExpired { dest: ShortAddr, seq: u8 },
    BroadcastStarted { seq: u8 },
    BroadcastRetry { seq: u8, attempt: u8 },
    BroadcastFinished {
        seq: u8,
        all_relayed: bool,
        retries: u8,
    },
    DiscoveryExpired {
        rreq_id: u8,
        src: ShortAddr,
        dest: ShortAddr,
        route_purged: bool,
    },
}
