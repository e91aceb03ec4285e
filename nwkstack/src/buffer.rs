//! Frame buffers with reserved headroom.
//!
//! A `FrameBuf` owns its bytes. The start of the current frame moves
//! backwards when a header is prepended and forwards when a header is
//! consumed, so a received frame can be relayed with a rewritten header
//! without copying its payload. Ownership moves with the buffer: whoever
//! holds it last frees it, and `Clone` is a deep copy.

use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use crate::types::FRAME_HEADROOM;
use crate::wire::DecodeError;

#[derive(Clone, PartialEq, Eq)]
pub struct FrameBuf {
    data: Vec<u8>,
    head: usize,
}

impl FrameBuf {
    /// Payload preceded by `headroom` bytes for headers added later.
    pub fn with_headroom(headroom: usize, payload: &[u8]) -> Self {
        let mut data = vec![0u8; headroom];
        data.extend_from_slice(payload);
        Self {
            data,
            head: headroom,
        }
    }

    /// Payload with the default NWK + MAC headroom.
    pub fn from_payload(payload: &[u8]) -> Self {
        Self::with_headroom(FRAME_HEADROOM, payload)
    }

    /// A complete received frame with no headroom.
    pub fn from_vec(frame: Vec<u8>) -> Self {
        Self {
            data: frame,
            head: 0,
        }
    }

    pub fn headroom(&self) -> usize {
        self.head
    }

    /// Length of the current frame.
    pub fn len(&self) -> usize {
        self.data.len() - self.head
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current frame bytes.
    pub fn payload(&self) -> &[u8] {
        &self.data[self.head..]
    }

    /// Write `bytes` in front of the current frame. Grows the allocation if
    /// the headroom is exhausted.
    pub fn prepend(&mut self, bytes: &[u8]) {
        if bytes.len() > self.head {
            let extra = bytes.len() - self.head;
            let mut data = Vec::with_capacity(self.data.len() + extra);
            data.resize(extra, 0);
            data.extend_from_slice(&self.data);
            self.data = data;
            self.head += extra;
        }
        self.head -= bytes.len();
        self.data[self.head..self.head + bytes.len()].copy_from_slice(bytes);
    }

    /// Drop `n` bytes from the front of the frame, turning them into headroom.
    pub fn consume(&mut self, n: usize) -> Result<(), DecodeError> {
        if n > self.len() {
            return Err(DecodeError::UnexpectedEof);
        }
        self.head += n;
        Ok(())
    }

    /// Copy of the current frame bytes.
    pub fn to_vec(&self) -> Vec<u8> {
        self.payload().to_vec()
    }
}

impl fmt::Debug for FrameBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuf")
            .field("len", &self.len())
            .field("headroom", &self.head)
            .finish()
    }
}
