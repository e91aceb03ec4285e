//! NWK header encoding and decoding.
//!
//! ## Header Format
//!
//! All multi-byte fields are little-endian.
//!
//! ```text
//! frame_control (2) || dest_addr (2) || src_addr (2) || radius (1) || seq (1)
//! || [dest_ieee (8)] || [src_ieee (8)] || payload
//!
//! frame_control bits:
//! - 0-1:  frame type (0 = data, 1 = command)
//! - 2-5:  protocol version (2)
//! - 6-7:  discover route (0 = suppress, 1 = enable)
//! - 8:    multicast
//! - 9:    security
//! - 10:   source route
//! - 11:   dest IEEE address present
//! - 12:   src IEEE address present
//! ```
//!
//! Multicast, security and source-routed frames are not supported and fail
//! to decode.

use alloc::vec::Vec;

use crate::buffer::FrameBuf;
use crate::types::{
    DiscoverRoute, ExtAddr, ShortAddr, NWK_HEADER_MIN_LEN, NWK_PROTOCOL_VERSION,
};

/// Decoding error types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("unexpected end of frame")]
    UnexpectedEof,
    #[error("unknown frame type {0}")]
    InvalidFrameType(u8),
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),
    /// Multicast, security or source routing requested.
    #[error("unsupported frame feature")]
    UnsupportedFeature,
}

const FCF_FRAME_TYPE_MASK: u16 = 0x0003;
const FCF_VERSION_SHIFT: u16 = 2;
const FCF_VERSION_MASK: u16 = 0x000F;
const FCF_DISCOVER_SHIFT: u16 = 6;
const FCF_DISCOVER_MASK: u16 = 0x0003;
const FCF_MULTICAST: u16 = 1 << 8;
const FCF_SECURITY: u16 = 1 << 9;
const FCF_SOURCE_ROUTE: u16 = 1 << 10;
const FCF_DEST_IEEE: u16 = 1 << 11;
const FCF_SRC_IEEE: u16 = 1 << 12;

/// Zero-copy reader over a byte slice.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let b = *self.buf.get(self.pos).ok_or(DecodeError::UnexpectedEof)?;
        self.pos += 1;
        Ok(b)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::UnexpectedEof);
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub fn read_u16_le(&mut self) -> Result<u16, DecodeError> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u64_le(&mut self) -> Result<u64, DecodeError> {
        let b = self.read_bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }
}

/// Growable byte writer.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_u16_le(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u64_le(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameType {
    Data,
    Command,
}

/// Decoded frame-control field. The IEEE-present bits are derived from the
/// header's optional addresses and are not stored here.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameControl {
    pub frame_type: FrameType,
    pub protocol_version: u8,
    pub discover_route: DiscoverRoute,
}

impl FrameControl {
    pub fn data(discover_route: DiscoverRoute) -> Self {
        Self {
            frame_type: FrameType::Data,
            protocol_version: NWK_PROTOCOL_VERSION,
            discover_route,
        }
    }

    pub fn command() -> Self {
        Self {
            frame_type: FrameType::Command,
            protocol_version: NWK_PROTOCOL_VERSION,
            discover_route: DiscoverRoute::Suppress,
        }
    }
}

/// Network-layer frame header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NwkHeader {
    pub fcf: FrameControl,
    pub dest_addr: ShortAddr,
    pub src_addr: ShortAddr,
    pub radius: u8,
    pub seq: u8,
    pub dest_ext: Option<ExtAddr>,
    pub src_ext: Option<ExtAddr>,
}

impl NwkHeader {
    /// Encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        NWK_HEADER_MIN_LEN
            + if self.dest_ext.is_some() { 8 } else { 0 }
            + if self.src_ext.is_some() { 8 } else { 0 }
    }

    fn fcf_bits(&self) -> u16 {
        let frame_type = match self.fcf.frame_type {
            FrameType::Data => 0,
            FrameType::Command => 1,
        };
        let discover = match self.fcf.discover_route {
            DiscoverRoute::Suppress => 0,
            DiscoverRoute::Enable => 1,
        };
        let mut bits = frame_type
            | (u16::from(self.fcf.protocol_version) & FCF_VERSION_MASK) << FCF_VERSION_SHIFT
            | discover << FCF_DISCOVER_SHIFT;
        if self.dest_ext.is_some() {
            bits |= FCF_DEST_IEEE;
        }
        if self.src_ext.is_some() {
            bits |= FCF_SRC_IEEE;
        }
        bits
    }

    pub fn encode(&self, w: &mut Writer) {
        w.write_u16_le(self.fcf_bits());
        w.write_u16_le(self.dest_addr);
        w.write_u16_le(self.src_addr);
        w.write_u8(self.radius);
        w.write_u8(self.seq);
        if let Some(ext) = self.dest_ext {
            w.write_u64_le(ext);
        }
        if let Some(ext) = self.src_ext {
            w.write_u64_le(ext);
        }
    }

    pub fn encode_to_vec(&self) -> Vec<u8> {
        let mut w = Writer::new();
        self.encode(&mut w);
        w.finish()
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let bits = r.read_u16_le()?;
        let frame_type = match (bits & FCF_FRAME_TYPE_MASK) as u8 {
            0 => FrameType::Data,
            1 => FrameType::Command,
            other => return Err(DecodeError::InvalidFrameType(other)),
        };
        let version = ((bits >> FCF_VERSION_SHIFT) & FCF_VERSION_MASK) as u8;
        if version != NWK_PROTOCOL_VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }
        if bits & (FCF_MULTICAST | FCF_SECURITY | FCF_SOURCE_ROUTE) != 0 {
            return Err(DecodeError::UnsupportedFeature);
        }
        // Values 2 and 3 (force discovery) are treated as enable.
        let discover_route = if (bits >> FCF_DISCOVER_SHIFT) & FCF_DISCOVER_MASK == 0 {
            DiscoverRoute::Suppress
        } else {
            DiscoverRoute::Enable
        };

        let dest_addr = r.read_u16_le()?;
        let src_addr = r.read_u16_le()?;
        let radius = r.read_u8()?;
        let seq = r.read_u8()?;
        let dest_ext = if bits & FCF_DEST_IEEE != 0 {
            Some(r.read_u64_le()?)
        } else {
            None
        };
        let src_ext = if bits & FCF_SRC_IEEE != 0 {
            Some(r.read_u64_le()?)
        } else {
            None
        };

        Ok(Self {
            fcf: FrameControl {
                frame_type,
                protocol_version: version,
                discover_route,
            },
            dest_addr,
            src_addr,
            radius,
            seq,
            dest_ext,
            src_ext,
        })
    }

    /// Decode the header at the front of `frame` and advance the frame past it.
    pub fn strip_from(frame: &mut FrameBuf) -> Result<Self, DecodeError> {
        let mut r = Reader::new(frame.payload());
        let header = Self::decode(&mut r)?;
        let len = r.position();
        frame.consume(len)?;
        Ok(header)
    }

    /// Write the encoded header in front of the frame's current contents.
    pub fn prepend_to(&self, frame: &mut FrameBuf) {
        let mut w = Writer::new();
        self.encode(&mut w);
        frame.prepend(w.as_slice());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> NwkHeader {
        NwkHeader {
            fcf: FrameControl::data(DiscoverRoute::Enable),
            dest_addr: 0x1234,
            src_addr: 0x0001,
            radius: 10,
            seq: 7,
            dest_ext: None,
            src_ext: None,
        }
    }

    #[test]
    fn test_header_layout_is_little_endian() {
        let bytes = header().encode_to_vec();
        // data, version 2, discover enable: 0b01_0010_00 = 0x48
        assert_eq!(bytes, vec![0x48, 0x00, 0x34, 0x12, 0x01, 0x00, 10, 7]);
    }

    #[test]
    fn test_ieee_addresses_set_flags() {
        let mut h = header();
        h.src_ext = Some(0x0011_2233_4455_6677);
        let bytes = h.encode_to_vec();
        assert_eq!(bytes.len(), 16);
        assert_eq!(h.encoded_len(), 16);
        assert_eq!(bytes[1] & 0x10, 0x10);
        assert_eq!(bytes[1] & 0x08, 0);

        let decoded = NwkHeader::decode(&mut Reader::new(&bytes)).unwrap();
        assert_eq!(decoded, h);
    }

    #[test]
    fn test_strip_leaves_payload() {
        let mut frame = FrameBuf::from_payload(b"hello");
        header().prepend_to(&mut frame);
        assert_eq!(frame.len(), 13);

        let decoded = NwkHeader::strip_from(&mut frame).unwrap();
        assert_eq!(decoded, header());
        assert_eq!(frame.payload(), b"hello");
    }

    #[test]
    fn test_rejects_unsupported_features() {
        let mut bytes = header().encode_to_vec();
        bytes[1] |= 0x02; // security
        assert_eq!(
            NwkHeader::decode(&mut Reader::new(&bytes)),
            Err(DecodeError::UnsupportedFeature)
        );
    }

    #[test]
    fn test_rejects_wrong_version() {
        let mut bytes = header().encode_to_vec();
        bytes[0] = 0x04 | 0x40; // version 1
        assert_eq!(
            NwkHeader::decode(&mut Reader::new(&bytes)),
            Err(DecodeError::UnsupportedVersion(1))
        );
    }

    #[test]
    fn test_rejects_reserved_frame_type() {
        let mut bytes = header().encode_to_vec();
        bytes[0] = (bytes[0] & !0x03) | 0x03;
        assert_eq!(
            NwkHeader::decode(&mut Reader::new(&bytes)),
            Err(DecodeError::InvalidFrameType(3))
        );
    }

    #[test]
    fn test_truncated_header() {
        let bytes = header().encode_to_vec();
        assert_eq!(
            NwkHeader::decode(&mut Reader::new(&bytes[..5])),
            Err(DecodeError::UnexpectedEof)
        );
        let mut frame = FrameBuf::from_vec(bytes[..7].to_vec());
        assert!(NwkHeader::strip_from(&mut frame).is_err());
        assert_eq!(frame.len(), 7);
    }

    #[test]
    fn test_command_frame_type() {
        let mut h = header();
        h.fcf = FrameControl::command();
        let bytes = h.encode_to_vec();
        assert_eq!(bytes[0] & 0x03, 1);
        let decoded = NwkHeader::decode(&mut Reader::new(&bytes)).unwrap();
        assert_eq!(decoded.fcf.frame_type, FrameType::Command);
    }
}
