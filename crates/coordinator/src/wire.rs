//! Length-prefixed packet framing and field readers.
//!
//! Every coordinator packet is `u16le size · u8 type · payload`, where `size`
//! counts the whole packet including the 3-byte header. The codec operates on
//! byte buffers only; it never owns the transport.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Bytes of framing before the payload.
pub const PACKET_HEADER_SIZE: usize = 3;

/// Largest packet the framing can express.
pub const MAX_PACKET_SIZE: usize = u16::MAX as usize;

/// Packet types exchanged with the coordinator.
///
/// `Client*` packets are outgoing, `Gc*` packets incoming. New types are
/// added here; the decoders match on this enum in exactly one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    GcError = 0,
    ClientListing = 4,
    GcListing = 5,
    ClientConnect = 6,
    GcConnecting = 7,
    GcConnectFailed = 9,
    GcDirectConnect = 11,
    GcStunRequest = 12,
    GcNewGrfLookup = 15,
    GcTurnConnect = 16,
}

impl PacketType {
    /// Map a wire byte to a known packet type. Unknown types return `None`
    /// and are skipped by their framed length.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::GcError),
            4 => Some(Self::ClientListing),
            5 => Some(Self::GcListing),
            6 => Some(Self::ClientConnect),
            7 => Some(Self::GcConnecting),
            9 => Some(Self::GcConnectFailed),
            11 => Some(Self::GcDirectConnect),
            12 => Some(Self::GcStunRequest),
            15 => Some(Self::GcNewGrfLookup),
            16 => Some(Self::GcTurnConnect),
            _ => None,
        }
    }
}

/// One fully-framed packet.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Raw type byte; unknown values are preserved so callers can log them.
    pub packet_type: u8,
    /// Payload without the header.
    pub payload: Bytes,
}

/// Pop one framed packet off the front of `buf`.
///
/// Returns `Ok(None)` while the buffer holds only a partial packet; the
/// partial bytes stay in place until more data arrives. A size below the
/// header length poisons the stream.
pub fn decode_frame(buf: &mut BytesMut) -> Result<Option<Frame>> {
    if buf.len() < PACKET_HEADER_SIZE {
        return Ok(None);
    }
    let size = u16::from_le_bytes([buf[0], buf[1]]) as usize;
    if size < PACKET_HEADER_SIZE {
        return Err(Error::FrameTooShort(size));
    }
    if size > MAX_PACKET_SIZE {
        return Err(Error::FrameTooLarge(size));
    }
    if buf.len() < size {
        return Ok(None);
    }
    let mut frame = buf.split_to(size);
    frame.advance(2);
    let packet_type = frame.get_u8();
    Ok(Some(Frame {
        packet_type,
        payload: frame.freeze(),
    }))
}

/// Builder for outgoing packets.
///
/// Collects payload fields and prepends the size/type header on `finish`.
#[derive(Debug)]
pub struct PacketBuilder {
    packet_type: PacketType,
    payload: Vec<u8>,
}

impl PacketBuilder {
    pub fn new(packet_type: PacketType) -> Self {
        Self {
            packet_type,
            payload: Vec::new(),
        }
    }

    pub fn write_u8(mut self, value: u8) -> Self {
        self.payload.put_u8(value);
        self
    }

    pub fn write_u16_le(mut self, value: u16) -> Self {
        self.payload.put_u16_le(value);
        self
    }

    pub fn write_i32_le(mut self, value: i32) -> Self {
        self.payload.put_i32_le(value);
        self
    }

    pub fn write_u32_le(mut self, value: u32) -> Self {
        self.payload.put_u32_le(value);
        self
    }

    pub fn write_u64_le(mut self, value: u64) -> Self {
        self.payload.put_u64_le(value);
        self
    }

    /// Append a NUL-terminated UTF-8 string.
    pub fn write_zstring(mut self, value: &str) -> Self {
        self.payload.put_slice(value.as_bytes());
        self.payload.put_u8(0);
        self
    }

    pub fn write_bytes(mut self, value: &[u8]) -> Self {
        self.payload.put_slice(value);
        self
    }

    /// Produce the framed packet.
    pub fn finish(self) -> Result<Vec<u8>> {
        let total = self.payload.len() + PACKET_HEADER_SIZE;
        if total > MAX_PACKET_SIZE {
            return Err(Error::PayloadTooLarge(self.payload.len()));
        }
        let mut out = Vec::with_capacity(total);
        out.put_u16_le(total as u16);
        out.put_u8(self.packet_type as u8);
        out.put_slice(&self.payload);
        Ok(out)
    }
}

/// Bounds-checked cursor over one packet payload.
#[derive(Debug)]
pub struct PayloadReader<'a> {
    payload: &'a [u8],
    offset: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(payload: &'a [u8]) -> Self {
        Self { payload, offset: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.payload.len() - self.offset
    }

    fn take(&mut self, wanted: usize) -> Result<&'a [u8]> {
        if self.remaining() < wanted {
            return Err(Error::Truncated {
                wanted,
                remaining: self.remaining(),
            });
        }
        let slice = &self.payload[self.offset..self.offset + wanted];
        self.offset += wanted;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_i32_le(&mut self) -> Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64_le(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    /// Read a fixed-size byte array, e.g. an md5 digest.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let b = self.take(N)?;
        let mut raw = [0u8; N];
        raw.copy_from_slice(b);
        Ok(raw)
    }

    /// Read bytes up to the next NUL, consuming the terminator.
    pub fn read_zstring(&mut self) -> Result<String> {
        let rest = &self.payload[self.offset..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(Error::MissingTerminator)?;
        let s = std::str::from_utf8(&rest[..nul])?;
        self.offset += nul + 1;
        Ok(s.to_owned())
    }
}
