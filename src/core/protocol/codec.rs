//! Framing: 20-byte validated header + raw payload.
//!
//! Header layout (little-endian integers):
//!
//! | field        | width | value                                  |
//! |--------------|-------|----------------------------------------|
//! | magic        | 4     | `0x50325032` ("P2P2")                  |
//! | version      | 4     | `1`                                    |
//! | type         | 1     | message-type tag                       |
//! | padding      | 3     | zero                                   |
//! | payload_size | 4     | payload length in bytes                |
//! | checksum     | 4     | CRC-32 (IEEE) of the payload           |
//!
//! Payload integers use network byte order; a wire string is a `u32`
//! length followed by that many UTF-8 bytes, no terminator.

use crate::core::config::MAX_FRAME_PAYLOAD;
use crate::core::protocol::{MessageType, ProtocolError};

/// "P2P2"
pub const MAGIC: u32 = 0x5032_5032;
/// Current protocol version.
pub const VERSION: u32 = 1;
/// Fixed size of the frame header.
pub const HEADER_LEN: usize = 20;

/// Parsed frame header. `msg_type` is kept raw so a frame with an
/// unknown tag can still be consumed and answered with a typed error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub msg_type: u8,
    pub payload_size: u32,
    pub checksum: u32,
}

impl FrameHeader {
    /// Validate magic and version and extract the remaining fields.
    /// The caller is responsible for enforcing the payload size cap.
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < HEADER_LEN {
            return Err(ProtocolError::Truncated);
        }
        let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if magic != MAGIC {
            return Err(ProtocolError::BadMagic(magic));
        }
        let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if version != VERSION {
            return Err(ProtocolError::BadVersion(version));
        }
        let msg_type = bytes[8];
        let payload_size = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
        let checksum = u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
        Ok(Self {
            msg_type,
            payload_size,
            checksum,
        })
    }
}

/// CRC-32 (IEEE, reflected) of a payload. The CRC of an empty payload
/// is 0.
pub fn checksum(payload: &[u8]) -> u32 {
    crc32fast::hash(payload)
}

/// Build a complete frame: header with computed CRC, then the payload.
pub fn encode(msg_type: MessageType, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if payload.len() > MAX_FRAME_PAYLOAD {
        return Err(ProtocolError::PayloadTooLarge);
    }
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&MAGIC.to_le_bytes());
    frame.extend_from_slice(&VERSION.to_le_bytes());
    frame.push(msg_type as u8);
    frame.extend_from_slice(&[0u8; 3]);
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&checksum(payload).to_le_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Decode a complete frame into its type tag and payload.
///
/// Fails when the input is shorter than a header, the magic or version
/// do not match, the total length differs from `HEADER_LEN +
/// payload_size`, the CRC does not verify, or the type tag is unknown.
pub fn decode(frame: &[u8]) -> Result<(MessageType, &[u8]), ProtocolError> {
    let header = FrameHeader::parse(frame)?;
    if header.payload_size as usize > MAX_FRAME_PAYLOAD {
        return Err(ProtocolError::PayloadTooLarge);
    }
    if frame.len() != HEADER_LEN + header.payload_size as usize {
        return Err(ProtocolError::LengthMismatch);
    }
    let payload = &frame[HEADER_LEN..];
    if checksum(payload) != header.checksum {
        return Err(ProtocolError::ChecksumMismatch);
    }
    let msg_type =
        MessageType::from_u8(header.msg_type).ok_or(ProtocolError::UnknownType(header.msg_type))?;
    Ok((msg_type, payload))
}

// ── Payload primitives ───────────────────────────────────────────────────────

/// Append-only payload builder. Integers go out in network byte order.
#[derive(Debug, Default)]
pub struct PayloadWriter {
    buf: Vec<u8>,
}

impl PayloadWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_string(&mut self, value: &str) {
        self.put_u32(value.len() as u32);
        self.buf.extend_from_slice(value.as_bytes());
    }

    pub fn put_bytes(&mut self, value: &[u8]) {
        self.buf.extend_from_slice(value);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over a payload. Every read is bounds-checked; running off the
/// end is a malformed payload.
#[derive(Debug)]
pub struct PayloadReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn get_u8(&mut self) -> Result<u8, ProtocolError> {
        let byte = *self
            .buf
            .get(self.pos)
            .ok_or(ProtocolError::MalformedPayload)?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn get_u32(&mut self) -> Result<u32, ProtocolError> {
        let end = self
            .pos
            .checked_add(4)
            .ok_or(ProtocolError::MalformedPayload)?;
        if end > self.buf.len() {
            return Err(ProtocolError::MalformedPayload);
        }
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.buf[self.pos..end]);
        self.pos = end;
        Ok(u32::from_be_bytes(raw))
    }

    pub fn get_string(&mut self) -> Result<String, ProtocolError> {
        let len = self.get_u32()? as usize;
        let raw = self.get_bytes(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::MalformedPayload)
    }

    pub fn get_bytes(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or(ProtocolError::MalformedPayload)?;
        if end > self.buf.len() {
            return Err(ProtocolError::MalformedPayload);
        }
        let raw = &self.buf[self.pos..end];
        self.pos = end;
        Ok(raw)
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}
