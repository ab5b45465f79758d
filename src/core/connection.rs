//! Per-connection framing state machine.
//!
//! Pure buffer logic, no socket I/O: the server feeds received bytes in
//! with `ingest`, pulls complete frames out with `next_frame`, and
//! queues encoded responses for draining on write readiness. Bytes
//! beyond a completed frame stay in the read buffer and are reconsidered
//! immediately, so pipelined frames are separated correctly.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};

use crate::core::config::MAX_FRAME_PAYLOAD;
use crate::core::protocol::codec::{self, FrameHeader, HEADER_LEN};
use crate::core::protocol::{MessageType, ProtocolError};

/// Framing progress of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accumulating the 20 header bytes.
    ReadingHeader,
    /// Header validated; accumulating the declared payload.
    ReadingBody,
    /// Outbound bytes queued and not yet drained.
    WritingResponse,
}

/// Buffers and framing progress for one accepted socket.
#[derive(Debug)]
pub struct Connection {
    pub peer_addr: SocketAddr,
    read_buf: BytesMut,
    write_buf: BytesMut,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub last_activity: Instant,
    /// Payload size of the frame in progress; meaningful only while
    /// reading a body.
    expected_payload: Option<usize>,
}

impl Connection {
    pub fn new(peer_addr: SocketAddr) -> Self {
        Self {
            peer_addr,
            read_buf: BytesMut::with_capacity(8 * 1024),
            write_buf: BytesMut::new(),
            bytes_read: 0,
            bytes_written: 0,
            last_activity: Instant::now(),
            expected_payload: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        if !self.write_buf.is_empty() {
            ConnectionState::WritingResponse
        } else if self.expected_payload.is_some() {
            ConnectionState::ReadingBody
        } else {
            ConnectionState::ReadingHeader
        }
    }

    /// Append bytes received from the socket.
    pub fn ingest(&mut self, data: &[u8]) {
        self.read_buf.extend_from_slice(data);
        self.bytes_read += data.len() as u64;
        self.last_activity = Instant::now();
    }

    /// Advance the state machine and return the next complete frame, if
    /// any. `Ok(None)` means more bytes are needed. Any error is fatal
    /// for the connection; `ProtocolError::UnknownType` additionally
    /// warrants a typed error reply before closing.
    pub fn next_frame(&mut self) -> Result<Option<(MessageType, Vec<u8>)>, ProtocolError> {
        loop {
            match self.expected_payload {
                None => {
                    if self.read_buf.len() < HEADER_LEN {
                        return Ok(None);
                    }
                    let header = FrameHeader::parse(&self.read_buf[..HEADER_LEN])?;
                    if header.payload_size as usize > MAX_FRAME_PAYLOAD {
                        return Err(ProtocolError::PayloadTooLarge);
                    }
                    self.expected_payload = Some(header.payload_size as usize);
                }
                Some(payload_size) => {
                    let frame_len = HEADER_LEN + payload_size;
                    if self.read_buf.len() < frame_len {
                        return Ok(None);
                    }
                    let frame = self.read_buf.split_to(frame_len);
                    self.expected_payload = None;
                    let (msg_type, payload) = codec::decode(&frame)?;
                    return Ok(Some((msg_type, payload.to_vec())));
                }
            }
        }
    }

    /// Queue an encoded frame for sending.
    pub fn queue_response(&mut self, frame: &[u8]) {
        self.write_buf.extend_from_slice(frame);
    }

    pub fn has_pending_write(&self) -> bool {
        !self.write_buf.is_empty()
    }

    pub fn pending_write(&self) -> &[u8] {
        &self.write_buf
    }

    /// Mark `n` queued bytes as written to the socket.
    pub fn advance_write(&mut self, n: usize) {
        self.write_buf.advance(n);
        self.bytes_written += n as u64;
        self.last_activity = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }
}
