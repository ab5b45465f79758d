//! Wire protocol: framing, typed messages, integrity checking.
//!
//! Every message on the wire is a fixed 20-byte header followed by a
//! payload. The header carries a magic number, protocol version, message
//! type tag, payload length, and a CRC-32 of the payload, so the codec
//! can reject garbage, truncation, and foreign traffic on the same port
//! before any of it reaches a handler.

pub mod codec;
pub mod messages;

pub use messages::Message;

/// Message type tags as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    PeerListRequest = 1,
    PeerListResponse = 2,
    FileListRequest = 3,
    FileListResponse = 4,
    FileRequest = 5,
    FileChunk = 6,
    FileComplete = 7,
    ErrorMessage = 8,
    Ping = 9,
    Pong = 10,
}

impl MessageType {
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::PeerListRequest),
            2 => Some(Self::PeerListResponse),
            3 => Some(Self::FileListRequest),
            4 => Some(Self::FileListResponse),
            5 => Some(Self::FileRequest),
            6 => Some(Self::FileChunk),
            7 => Some(Self::FileComplete),
            8 => Some(Self::ErrorMessage),
            9 => Some(Self::Ping),
            10 => Some(Self::Pong),
            _ => None,
        }
    }
}

/// Error codes carried by ERROR_MESSAGE frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    Success = 0,
    FileNotFound = 1,
    PermissionDenied = 2,
    NetworkError = 3,
    ProtocolError = 4,
}

impl ErrorCode {
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Success),
            1 => Some(Self::FileNotFound),
            2 => Some(Self::PermissionDenied),
            3 => Some(Self::NetworkError),
            4 => Some(Self::ProtocolError),
            _ => None,
        }
    }
}

/// Everything that can go wrong while framing or decoding wire data.
/// All variants map to `ErrorCode::ProtocolError` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame shorter than header")]
    Truncated,
    #[error("bad magic 0x{0:08x}")]
    BadMagic(u32),
    #[error("unsupported protocol version {0}")]
    BadVersion(u32),
    #[error("frame length does not match declared payload size")]
    LengthMismatch,
    #[error("payload checksum mismatch")]
    ChecksumMismatch,
    #[error("payload exceeds {} byte frame limit", crate::core::config::MAX_FRAME_PAYLOAD)]
    PayloadTooLarge,
    #[error("unknown message type {0}")]
    UnknownType(u8),
    #[error("malformed payload")]
    MalformedPayload,
    #[error("invalid peer record")]
    InvalidPeerRecord,
}
