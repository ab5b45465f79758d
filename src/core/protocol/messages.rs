//! Typed wire messages and their payload encodings.

use crate::core::index::FileInfo;
use crate::core::protocol::codec::{self, PayloadReader, PayloadWriter};
use crate::core::protocol::{ErrorCode, MessageType, ProtocolError};

/// All wire message types. Framing is the validated 20-byte header (see
/// the codec module); payload integers are network byte order.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Ask a node for every peer it knows.
    PeerListRequest,
    /// Serialized peer records, one wire string each.
    PeerListResponse { peers: Vec<String> },
    /// Ask for a file list. Empty `peer_id` means the local index of the
    /// answering node.
    FileListRequest { peer_id: String },
    FileListResponse { files: Vec<FileInfo> },
    /// Request file bytes. `length == 0` means rest of file.
    FileRequest {
        filename: String,
        offset: u32,
        length: u32,
    },
    /// One slice of file data at `offset`.
    FileChunk { offset: u32, data: Vec<u8> },
    /// End of a successful file transfer.
    FileComplete,
    ErrorMessage { code: ErrorCode, message: String },
    Ping,
    Pong,
}

impl Message {
    pub fn msg_type(&self) -> MessageType {
        match self {
            Message::PeerListRequest => MessageType::PeerListRequest,
            Message::PeerListResponse { .. } => MessageType::PeerListResponse,
            Message::FileListRequest { .. } => MessageType::FileListRequest,
            Message::FileListResponse { .. } => MessageType::FileListResponse,
            Message::FileRequest { .. } => MessageType::FileRequest,
            Message::FileChunk { .. } => MessageType::FileChunk,
            Message::FileComplete => MessageType::FileComplete,
            Message::ErrorMessage { .. } => MessageType::ErrorMessage,
            Message::Ping => MessageType::Ping,
            Message::Pong => MessageType::Pong,
        }
    }

    /// Encode the payload portion of this message.
    pub fn encode_payload(&self) -> Vec<u8> {
        let mut w = PayloadWriter::new();
        match self {
            Message::PeerListRequest
            | Message::FileComplete
            | Message::Ping
            | Message::Pong => {}
            Message::PeerListResponse { peers } => {
                w.put_u32(peers.len() as u32);
                for peer in peers {
                    w.put_string(peer);
                }
            }
            Message::FileListRequest { peer_id } => {
                w.put_string(peer_id);
            }
            Message::FileListResponse { files } => {
                w.put_u32(files.len() as u32);
                for file in files {
                    w.put_string(&file.filename);
                    w.put_u32(file.size.min(u32::MAX as u64) as u32);
                    w.put_string(&file.hash);
                    w.put_u32(file.last_modified.min(u32::MAX as u64) as u32);
                }
            }
            Message::FileRequest {
                filename,
                offset,
                length,
            } => {
                w.put_string(filename);
                w.put_u32(*offset);
                w.put_u32(*length);
            }
            Message::FileChunk { offset, data } => {
                w.put_u32(*offset);
                w.put_u32(data.len() as u32);
                w.put_bytes(data);
            }
            Message::ErrorMessage { code, message } => {
                w.put_u8(*code as u8);
                w.put_string(message);
            }
        }
        w.into_bytes()
    }

    /// Frame this message for the wire.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        codec::encode(self.msg_type(), &self.encode_payload())
    }

    /// Decode a complete frame into a typed message.
    pub fn decode(frame: &[u8]) -> Result<Message, ProtocolError> {
        let (msg_type, payload) = codec::decode(frame)?;
        Message::from_parts(msg_type, payload)
    }

    /// Build a typed message from an already-validated frame.
    pub fn from_parts(msg_type: MessageType, payload: &[u8]) -> Result<Message, ProtocolError> {
        let mut r = PayloadReader::new(payload);
        let message = match msg_type {
            MessageType::PeerListRequest => Message::PeerListRequest,
            MessageType::FileComplete => Message::FileComplete,
            MessageType::Ping => Message::Ping,
            MessageType::Pong => Message::Pong,
            MessageType::PeerListResponse => {
                let count = r.get_u32()?;
                let mut peers = Vec::with_capacity(count.min(1024) as usize);
                for _ in 0..count {
                    peers.push(r.get_string()?);
                }
                Message::PeerListResponse { peers }
            }
            MessageType::FileListRequest => Message::FileListRequest {
                peer_id: r.get_string()?,
            },
            MessageType::FileListResponse => {
                let count = r.get_u32()?;
                let mut files = Vec::with_capacity(count.min(1024) as usize);
                for _ in 0..count {
                    let filename = r.get_string()?;
                    let size = r.get_u32()? as u64;
                    let hash = r.get_string()?;
                    let last_modified = r.get_u32()? as u64;
                    files.push(FileInfo::remote(filename, size, hash, last_modified));
                }
                Message::FileListResponse { files }
            }
            MessageType::FileRequest => Message::FileRequest {
                filename: r.get_string()?,
                offset: r.get_u32()?,
                length: r.get_u32()?,
            },
            MessageType::FileChunk => {
                let offset = r.get_u32()?;
                let size = r.get_u32()? as usize;
                let data = r.get_bytes(size)?.to_vec();
                Message::FileChunk { offset, data }
            }
            MessageType::ErrorMessage => {
                let code =
                    ErrorCode::from_u8(r.get_u8()?).ok_or(ProtocolError::MalformedPayload)?;
                let message = r.get_string()?;
                Message::ErrorMessage { code, message }
            }
        };
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: Message) -> Message {
        let frame = msg.to_bytes().unwrap();
        Message::decode(&frame).unwrap()
    }

    #[test]
    fn empty_payload_messages() {
        for msg in [
            Message::PeerListRequest,
            Message::FileComplete,
            Message::Ping,
            Message::Pong,
        ] {
            assert!(msg.encode_payload().is_empty());
            assert_eq!(roundtrip(msg.clone()), msg);
        }
    }

    #[test]
    fn peer_list_response_roundtrip() {
        let msg = Message::PeerListResponse {
            peers: vec![
                "node-a|10.0.0.1|8888|1|0".into(),
                "node-b|10.0.0.2|8889|0|0".into(),
            ],
        };
        assert_eq!(roundtrip(msg.clone()), msg);
    }

    #[test]
    fn file_list_roundtrip() {
        let msg = Message::FileListResponse {
            files: vec![FileInfo::remote(
                "a.txt".into(),
                13,
                "853ff937".into(),
                1_700_000_000,
            )],
        };
        assert_eq!(roundtrip(msg.clone()), msg);
    }

    #[test]
    fn file_request_roundtrip() {
        let msg = Message::FileRequest {
            filename: "blob.bin".into(),
            offset: 4096,
            length: 0,
        };
        assert_eq!(roundtrip(msg.clone()), msg);
    }

    #[test]
    fn file_chunk_roundtrip() {
        let msg = Message::FileChunk {
            offset: 8192,
            data: (0..255).collect(),
        };
        assert_eq!(roundtrip(msg.clone()), msg);
    }

    #[test]
    fn error_message_roundtrip() {
        let msg = Message::ErrorMessage {
            code: ErrorCode::FileNotFound,
            message: "no such file: ghost.txt".into(),
        };
        assert_eq!(roundtrip(msg.clone()), msg);
    }

    #[test]
    fn chunk_size_larger_than_data_is_malformed() {
        let mut w = PayloadWriter::new();
        w.put_u32(0);
        w.put_u32(100);
        w.put_bytes(&[1, 2, 3]);
        let frame = codec::encode(MessageType::FileChunk, &w.into_bytes()).unwrap();
        assert_eq!(Message::decode(&frame), Err(ProtocolError::MalformedPayload));
    }

    #[test]
    fn unknown_error_code_is_malformed() {
        let mut w = PayloadWriter::new();
        w.put_u8(99);
        w.put_string("bogus");
        let frame = codec::encode(MessageType::ErrorMessage, &w.into_bytes()).unwrap();
        assert_eq!(Message::decode(&frame), Err(ProtocolError::MalformedPayload));
    }
}
