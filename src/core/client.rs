//! Outbound client: short-lived connections to remote peers.
//!
//! One connection per peer interaction. Every socket operation is
//! bounded by the client I/O timeout; failures map to `NETWORK_ERROR`.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::core::config::{CLIENT_IO_TIMEOUT, MAX_FRAME_PAYLOAD, SPEED_UPDATE_INTERVAL};
use crate::core::downloads::DownloadProgress;
use crate::core::error::NodeError;
use crate::core::index::FileInfo;
use crate::core::protocol::codec::{FrameHeader, HEADER_LEN};
use crate::core::protocol::{Message, ProtocolError};
use crate::core::registry::Peer;

/// A single outbound connection to a peer.
pub struct Client {
    stream: TcpStream,
}

impl Client {
    /// Connect to `host:port` under the client timeout.
    pub async fn connect(host: &str, port: u16) -> Result<Self, NodeError> {
        let addr = format!("{host}:{port}");
        let stream = timeout(CLIENT_IO_TIMEOUT, TcpStream::connect(addr.as_str()))
            .await
            .map_err(|_| NodeError::Network(format!("connect to {addr} timed out")))?
            .map_err(|e| NodeError::Network(format!("connect to {addr} failed: {e}")))?;
        stream
            .set_nodelay(true)
            .map_err(|e| NodeError::Network(e.to_string()))?;
        Ok(Self { stream })
    }

    async fn send(&mut self, message: &Message) -> Result<(), NodeError> {
        let frame = message.to_bytes()?;
        timeout(CLIENT_IO_TIMEOUT, self.stream.write_all(&frame))
            .await
            .map_err(|_| NodeError::Network("send timed out".into()))?
            .map_err(|e| NodeError::Network(format!("send failed: {e}")))?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Message, NodeError> {
        let mut frame = vec![0u8; HEADER_LEN];
        timeout(CLIENT_IO_TIMEOUT, self.stream.read_exact(&mut frame))
            .await
            .map_err(|_| NodeError::Network("receive timed out".into()))?
            .map_err(|e| NodeError::Network(format!("receive failed: {e}")))?;

        let header = FrameHeader::parse(&frame)?;
        if header.payload_size as usize > MAX_FRAME_PAYLOAD {
            return Err(ProtocolError::PayloadTooLarge.into());
        }
        frame.resize(HEADER_LEN + header.payload_size as usize, 0);
        if header.payload_size > 0 {
            timeout(
                CLIENT_IO_TIMEOUT,
                self.stream.read_exact(&mut frame[HEADER_LEN..]),
            )
            .await
            .map_err(|_| NodeError::Network("receive timed out".into()))?
            .map_err(|e| NodeError::Network(format!("receive failed: {e}")))?;
        }
        Ok(Message::decode(&frame)?)
    }

    /// PEER_LIST_REQUEST round trip. Records that fail to parse are
    /// logged and skipped.
    pub async fn request_peer_list(&mut self) -> Result<Vec<Peer>, NodeError> {
        self.send(&Message::PeerListRequest).await?;
        match self.recv().await? {
            Message::PeerListResponse { peers } => {
                let mut parsed = Vec::with_capacity(peers.len());
                for record in &peers {
                    match Peer::deserialize(record) {
                        Ok(peer) => parsed.push(peer),
                        Err(e) => {
                            warn!(
                                event = "peer_record_invalid",
                                error = %e,
                                "Skipping unparseable peer record"
                            );
                        }
                    }
                }
                Ok(parsed)
            }
            Message::ErrorMessage { code, message } => Err(NodeError::Remote { code, message }),
            other => Err(NodeError::Network(format!(
                "unexpected reply to peer list request: {:?}",
                other.msg_type()
            ))),
        }
    }

    /// FILE_LIST_REQUEST round trip. Empty `peer_id` asks for the remote
    /// node's own index.
    pub async fn request_file_list(&mut self, peer_id: &str) -> Result<Vec<FileInfo>, NodeError> {
        self.send(&Message::FileListRequest {
            peer_id: peer_id.to_string(),
        })
        .await?;
        match self.recv().await? {
            Message::FileListResponse { files } => Ok(files),
            Message::ErrorMessage { code, message } => Err(NodeError::Remote { code, message }),
            other => Err(NodeError::Network(format!(
                "unexpected reply to file list request: {:?}",
                other.msg_type()
            ))),
        }
    }

    /// Liveness round trip: PING, expect PONG.
    pub async fn ping(&mut self) -> Result<(), NodeError> {
        self.send(&Message::Ping).await?;
        match self.recv().await? {
            Message::Pong => Ok(()),
            other => Err(NodeError::Network(format!(
                "unexpected reply to ping: {:?}",
                other.msg_type()
            ))),
        }
    }

    /// Stream `filename` from the connected peer into `destination`,
    /// reporting through `progress`. Exactly one terminal transition is
    /// recorded on `progress` before returning.
    pub async fn download(
        mut self,
        filename: &str,
        destination: &Path,
        progress: Arc<DownloadProgress>,
    ) -> Result<(), NodeError> {
        let result = self
            .download_inner(filename, destination, progress.clone())
            .await;
        match &result {
            Ok(()) => {
                progress.complete();
            }
            Err(e) => {
                if progress.cancel_token().cancelled() {
                    progress.fail("cancelled");
                } else {
                    progress.fail(e.to_string());
                }
            }
        }
        result
    }

    async fn download_inner(
        &mut self,
        filename: &str,
        destination: &Path,
        progress: Arc<DownloadProgress>,
    ) -> Result<(), NodeError> {
        self.send(&Message::FileRequest {
            filename: filename.to_string(),
            offset: 0,
            length: 0,
        })
        .await?;

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| NodeError::Network(format!("cannot create {parent:?}: {e}")))?;
        }
        let mut output = fs::File::create(destination)
            .await
            .map_err(|e| NodeError::Network(format!("cannot create {destination:?}: {e}")))?;

        let cancel = progress.cancel_token().clone();
        let mut last_speed_update = Instant::now();

        loop {
            let message = tokio::select! {
                _ = cancel.wait() => {
                    return Err(NodeError::Network("cancelled".into()));
                }
                received = self.recv() => received?,
            };

            match message {
                Message::FileChunk { data, .. } => {
                    output
                        .write_all(&data)
                        .await
                        .map_err(|e| NodeError::Network(format!("write failed: {e}")))?;
                    progress.record_bytes(data.len() as u64);

                    if last_speed_update.elapsed() >= SPEED_UPDATE_INTERVAL {
                        let elapsed = progress.start_time().elapsed().as_secs_f64();
                        if elapsed > 0.0 {
                            let mbps =
                                progress.downloaded_size() as f64 / (1024.0 * 1024.0) / elapsed;
                            progress.set_speed(mbps);
                        }
                        last_speed_update = Instant::now();
                    }
                }
                Message::FileComplete => {
                    output
                        .flush()
                        .await
                        .map_err(|e| NodeError::Network(format!("flush failed: {e}")))?;
                    debug!(
                        event = "download_complete",
                        filename,
                        bytes = progress.downloaded_size(),
                        "Download finished"
                    );
                    return Ok(());
                }
                Message::ErrorMessage { code, message } => {
                    return Err(NodeError::Remote { code, message });
                }
                other => {
                    return Err(NodeError::Network(format!(
                        "unexpected message during download: {:?}",
                        other.msg_type()
                    )));
                }
            }
        }
    }
}

/// Connect to a peer and download one file; convenience wrapper used by
/// the multi-source path.
pub async fn download_from(
    host: &str,
    port: u16,
    filename: &str,
    destination: &Path,
    progress: Arc<DownloadProgress>,
) -> Result<(), NodeError> {
    let client = Client::connect(host, port).await.map_err(|e| {
        progress.fail(e.to_string());
        e
    })?;
    client.download(filename, destination, progress).await
}
