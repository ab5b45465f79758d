//! Event-driven server: acceptor, readiness-driven connection tasks,
//! frame dispatch, and periodic maintenance.
//!
//! One task owns the listener and accepts with a bounded poll so the
//! shutdown flag is observed within 100 ms. Every accepted socket is
//! configured non-blocking with tuned buffers and driven by readiness:
//! read-ready bytes advance the per-connection framing state machine,
//! complete frames are dispatched, and replies drain on write
//! readiness. A maintenance tick sweeps idle connections.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use socket2::{Domain, Protocol as SockProtocol, Socket, Type};
use tokio::io::{AsyncReadExt, AsyncSeekExt, Interest};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::core::config::{
    CHUNK_SIZE, CONNECTION_IDLE_TIMEOUT, LISTEN_BACKLOG, MAINTENANCE_INTERVAL,
    SHUTDOWN_POLL_INTERVAL, SOCKET_BUFFER_SIZE,
};
use crate::core::connection::Connection;
use crate::core::error::NodeError;
use crate::core::index::FileIndex;
use crate::core::protocol::{ErrorCode, Message, MessageType, ProtocolError};
use crate::core::registry::PeerRegistry;
use crate::utils::sos::SignalOfStop;

/// Cross-task view of one live connection, for the maintenance sweep.
struct ConnectionHandle {
    peer_addr: SocketAddr,
    /// Unix seconds of the last observed traffic.
    last_activity: Arc<AtomicU64>,
    stop: SignalOfStop,
}

struct ServerCtx {
    index: Arc<FileIndex>,
    registry: Arc<PeerRegistry>,
    connections: Mutex<HashMap<u64, ConnectionHandle>>,
}

/// The listening node side: owns the acceptor and all connection tasks.
pub struct Server {
    ctx: Arc<ServerCtx>,
    sos: SignalOfStop,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    next_conn_id: AtomicU64,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl Server {
    pub fn new(index: Arc<FileIndex>, registry: Arc<PeerRegistry>) -> Self {
        Self {
            ctx: Arc::new(ServerCtx {
                index,
                registry,
                connections: Mutex::new(HashMap::new()),
            }),
            sos: SignalOfStop::new(),
            tasks: Mutex::new(Vec::new()),
            next_conn_id: AtomicU64::new(1),
            local_addr: Mutex::new(None),
        }
    }

    /// Bind the listen socket and start the accept and maintenance
    /// loops. Returns the bound address. Bind failures abort startup.
    pub async fn start(self: &Arc<Self>, port: u16) -> Result<SocketAddr, NodeError> {
        let listener = bind_listener(port)
            .map_err(|e| NodeError::Network(format!("failed to bind port {port}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| NodeError::Network(e.to_string()))?;
        *self.local_addr.lock().unwrap() = Some(local_addr);

        let accept_server = self.clone();
        let accept_task = tokio::spawn(async move {
            accept_server.accept_loop(listener).await;
        });

        let sweep_server = self.clone();
        let sweep_task = tokio::spawn(async move {
            sweep_server.maintenance_loop().await;
        });

        {
            let mut tasks = self.tasks.lock().unwrap();
            tasks.push(accept_task);
            tasks.push(sweep_task);
        }

        info!(event = "server_started", addr = %local_addr, "Server listening");
        Ok(local_addr)
    }

    /// Cooperative shutdown: cancel every loop and connection, then join
    /// the spawned tasks.
    pub async fn stop(&self) {
        self.sos.cancel();
        {
            let connections = self.ctx.connections.lock().unwrap();
            for handle in connections.values() {
                handle.stop.cancel();
            }
        }
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().unwrap().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        *self.local_addr.lock().unwrap() = None;
        info!(event = "server_stopped", "Server stopped");
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap()
    }

    pub fn connection_count(&self) -> usize {
        self.ctx.connections.lock().unwrap().len()
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            // Bounded poll so the shutdown flag is observed promptly.
            let accepted = match timeout(SHUTDOWN_POLL_INTERVAL, listener.accept()).await {
                Err(_elapsed) => {
                    if self.sos.cancelled() {
                        break;
                    }
                    continue;
                }
                Ok(accepted) => accepted,
            };
            if self.sos.cancelled() {
                break;
            }
            match accepted {
                Ok((stream, peer_addr)) => self.spawn_connection(stream, peer_addr),
                Err(e) => {
                    warn!(event = "accept_failure", error = %e, "Accept failed");
                    tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
                }
            }
        }
        debug!(event = "accept_loop_exit", "Acceptor stopped");
    }

    fn spawn_connection(self: &Arc<Self>, stream: TcpStream, peer_addr: SocketAddr) {
        configure_stream(&stream);

        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let last_activity = Arc::new(AtomicU64::new(now_secs()));
        let stop = SignalOfStop::new();
        self.ctx.connections.lock().unwrap().insert(
            conn_id,
            ConnectionHandle {
                peer_addr,
                last_activity: last_activity.clone(),
                stop: stop.clone(),
            },
        );
        debug!(
            event = "connection_accepted",
            conn_id,
            peer = %peer_addr,
            "New connection"
        );

        let ctx = self.ctx.clone();
        let task = tokio::spawn(async move {
            handle_connection(ctx.clone(), conn_id, stream, peer_addr, stop, last_activity).await;
            ctx.connections.lock().unwrap().remove(&conn_id);
        });
        self.tasks.lock().unwrap().push(task);
    }

    async fn maintenance_loop(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.sos.wait() => break,
                _ = tokio::time::sleep(MAINTENANCE_INTERVAL) => {}
            }
            let now = now_secs();
            let idle_limit = CONNECTION_IDLE_TIMEOUT.as_secs();
            let stale: Vec<(u64, SocketAddr, SignalOfStop)> = {
                let connections = self.ctx.connections.lock().unwrap();
                connections
                    .iter()
                    .filter(|(_, h)| now.saturating_sub(h.last_activity.load(Ordering::Relaxed)) > idle_limit)
                    .map(|(id, h)| (*id, h.peer_addr, h.stop.clone()))
                    .collect()
            };
            for (conn_id, peer, stop) in stale {
                debug!(event = "connection_idle_sweep", conn_id, peer = %peer, "Sweeping idle connection");
                stop.cancel();
            }
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Bind the listen socket with `SO_REUSEADDR`/`SO_REUSEPORT` and a
/// non-blocking disposition.
fn bind_listener(port: u16) -> std::io::Result<TcpListener> {
    let addr: SocketAddr = SocketAddr::from(([0, 0, 0, 0], port));
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(SockProtocol::TCP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    {
        let _ = socket.set_reuse_port(true);
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    TcpListener::from_std(socket.into())
}

/// Per-socket tuning: no Nagle delay, 64 KiB kernel buffers.
fn configure_stream(stream: &TcpStream) {
    let _ = stream.set_nodelay(true);
    let sock = socket2::SockRef::from(stream);
    let _ = sock.set_send_buffer_size(SOCKET_BUFFER_SIZE);
    let _ = sock.set_recv_buffer_size(SOCKET_BUFFER_SIZE);
}

/// Drive one connection: readiness events in, frames dispatched,
/// replies drained. Exits on peer close, protocol violation, error, or
/// sweep/shutdown cancellation.
async fn handle_connection(
    ctx: Arc<ServerCtx>,
    conn_id: u64,
    stream: TcpStream,
    peer_addr: SocketAddr,
    stop: SignalOfStop,
    last_activity: Arc<AtomicU64>,
) {
    let mut conn = Connection::new(peer_addr);
    let mut read_buf = [0u8; CHUNK_SIZE];

    'event: loop {
        let interest = if conn.has_pending_write() {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        let ready = tokio::select! {
            _ = stop.wait() => break 'event,
            ready = stream.ready(interest) => match ready {
                Ok(ready) => ready,
                Err(e) => {
                    debug!(event = "connection_error", conn_id, error = %e, "Readiness failure");
                    break 'event;
                }
            },
        };

        if ready.is_readable() {
            loop {
                match stream.try_read(&mut read_buf) {
                    Ok(0) => break 'event,
                    Ok(n) => {
                        conn.ingest(&read_buf[..n]);
                        last_activity.store(now_secs(), Ordering::Relaxed);
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(e) => {
                        debug!(event = "connection_error", conn_id, error = %e, "Read failure");
                        break 'event;
                    }
                }
            }

            loop {
                match conn.next_frame() {
                    Ok(Some((msg_type, payload))) => {
                        if dispatch(&ctx, &stream, &mut conn, msg_type, &payload)
                            .await
                            .is_err()
                        {
                            break 'event;
                        }
                        last_activity.store(now_secs(), Ordering::Relaxed);
                    }
                    Ok(None) => break,
                    Err(ProtocolError::UnknownType(tag)) => {
                        warn!(
                            event = "unknown_message_type",
                            conn_id,
                            tag,
                            peer = %peer_addr,
                            "Closing connection"
                        );
                        let reply = Message::ErrorMessage {
                            code: ErrorCode::ProtocolError,
                            message: format!("unknown message type {tag}"),
                        };
                        if let Ok(frame) = reply.to_bytes() {
                            conn.queue_response(&frame);
                            let _ = flush_write(&stream, &mut conn).await;
                        }
                        break 'event;
                    }
                    Err(e) => {
                        warn!(
                            event = "frame_error",
                            conn_id,
                            error = %e,
                            peer = %peer_addr,
                            "Closing connection"
                        );
                        break 'event;
                    }
                }
            }
        }

        if ready.is_writable() && conn.has_pending_write() {
            if drain_write(&stream, &mut conn).is_err() {
                break 'event;
            }
            last_activity.store(now_secs(), Ordering::Relaxed);
        }
    }

    debug!(
        event = "connection_closed",
        conn_id,
        peer = %peer_addr,
        bytes_read = conn.bytes_read,
        bytes_written = conn.bytes_written,
        state = ?conn.state(),
        idle = ?conn.idle_for(),
        "Connection closed"
    );
}

/// Handle one complete frame. An `Err` closes the connection.
async fn dispatch(
    ctx: &Arc<ServerCtx>,
    stream: &TcpStream,
    conn: &mut Connection,
    msg_type: MessageType,
    payload: &[u8],
) -> std::io::Result<()> {
    let message = match Message::from_parts(msg_type, payload) {
        Ok(message) => message,
        Err(e) => {
            let reply = Message::ErrorMessage {
                code: ErrorCode::ProtocolError,
                message: e.to_string(),
            };
            queue_message(conn, &reply)?;
            flush_write(stream, conn).await?;
            return Err(std::io::Error::new(ErrorKind::InvalidData, e.to_string()));
        }
    };

    match message {
        Message::PeerListRequest => {
            let reply = Message::PeerListResponse {
                peers: ctx.registry.serialized_peers(),
            };
            queue_message(conn, &reply)?;
            flush_write(stream, conn).await?;
        }
        Message::FileListRequest { peer_id } => {
            let files = if peer_id.is_empty() {
                ctx.index.list()
            } else {
                ctx.registry
                    .get(&peer_id)
                    .map(|p| p.files)
                    .unwrap_or_default()
            };
            queue_message(conn, &Message::FileListResponse { files })?;
            flush_write(stream, conn).await?;
        }
        Message::FileRequest {
            filename,
            offset,
            length,
        } => {
            serve_file(ctx, stream, conn, &filename, offset, length).await?;
        }
        Message::Ping => {
            queue_message(conn, &Message::Pong)?;
            flush_write(stream, conn).await?;
        }
        Message::Pong => {
            ctx.registry.touch_by_ip(&conn.peer_addr.ip().to_string());
        }
        other => {
            // Response-typed frames have no business arriving here.
            debug!(
                event = "unexpected_frame",
                msg_type = ?other.msg_type(),
                peer = %conn.peer_addr,
                "Ignoring response-typed frame"
            );
        }
    }
    Ok(())
}

/// Stream a file as FILE_CHUNK frames, honoring offset and length,
/// terminated by FILE_COMPLETE. On any I/O error an ERROR_MESSAGE is
/// sent instead of FILE_COMPLETE. The write buffer is drained after
/// every chunk so per-connection memory stays bounded.
async fn serve_file(
    ctx: &Arc<ServerCtx>,
    stream: &TcpStream,
    conn: &mut Connection,
    filename: &str,
    offset: u32,
    length: u32,
) -> std::io::Result<()> {
    let info = match ctx.index.info(filename) {
        Some(info) => info,
        None => {
            return send_error(
                stream,
                conn,
                ErrorCode::FileNotFound,
                &format!("no such file: {filename}"),
            )
            .await;
        }
    };

    let mut file = match tokio::fs::File::open(&info.filepath).await {
        Ok(file) => file,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::PermissionDenied => ErrorCode::PermissionDenied,
                _ => ErrorCode::FileNotFound,
            };
            return send_error(stream, conn, code, &format!("cannot open {filename}: {e}")).await;
        }
    };

    let size = match file.metadata().await {
        Ok(meta) => meta.len(),
        Err(_) => info.size,
    };
    let start = (offset as u64).min(size);
    let mut remaining = if length == 0 {
        size - start
    } else {
        (length as u64).min(size - start)
    };

    if let Err(e) = file.seek(std::io::SeekFrom::Start(start)).await {
        return send_error(
            stream,
            conn,
            ErrorCode::FileNotFound,
            &format!("seek failed on {filename}: {e}"),
        )
        .await;
    }

    let mut pos = start;
    let mut buf = vec![0u8; CHUNK_SIZE];
    while remaining > 0 {
        let want = remaining.min(CHUNK_SIZE as u64) as usize;
        let n = match file.read(&mut buf[..want]).await {
            Ok(n) => n,
            Err(e) => {
                return send_error(
                    stream,
                    conn,
                    ErrorCode::FileNotFound,
                    &format!("read failed on {filename}: {e}"),
                )
                .await;
            }
        };
        if n == 0 {
            break;
        }
        let chunk = Message::FileChunk {
            offset: pos as u32,
            data: buf[..n].to_vec(),
        };
        queue_message(conn, &chunk)?;
        flush_write(stream, conn).await?;
        pos += n as u64;
        remaining -= n as u64;
    }

    queue_message(conn, &Message::FileComplete)?;
    flush_write(stream, conn).await?;
    debug!(
        event = "file_served",
        filename,
        bytes = pos - start,
        peer = %conn.peer_addr,
        "File transfer finished"
    );
    Ok(())
}

async fn send_error(
    stream: &TcpStream,
    conn: &mut Connection,
    code: ErrorCode,
    message: &str,
) -> std::io::Result<()> {
    let reply = Message::ErrorMessage {
        code,
        message: message.to_string(),
    };
    queue_message(conn, &reply)?;
    flush_write(stream, conn).await
}

fn queue_message(conn: &mut Connection, message: &Message) -> std::io::Result<()> {
    let frame = message
        .to_bytes()
        .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e.to_string()))?;
    conn.queue_response(&frame);
    Ok(())
}

/// Drain as much of the write buffer as the socket accepts right now.
fn drain_write(stream: &TcpStream, conn: &mut Connection) -> std::io::Result<()> {
    while conn.has_pending_write() {
        match stream.try_write(conn.pending_write()) {
            Ok(0) => return Err(ErrorKind::WriteZero.into()),
            Ok(n) => conn.advance_write(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Drain the write buffer completely, waiting on write readiness as
/// needed.
async fn flush_write(stream: &TcpStream, conn: &mut Connection) -> std::io::Result<()> {
    while conn.has_pending_write() {
        stream.writable().await?;
        match stream.try_write(conn.pending_write()) {
            Ok(0) => return Err(ErrorKind::WriteZero.into()),
            Ok(n) => conn.advance_write(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::client::Client;
    use crate::core::downloads::DownloadProgress;
    use crate::core::index::hash_file;
    use crate::core::registry::Peer;
    use std::io::Write;
    use std::path::Path;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;

    fn write_file(dir: &Path, name: &str, contents: &[u8]) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(contents).unwrap();
    }

    async fn start_server(dir: &Path) -> (Arc<Server>, SocketAddr, Arc<PeerRegistry>) {
        let index = Arc::new(FileIndex::new(dir).unwrap());
        index.refresh().unwrap();
        let registry = Arc::new(PeerRegistry::new());
        let server = Arc::new(Server::new(index, registry.clone()));
        let addr = server.start(0).await.unwrap();
        (server, addr, registry)
    }

    async fn read_frame(stream: &mut TcpStream) -> Message {
        use crate::core::protocol::codec::{FrameHeader, HEADER_LEN};
        let mut frame = vec![0u8; HEADER_LEN];
        stream.read_exact(&mut frame).await.unwrap();
        let header = FrameHeader::parse(&frame).unwrap();
        frame.resize(HEADER_LEN + header.payload_size as usize, 0);
        if header.payload_size > 0 {
            stream.read_exact(&mut frame[HEADER_LEN..]).await.unwrap();
        }
        Message::decode(&frame).unwrap()
    }

    #[tokio::test]
    async fn ping_round_trip() {
        let tmp = TempDir::new().unwrap();
        let (server, addr, _) = start_server(tmp.path()).await;

        let mut client = Client::connect("127.0.0.1", addr.port()).await.unwrap();
        client.ping().await.unwrap();

        server.stop().await;
    }

    #[tokio::test]
    async fn file_listing_reports_known_digest() {
        let tmp = TempDir::new().unwrap();
        write_file(tmp.path(), "a.txt", b"hello, world\n");
        let (server, addr, _) = start_server(tmp.path()).await;

        let mut client = Client::connect("127.0.0.1", addr.port()).await.unwrap();
        let files = client.request_file_list("").await.unwrap();

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].filename, "a.txt");
        assert_eq!(files[0].size, 13);
        assert_eq!(
            files[0].hash,
            "853ff93762a06ddbf722c4ebe9ddd66d8f63ddaea97f521c3ecc20da7c976020"
        );

        server.stop().await;
    }

    #[tokio::test]
    async fn peer_list_round_trip() {
        let tmp = TempDir::new().unwrap();
        let (server, addr, registry) = start_server(tmp.path()).await;
        registry.add(Peer::new("node-b", "10.0.0.2", 9001));

        let mut client = Client::connect("127.0.0.1", addr.port()).await.unwrap();
        let peers = client.request_peer_list().await.unwrap();

        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].id, "node-b");
        assert_eq!(peers[0].port, 9001);

        server.stop().await;
    }

    #[tokio::test]
    async fn download_preserves_bytes() {
        let tmp = TempDir::new().unwrap();
        let blob: Vec<u8> = (0..100 * 1024).map(|i| (i % 251) as u8).collect();
        write_file(tmp.path(), "blob.bin", &blob);
        let (server, addr, _) = start_server(tmp.path()).await;

        let dest_dir = TempDir::new().unwrap();
        let dest = dest_dir.path().join("out.bin");
        let progress = Arc::new(DownloadProgress::new("blob.bin"));

        let client = Client::connect("127.0.0.1", addr.port()).await.unwrap();
        client
            .download("blob.bin", &dest, progress.clone())
            .await
            .unwrap();

        assert!(progress.is_completed());
        assert!(!progress.is_failed());
        assert_eq!(progress.total_size(), blob.len() as u64);
        assert_eq!(std::fs::read(&dest).unwrap(), blob);
        assert_eq!(
            hash_file(&dest).unwrap(),
            hash_file(&tmp.path().join("blob.bin")).unwrap()
        );

        server.stop().await;
    }

    #[tokio::test]
    async fn missing_file_fails_download_but_not_server() {
        let tmp = TempDir::new().unwrap();
        let (server, addr, _) = start_server(tmp.path()).await;

        let dest_dir = TempDir::new().unwrap();
        let progress = Arc::new(DownloadProgress::new("ghost.txt"));
        let client = Client::connect("127.0.0.1", addr.port()).await.unwrap();
        let result = client
            .download("ghost.txt", &dest_dir.path().join("ghost.txt"), progress.clone())
            .await;

        assert!(result.is_err());
        assert!(progress.is_failed());
        assert!(!progress.is_completed());
        assert!(!progress.error_message().is_empty());

        // The server keeps serving other clients.
        let mut other = Client::connect("127.0.0.1", addr.port()).await.unwrap();
        other.ping().await.unwrap();

        server.stop().await;
    }

    #[tokio::test]
    async fn corrupted_frame_closes_only_that_connection() {
        let tmp = TempDir::new().unwrap();
        let (server, addr, _) = start_server(tmp.path()).await;

        let mut frame = Message::FileListRequest {
            peer_id: "node".into(),
        }
        .to_bytes()
        .unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0x01;

        let mut raw = TcpStream::connect(addr).await.unwrap();
        raw.write_all(&frame).await.unwrap();

        // The server closes the corrupted connection.
        let mut probe = [0u8; 1];
        let n = raw.read(&mut probe).await.unwrap();
        assert_eq!(n, 0);

        // Other connections remain functional.
        let mut client = Client::connect("127.0.0.1", addr.port()).await.unwrap();
        client.ping().await.unwrap();

        server.stop().await;
    }

    #[tokio::test]
    async fn unknown_type_gets_typed_error_then_close() {
        let tmp = TempDir::new().unwrap();
        let (server, addr, _) = start_server(tmp.path()).await;

        let mut frame = Message::Ping.to_bytes().unwrap();
        frame[8] = 99;

        let mut raw = TcpStream::connect(addr).await.unwrap();
        raw.write_all(&frame).await.unwrap();

        match read_frame(&mut raw).await {
            Message::ErrorMessage { code, message } => {
                assert_eq!(code, ErrorCode::ProtocolError);
                assert!(message.contains("99"));
            }
            other => panic!("expected error message, got {other:?}"),
        }
        let mut probe = [0u8; 1];
        assert_eq!(raw.read(&mut probe).await.unwrap(), 0);

        server.stop().await;
    }

    #[tokio::test]
    async fn file_request_honors_offset_and_length() {
        let tmp = TempDir::new().unwrap();
        write_file(tmp.path(), "abc.bin", b"abcdefghijklmnopqrstuvwxyz");
        let (server, addr, _) = start_server(tmp.path()).await;

        let mut raw = TcpStream::connect(addr).await.unwrap();
        let request = Message::FileRequest {
            filename: "abc.bin".into(),
            offset: 5,
            length: 4,
        };
        raw.write_all(&request.to_bytes().unwrap()).await.unwrap();

        match read_frame(&mut raw).await {
            Message::FileChunk { offset, data } => {
                assert_eq!(offset, 5);
                assert_eq!(data, b"fghi");
            }
            other => panic!("expected chunk, got {other:?}"),
        }
        assert_eq!(read_frame(&mut raw).await, Message::FileComplete);

        // Offset beyond the file size clamps to an empty transfer.
        let request = Message::FileRequest {
            filename: "abc.bin".into(),
            offset: 1000,
            length: 0,
        };
        raw.write_all(&request.to_bytes().unwrap()).await.unwrap();
        assert_eq!(read_frame(&mut raw).await, Message::FileComplete);

        server.stop().await;
    }

    #[tokio::test]
    async fn file_list_for_unknown_peer_is_empty() {
        let tmp = TempDir::new().unwrap();
        let (server, addr, registry) = start_server(tmp.path()).await;

        let mut with_files = Peer::new("known", "10.0.0.9", 1);
        with_files.files.push(crate::core::index::FileInfo::remote(
            "remote.bin".into(),
            42,
            "cafe".into(),
            0,
        ));
        registry.add(with_files);

        let mut client = Client::connect("127.0.0.1", addr.port()).await.unwrap();
        let known = client.request_file_list("known").await.unwrap();
        assert_eq!(known.len(), 1);
        assert_eq!(known[0].filename, "remote.bin");

        let mut client = Client::connect("127.0.0.1", addr.port()).await.unwrap();
        let unknown = client.request_file_list("nobody").await.unwrap();
        assert!(unknown.is_empty());

        server.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_downloads_are_byte_identical() {
        let tmp = TempDir::new().unwrap();
        let blob: Vec<u8> = (0..1024 * 1024).map(|i| (i % 249) as u8).collect();
        write_file(tmp.path(), "big.bin", &blob);
        let (server, addr, _) = start_server(tmp.path()).await;

        let dest_dir = TempDir::new().unwrap();
        let mut handles = Vec::new();
        for i in 0..10 {
            let dest = dest_dir.path().join(format!("copy-{i}.bin"));
            let port = addr.port();
            handles.push(tokio::spawn(async move {
                let progress = Arc::new(DownloadProgress::new("big.bin"));
                let client = Client::connect("127.0.0.1", port).await.unwrap();
                client.download("big.bin", &dest, progress.clone()).await.unwrap();
                assert!(progress.is_completed());
                dest
            }));
        }
        for handle in handles {
            let dest = handle.await.unwrap();
            assert_eq!(std::fs::read(dest).unwrap(), blob);
        }

        server.stop().await;
    }
}
