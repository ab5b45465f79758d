//! Node: the coordinator behind the administrative surface.
//!
//! Owns the file index, peer registry, download tracker, and server,
//! and exposes the typed operations the interactive shell consumes.
//! Formatting is the shell's concern; everything here returns data.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::app::Args;
use crate::core::client::{self, Client};
use crate::core::downloads::{DownloadSnapshot, DownloadTracker};
use crate::core::error::NodeError;
use crate::core::index::{hash_file, FileIndex, FileInfo};
use crate::core::registry::{Peer, PeerRegistry};
use crate::core::server::Server;
use crate::utils::sos::SignalOfStop;
use crate::workers::heartbeat;

/// Which file list an administrative query asks for.
#[derive(Debug, Clone)]
pub enum FileScope {
    Local,
    Peer(String),
}

/// Point-in-time node statistics for the `status` command.
#[derive(Debug, Clone)]
pub struct NodeStatus {
    pub node_id: String,
    pub port: u16,
    pub shared_dir: PathBuf,
    pub local_files: usize,
    pub total_peers: usize,
    pub active_peers: usize,
    pub connections: usize,
    pub downloads_in_flight: usize,
}

pub struct Node {
    node_id: String,
    port: u16,
    downloads_dir: PathBuf,
    index: Arc<FileIndex>,
    registry: Arc<PeerRegistry>,
    tracker: Arc<DownloadTracker>,
    server: Arc<Server>,
    sos: SignalOfStop,
}

impl Node {
    pub fn new(args: &Args, sos: SignalOfStop) -> anyhow::Result<Self> {
        let index = Arc::new(FileIndex::new(&args.directory)?);
        let registry = Arc::new(PeerRegistry::new());
        for endpoint in &args.bootstrap {
            match parse_endpoint(endpoint) {
                Some((host, port)) => registry.add_bootstrap(host, port),
                None => warn!(
                    event = "bootstrap_invalid",
                    endpoint,
                    "Ignoring malformed bootstrap endpoint (expected ip:port)"
                ),
            }
        }
        let server = Arc::new(Server::new(index.clone(), registry.clone()));
        Ok(Self {
            node_id: Uuid::new_v4().to_string(),
            port: args.port,
            downloads_dir: args.downloads.clone(),
            index,
            registry,
            tracker: Arc::new(DownloadTracker::new()),
            server,
            sos,
        })
    }

    /// Scan the shared directory, bind the server, and start the
    /// heartbeat worker. Returns the bound address.
    pub async fn start(&self) -> anyhow::Result<std::net::SocketAddr> {
        let index = self.index.clone();
        let count = tokio::task::spawn_blocking(move || index.refresh()).await??;
        info!(
            event = "node_starting",
            node_id = %self.node_id,
            files = count,
            dir = %self.index.shared_dir().display(),
            "Shared directory indexed"
        );

        let addr = self.server.start(self.port).await?;
        tokio::spawn(heartbeat::run(self.registry.clone(), self.sos.clone()));
        Ok(addr)
    }

    pub async fn stop(&self) {
        self.sos.cancel();
        self.server.stop().await;
    }

    // ── Administrative operations ───────────────────────────────────────────

    /// Snapshot of every known peer.
    pub fn peers(&self) -> Vec<Peer> {
        self.registry.all()
    }

    /// File listing for the local index or a named peer.
    pub fn files(&self, scope: FileScope) -> Result<Vec<FileInfo>, NodeError> {
        match scope {
            FileScope::Local => Ok(self.index.list()),
            FileScope::Peer(peer_id) => self
                .registry
                .get(&peer_id)
                .map(|p| p.files)
                .ok_or_else(|| NodeError::FileNotFound(format!("unknown peer: {peer_id}"))),
        }
    }

    /// Start a background download of `filename` from whichever active
    /// peers advertise it. Candidates are tried in order; the first
    /// success wins, verified against the advertised hash when known.
    pub fn fetch(&self, filename: &str, destination: Option<PathBuf>) -> Result<(), NodeError> {
        let candidates = self.registry.find_with_file(filename);
        if candidates.is_empty() {
            return Err(NodeError::FileNotFound(format!(
                "no active peer advertises {filename}"
            )));
        }
        let expected_hash = candidates
            .iter()
            .find_map(|p| p.file_info(filename).map(|f| f.hash.clone()))
            .filter(|h| !h.is_empty());
        let destination = destination.unwrap_or_else(|| self.downloads_dir.join(filename));
        let filename = filename.to_string();
        let tracker = self.tracker.clone();
        let registry = self.registry.clone();

        tokio::spawn(async move {
            download_multi_source(
                &filename,
                &destination,
                candidates,
                expected_hash,
                tracker,
                registry,
            )
            .await;
        });
        Ok(())
    }

    /// Copy a regular file into the shared directory and refresh the
    /// index. Returns the advertised filename.
    pub async fn share(&self, path: PathBuf) -> Result<String, NodeError> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| NodeError::FileNotFound(format!("not a file path: {path:?}")))?;
        let dest = self.index.shared_dir().join(&filename);
        let index = self.index.clone();

        tokio::task::spawn_blocking(move || -> Result<(), NodeError> {
            let meta = std::fs::metadata(&path)
                .map_err(|e| NodeError::from_io(&path.to_string_lossy(), &e))?;
            if !meta.is_file() {
                return Err(NodeError::FileNotFound(format!(
                    "not a regular file: {path:?}"
                )));
            }
            std::fs::copy(&path, &dest)
                .map_err(|e| NodeError::from_io(&path.to_string_lossy(), &e))?;
            index
                .refresh()
                .map_err(|e| NodeError::from_io(&dest.to_string_lossy(), &e))?;
            Ok(())
        })
        .await
        .map_err(|e| NodeError::Network(e.to_string()))??;

        info!(event = "file_shared", filename, "File added to shared directory");
        Ok(filename)
    }

    /// Probe `ip:port`, register it as a peer, and pull its file list.
    pub async fn connect_peer(&self, ip: &str, port: u16) -> Result<Peer, NodeError> {
        let mut client = Client::connect(ip, port).await?;
        client.ping().await?;
        let files = client.request_file_list("").await.unwrap_or_default();

        let mut peer = Peer::new(format!("{ip}:{port}"), ip, port);
        peer.files = files;
        self.registry.add(peer.clone());
        Ok(peer)
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            node_id: self.node_id.clone(),
            port: self.port,
            shared_dir: self.index.shared_dir().to_path_buf(),
            local_files: self.index.file_count(),
            total_peers: self.registry.total_count(),
            active_peers: self.registry.active_count(),
            connections: self.server.connection_count(),
            downloads_in_flight: self.tracker.in_flight(),
        }
    }

    pub fn downloads(&self) -> Vec<DownloadSnapshot> {
        self.tracker.snapshots()
    }

    pub fn cancel_download(&self, filename: &str) -> bool {
        match self.tracker.get(filename) {
            Some(progress) if !progress.is_terminal() => {
                progress.cancel();
                true
            }
            _ => false,
        }
    }
}

/// Try each candidate peer in order until one download succeeds. A
/// mismatch against the advertised hash counts as a failed source.
async fn download_multi_source(
    filename: &str,
    destination: &Path,
    candidates: Vec<Peer>,
    expected_hash: Option<String>,
    tracker: Arc<DownloadTracker>,
    registry: Arc<PeerRegistry>,
) {
    for peer in &candidates {
        let progress = tracker.register(filename);
        info!(
            event = "download_attempt",
            filename,
            peer_id = %peer.id,
            addr = %peer.addr(),
            "Requesting file from peer"
        );
        let outcome = client::download_from(
            &peer.ip,
            peer.port,
            filename,
            destination,
            progress.clone(),
        )
        .await;

        match outcome {
            Ok(()) => {
                if let Some(expected) = &expected_hash {
                    let dest = destination.to_path_buf();
                    let actual = tokio::task::spawn_blocking(move || hash_file(&dest)).await;
                    match actual {
                        Ok(Ok(actual)) if &actual == expected => {}
                        _ => {
                            warn!(
                                event = "download_hash_mismatch",
                                filename,
                                peer_id = %peer.id,
                                "Discarding corrupt copy, trying next source"
                            );
                            let _ = tokio::fs::remove_file(destination).await;
                            let fresh = tracker.register(filename);
                            fresh.fail("hash mismatch against advertised digest");
                            registry.set_active(&peer.id, false);
                            continue;
                        }
                    }
                }
                registry.touch(&peer.id);
                return;
            }
            Err(e) => {
                warn!(
                    event = "download_source_failed",
                    filename,
                    peer_id = %peer.id,
                    code = ?e.code(),
                    error = %e,
                    "Source failed, trying next"
                );
                if progress.cancel_token().cancelled() {
                    return;
                }
            }
        }
    }
}

fn parse_endpoint(endpoint: &str) -> Option<(String, u16)> {
    let (host, port) = endpoint.rsplit_once(':')?;
    let port: u16 = port.parse().ok()?;
    if host.is_empty() {
        return None;
    }
    Some((host.to_string(), port))
}
