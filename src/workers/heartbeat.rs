//! Heartbeat worker: bootstrap discovery plus periodic peer liveness.
//!
//! One-shot bootstrap shortly after start, then a 30-second loop that
//! first sweeps stale peers and then probes every active peer with a
//! short-lived PING connection. Probe failures mark the peer inactive;
//! the peer stays in the registry until the stale sweep evicts it.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::core::client::Client;
use crate::core::config::{BOOTSTRAP_DELAY, HEARTBEAT_INTERVAL, STALE_PEER_THRESHOLD};
use crate::core::registry::PeerRegistry;
use crate::utils::sos::SignalOfStop;

/// Run the heartbeat loop until cancellation.
pub async fn run(registry: Arc<PeerRegistry>, sos: SignalOfStop) {
    let boot_registry = registry.clone();
    let boot_sos = sos.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = boot_sos.wait() => return,
            _ = tokio::time::sleep(BOOTSTRAP_DELAY) => {}
        }
        bootstrap(&boot_registry).await;
    });

    loop {
        tokio::select! {
            _ = sos.wait() => break,
            _ = tokio::time::sleep(HEARTBEAT_INTERVAL) => {}
        }

        let removed = registry.sweep_stale(STALE_PEER_THRESHOLD);
        if !removed.is_empty() {
            info!(
                event = "stale_peers_swept",
                count = removed.len(),
                "Removed stale peers"
            );
        }

        for peer in registry.active() {
            if sos.cancelled() {
                break;
            }
            if probe(&peer.ip, peer.port).await {
                registry.touch(&peer.id);
            } else {
                debug!(
                    event = "peer_probe_failed",
                    peer_id = %peer.id,
                    addr = %peer.addr(),
                    "Marking peer inactive"
                );
                registry.set_active(&peer.id, false);
            }
        }
    }
    debug!(event = "heartbeat_exit", "Heartbeat worker stopped");
}

/// One liveness round trip over a fresh connection.
async fn probe(host: &str, port: u16) -> bool {
    match Client::connect(host, port).await {
        Ok(mut client) => client.ping().await.is_ok(),
        Err(_) => false,
    }
}

/// Pull peer lists from every configured bootstrap endpoint. Failures
/// are logged and do not abort the pass.
pub async fn bootstrap(registry: &PeerRegistry) {
    for (host, port) in registry.bootstrap_nodes() {
        match fetch_peers(&host, port).await {
            Ok(peers) => {
                info!(
                    event = "bootstrap_complete",
                    endpoint = format!("{host}:{port}"),
                    peers = peers.len(),
                    "Bootstrap endpoint answered"
                );
                for peer in peers {
                    registry.add(peer);
                }
            }
            Err(e) => {
                warn!(
                    event = "bootstrap_failed",
                    endpoint = format!("{host}:{port}"),
                    error = %e,
                    "Bootstrap endpoint unreachable"
                );
            }
        }
    }
}

async fn fetch_peers(
    host: &str,
    port: u16,
) -> Result<Vec<crate::core::registry::Peer>, crate::core::error::NodeError> {
    let mut client = Client::connect(host, port).await?;
    client.request_peer_list().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::index::FileIndex;
    use crate::core::registry::Peer;
    use crate::core::server::Server;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    #[tokio::test]
    async fn bootstrap_pulls_peer_list() {
        let tmp = TempDir::new().unwrap();
        let index = Arc::new(FileIndex::new(tmp.path()).unwrap());
        let remote_registry = Arc::new(PeerRegistry::new());
        remote_registry.add(Peer::new("seed-peer", "10.1.2.3", 4444));
        let server = Arc::new(Server::new(index, remote_registry));
        let addr = server.start(0).await.unwrap();

        let local = PeerRegistry::new();
        local.add_bootstrap("127.0.0.1", addr.port());
        bootstrap(&local).await;

        let seeded = local.get("seed-peer").unwrap();
        assert_eq!(seeded.ip, "10.1.2.3");
        assert_eq!(seeded.port, 4444);

        server.stop().await;
    }

    #[tokio::test]
    async fn bootstrap_failure_does_not_abort_pass() {
        let tmp = TempDir::new().unwrap();
        let index = Arc::new(FileIndex::new(tmp.path()).unwrap());
        let remote_registry = Arc::new(PeerRegistry::new());
        remote_registry.add(Peer::new("reachable", "10.0.0.1", 1));
        let server = Arc::new(Server::new(index, remote_registry));
        let addr = server.start(0).await.unwrap();

        let local = PeerRegistry::new();
        // Dead endpoint first, live endpoint second.
        local.add_bootstrap("127.0.0.1", 1);
        local.add_bootstrap("127.0.0.1", addr.port());
        bootstrap(&local).await;

        assert!(local.get("reachable").is_some());

        server.stop().await;
    }

    #[tokio::test]
    async fn probe_failure_marks_inactive_sweep_evicts() {
        let registry = Arc::new(PeerRegistry::new());
        // Unreachable peer, already long unseen.
        let mut peer = Peer::new("dead", "127.0.0.1", 1);
        peer.last_seen = SystemTime::now() - Duration::from_secs(10 * 60);
        registry.add(peer);

        // One heartbeat cycle by hand: sweep first, like the loop does.
        let removed = registry.sweep_stale(STALE_PEER_THRESHOLD);
        assert_eq!(removed, vec!["dead".to_string()]);
        assert_eq!(registry.total_count(), 0);

        // A fresh but unreachable peer is probed and marked inactive.
        registry.add(Peer::new("silent", "127.0.0.1", 1));
        assert!(!probe("127.0.0.1", 1).await);
        registry.set_active("silent", false);
        assert_eq!(registry.active_count(), 0);
        assert_eq!(registry.total_count(), 1);
    }
}
