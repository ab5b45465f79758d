//! Peer registry: the live map of known peers.
//!
//! The registry exclusively owns every `Peer` record. Readers get cloned
//! snapshots under the shared lock; all mutations are keyed by peer id
//! and take the exclusive lock. Liveness (heartbeat probes, stale sweep,
//! bootstrap) is driven by the heartbeat worker, which calls back into
//! the registry.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, SystemTime};

use tracing::{debug, info};

use crate::core::index::FileInfo;
use crate::core::protocol::ProtocolError;

/// A remote node advertising a set of files.
#[derive(Debug, Clone)]
pub struct Peer {
    pub id: String,
    pub ip: String,
    pub port: u16,
    /// Whether the last liveness probe succeeded.
    pub active: bool,
    pub last_seen: SystemTime,
    pub files: Vec<FileInfo>,
}

impl Peer {
    pub fn new(id: impl Into<String>, ip: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            ip: ip.into(),
            port,
            active: true,
            last_seen: SystemTime::now(),
            files: Vec::new(),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    pub fn has_file(&self, filename: &str) -> bool {
        self.files.iter().any(|f| f.filename == filename)
    }

    pub fn file_info(&self, filename: &str) -> Option<&FileInfo> {
        self.files.iter().find(|f| f.filename == filename)
    }

    /// Pipe-separated record exchanged between bootstrap peers:
    /// `id|ip|port|active|file_count` then `|filename|size|hash` per file.
    pub fn serialize(&self) -> String {
        let mut out = format!(
            "{}|{}|{}|{}|{}",
            self.id,
            self.ip,
            self.port,
            if self.active { 1 } else { 0 },
            self.files.len()
        );
        for file in &self.files {
            out.push_str(&format!("|{}|{}|{}", file.filename, file.size, file.hash));
        }
        out
    }

    /// Parse a serialized record. Fails when fewer than five leading
    /// tokens are present or a numeric token does not parse.
    pub fn deserialize(data: &str) -> Result<Peer, ProtocolError> {
        let tokens: Vec<&str> = data.split('|').collect();
        if tokens.len() < 5 {
            return Err(ProtocolError::InvalidPeerRecord);
        }
        let port: u16 = tokens[2]
            .parse()
            .map_err(|_| ProtocolError::InvalidPeerRecord)?;
        let file_count: usize = tokens[4]
            .parse()
            .map_err(|_| ProtocolError::InvalidPeerRecord)?;

        let mut peer = Peer::new(tokens[0], tokens[1], port);
        peer.active = tokens[3] == "1";

        let mut idx = 5;
        for _ in 0..file_count {
            if idx + 2 >= tokens.len() {
                break;
            }
            let size: u64 = tokens[idx + 1]
                .parse()
                .map_err(|_| ProtocolError::InvalidPeerRecord)?;
            peer.files.push(FileInfo::remote(
                tokens[idx].to_string(),
                size,
                tokens[idx + 2].to_string(),
                0,
            ));
            idx += 3;
        }
        Ok(peer)
    }
}

/// Concurrent map of known peers plus the configured bootstrap
/// endpoints.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: RwLock<HashMap<String, Peer>>,
    bootstrap: Mutex<Vec<(String, u16)>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, peer: Peer) {
        info!(
            event = "peer_added",
            peer_id = %peer.id,
            addr = %peer.addr(),
            files = peer.files.len(),
            "Peer registered"
        );
        self.peers.write().unwrap().insert(peer.id.clone(), peer);
    }

    pub fn remove(&self, peer_id: &str) -> bool {
        let removed = self.peers.write().unwrap().remove(peer_id).is_some();
        if removed {
            info!(event = "peer_removed", peer_id, "Peer removed");
        }
        removed
    }

    pub fn get(&self, peer_id: &str) -> Option<Peer> {
        self.peers.read().unwrap().get(peer_id).cloned()
    }

    pub fn all(&self) -> Vec<Peer> {
        self.peers.read().unwrap().values().cloned().collect()
    }

    pub fn active(&self) -> Vec<Peer> {
        self.peers
            .read()
            .unwrap()
            .values()
            .filter(|p| p.active)
            .cloned()
            .collect()
    }

    /// Active peers advertising `filename`.
    pub fn find_with_file(&self, filename: &str) -> Vec<Peer> {
        self.peers
            .read()
            .unwrap()
            .values()
            .filter(|p| p.active && p.has_file(filename))
            .cloned()
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.peers.read().unwrap().values().filter(|p| p.active).count()
    }

    pub fn total_count(&self) -> usize {
        self.peers.read().unwrap().len()
    }

    /// Atomically replace a peer's file list and bump its `last_seen`.
    pub fn update_file_list(&self, peer_id: &str, files: Vec<FileInfo>) -> bool {
        let mut peers = self.peers.write().unwrap();
        match peers.get_mut(peer_id) {
            Some(peer) => {
                peer.files = files;
                peer.last_seen = SystemTime::now();
                true
            }
            None => false,
        }
    }

    /// Add or replace a single advertised file on a peer.
    pub fn add_file(&self, peer_id: &str, file: FileInfo) -> bool {
        let mut peers = self.peers.write().unwrap();
        match peers.get_mut(peer_id) {
            Some(peer) => {
                match peer.files.iter_mut().find(|f| f.filename == file.filename) {
                    Some(existing) => *existing = file,
                    None => peer.files.push(file),
                }
                true
            }
            None => false,
        }
    }

    /// Mark a successful liveness signal: restore `active` and bump
    /// `last_seen`.
    pub fn touch(&self, peer_id: &str) {
        if let Some(peer) = self.peers.write().unwrap().get_mut(peer_id) {
            peer.active = true;
            peer.last_seen = SystemTime::now();
        }
    }

    /// Bump `last_seen` for any peer at the given remote address.
    pub fn touch_by_ip(&self, ip: &str) {
        let mut peers = self.peers.write().unwrap();
        for peer in peers.values_mut().filter(|p| p.ip == ip) {
            peer.active = true;
            peer.last_seen = SystemTime::now();
        }
    }

    pub fn set_active(&self, peer_id: &str, active: bool) {
        if let Some(peer) = self.peers.write().unwrap().get_mut(peer_id) {
            peer.active = active;
            if active {
                peer.last_seen = SystemTime::now();
            }
        }
    }

    /// Remove every peer not seen within `threshold`. Returns the ids of
    /// the evicted peers.
    pub fn sweep_stale(&self, threshold: Duration) -> Vec<String> {
        let now = SystemTime::now();
        let mut peers = self.peers.write().unwrap();
        let stale: Vec<String> = peers
            .values()
            .filter(|p| {
                now.duration_since(p.last_seen)
                    .map(|age| age > threshold)
                    .unwrap_or(false)
            })
            .map(|p| p.id.clone())
            .collect();
        for id in &stale {
            peers.remove(id);
            debug!(event = "peer_stale", peer_id = %id, "Stale peer evicted");
        }
        stale
    }

    /// Append a bootstrap endpoint; effective before the heartbeat
    /// worker runs its one-shot bootstrap pass.
    pub fn add_bootstrap(&self, host: impl Into<String>, port: u16) {
        self.bootstrap.lock().unwrap().push((host.into(), port));
    }

    pub fn bootstrap_nodes(&self) -> Vec<(String, u16)> {
        self.bootstrap.lock().unwrap().clone()
    }

    /// Registry snapshot serialized for a PEER_LIST_RESPONSE payload.
    pub fn serialized_peers(&self) -> Vec<String> {
        self.peers
            .read()
            .unwrap()
            .values()
            .map(Peer::serialize)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn file(name: &str, size: u64) -> FileInfo {
        FileInfo::remote(name.to_string(), size, format!("hash-{name}"), 0)
    }

    #[test]
    fn add_then_remove_restores_prior_snapshot() {
        let registry = PeerRegistry::new();
        registry.add(Peer::new("a", "10.0.0.1", 8888));
        let before: Vec<String> = {
            let mut ids: Vec<String> = registry.all().into_iter().map(|p| p.id).collect();
            ids.sort();
            ids
        };

        registry.add(Peer::new("b", "10.0.0.2", 8888));
        assert!(registry.remove("b"));

        let mut after: Vec<String> = registry.all().into_iter().map(|p| p.id).collect();
        after.sort();
        assert_eq!(before, after);
        assert!(!registry.remove("b"));
    }

    #[test]
    fn active_count_never_exceeds_total() {
        let registry = PeerRegistry::new();
        registry.add(Peer::new("a", "10.0.0.1", 1));
        registry.add(Peer::new("b", "10.0.0.2", 2));
        registry.set_active("b", false);

        assert_eq!(registry.total_count(), 2);
        assert_eq!(registry.active_count(), 1);
        assert!(registry.active_count() <= registry.total_count());
    }

    #[test]
    fn find_with_file_only_returns_active_peers() {
        let registry = PeerRegistry::new();
        let mut holder = Peer::new("holder", "10.0.0.1", 1);
        holder.files.push(file("blob.bin", 100));
        let mut inactive = Peer::new("inactive", "10.0.0.2", 2);
        inactive.files.push(file("blob.bin", 100));
        inactive.active = false;
        registry.add(holder);
        registry.add(inactive);
        registry.add(Peer::new("empty", "10.0.0.3", 3));

        let found = registry.find_with_file("blob.bin");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "holder");
        assert!(found.iter().all(|p| p.active));
    }

    #[test]
    fn update_file_list_replaces_and_touches() {
        let registry = PeerRegistry::new();
        let mut peer = Peer::new("a", "10.0.0.1", 1);
        peer.files.push(file("old.txt", 1));
        peer.last_seen = SystemTime::now() - Duration::from_secs(120);
        registry.add(peer);

        assert!(registry.update_file_list("a", vec![file("new.txt", 2)]));
        let updated = registry.get("a").unwrap();
        assert_eq!(updated.files.len(), 1);
        assert_eq!(updated.files[0].filename, "new.txt");
        assert!(updated.last_seen.elapsed().unwrap() < Duration::from_secs(5));

        assert!(!registry.update_file_list("ghost", vec![]));
    }

    #[test]
    fn stale_peers_are_swept() {
        let registry = PeerRegistry::new();
        let mut stale = Peer::new("stale", "10.0.0.1", 1);
        stale.last_seen = SystemTime::now() - Duration::from_secs(10 * 60);
        registry.add(stale);
        registry.add(Peer::new("fresh", "10.0.0.2", 2));

        let removed = registry.sweep_stale(Duration::from_secs(5 * 60));
        assert_eq!(removed, vec!["stale".to_string()]);
        assert!(registry.get("stale").is_none());
        assert!(registry.get("fresh").is_some());
    }

    #[test]
    fn probe_failure_then_success_restores_active() {
        let registry = PeerRegistry::new();
        registry.add(Peer::new("a", "10.0.0.1", 1));

        registry.set_active("a", false);
        assert_eq!(registry.active_count(), 0);

        registry.touch("a");
        let peer = registry.get("a").unwrap();
        assert!(peer.active);
    }

    #[test]
    fn concurrent_distinct_file_adds_all_land() {
        let registry = Arc::new(PeerRegistry::new());
        registry.add(Peer::new("a", "10.0.0.1", 1));

        let n = 16;
        let mut handles = Vec::new();
        for i in 0..n {
            let registry = registry.clone();
            handles.push(std::thread::spawn(move || {
                registry.add_file("a", file(&format!("file-{i}.bin"), i as u64));
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.get("a").unwrap().files.len(), n);
    }

    #[test]
    fn serialize_roundtrip() {
        let mut peer = Peer::new("node-a", "192.168.1.5", 8888);
        peer.files.push(file("a.txt", 13));
        peer.files.push(file("b.bin", 4096));

        let parsed = Peer::deserialize(&peer.serialize()).unwrap();
        assert_eq!(parsed.id, "node-a");
        assert_eq!(parsed.ip, "192.168.1.5");
        assert_eq!(parsed.port, 8888);
        assert!(parsed.active);
        assert_eq!(parsed.files.len(), 2);
        assert_eq!(parsed.files[0].filename, "a.txt");
        assert_eq!(parsed.files[0].size, 13);
    }

    #[test]
    fn deserialize_rejects_short_records() {
        assert!(matches!(
            Peer::deserialize("id|ip|8888|1"),
            Err(ProtocolError::InvalidPeerRecord)
        ));
        assert!(matches!(
            Peer::deserialize("id|ip|not-a-port|1|0"),
            Err(ProtocolError::InvalidPeerRecord)
        ));
    }

    #[test]
    fn deserialize_inactive_flag() {
        let peer = Peer::deserialize("node|10.0.0.1|9000|0|0").unwrap();
        assert!(!peer.active);
        assert!(peer.files.is_empty());
    }
}
