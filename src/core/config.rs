//! Centralized configuration constants for peershare.
//!
//! All tunable parameters live here so they can be reviewed and adjusted
//! in a single place. Wire-format constants (magic, version, header
//! layout) stay in the protocol module.

use std::time::Duration;

// ── Network ──────────────────────────────────────────────────────────────────

/// Default TCP listen port.
pub const DEFAULT_PORT: u16 = 8888;

/// Largest payload a single frame may declare. Anything above this is a
/// protocol violation and the offending connection is closed.
pub const MAX_FRAME_PAYLOAD: usize = 10 * 1024 * 1024;

/// Kernel send/receive buffer size requested for every socket.
pub const SOCKET_BUFFER_SIZE: usize = 64 * 1024;

/// Listen backlog for the server socket.
pub const LISTEN_BACKLOG: i32 = 1024;

// ── Transfer ─────────────────────────────────────────────────────────────────

/// Chunk size used when serving files and when streaming hashes. Each
/// FILE_CHUNK frame carries at most this many bytes.
pub const CHUNK_SIZE: usize = 8 * 1024;

/// I/O timeout applied to every outbound client operation (connect,
/// read, write).
pub const CLIENT_IO_TIMEOUT: Duration = Duration::from_secs(10);

/// Minimum interval between two speed recalculations on a download
/// progress record.
pub const SPEED_UPDATE_INTERVAL: Duration = Duration::from_secs(1);

// ── Server loop ──────────────────────────────────────────────────────────────

/// Upper bound on how long the server loops may go without observing the
/// shutdown flag.
pub const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A connection with no traffic for this long is swept.
pub const CONNECTION_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Period of the server maintenance tick (idle-connection sweep).
pub const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

// ── Peer registry ────────────────────────────────────────────────────────────

/// Period of the heartbeat loop (stale sweep + liveness probes).
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// A peer not seen for this long is removed from the registry.
pub const STALE_PEER_THRESHOLD: Duration = Duration::from_secs(5 * 60);

/// Delay between node start and the one-shot bootstrap pass.
pub const BOOTSTRAP_DELAY: Duration = Duration::from_secs(2);
