//! Protocol constants and tuning defaults.
//!
//! Defaults here reflect the BEP specifications where one applies and
//! otherwise common client behavior. Anything the caller may override
//! lives in [`crate::session::Config`]; this module holds the fixed
//! protocol values and the defaults config falls back to.

use std::time::Duration;

// ============================================================================
// Client identification
// ============================================================================

/// Client ID prefix for peer ID generation (Azureus-style).
pub const CLIENT_PREFIX: &[u8; 8] = b"-BF0001-";

/// User agent string for HTTP tracker requests.
pub const USER_AGENT: &str = "bitflood/0.1.0";

/// Port reported to trackers. The engine never listens; the port is
/// advisory for the swarm.
pub const DEFAULT_PORT: u16 = 6881;

// ============================================================================
// Block and piece sizes
// ============================================================================

/// Standard block size: the unit of request/response on the wire (BEP 3).
pub const BLOCK_SIZE: u32 = 16384;

/// Largest configurable block size. Requests above this are rejected by
/// most clients.
pub const MAX_BLOCK_SIZE: u32 = 131072;

/// Slack added on top of the largest expected payload when sizing the
/// per-connection frame cap.
pub const FRAME_SLACK: usize = 512;

// ============================================================================
// Peer limits and pipelining
// ============================================================================

/// Maximum peer connections per session.
pub const DEFAULT_MAX_PEERS: usize = 120;

/// In-flight block requests per peer.
pub const DEFAULT_PIPELINE_DEPTH: usize = 64;

/// Concurrent piece assignments per peer.
pub const DEFAULT_PIECES_PER_PEER: usize = 8;

/// Hash-failure strikes before a peer is disconnected.
pub const STRIKE_LIMIT: u32 = 3;

/// How long a failed peer address is left alone before a reconnect
/// attempt.
pub const FAILED_PEER_BACKOFF: Duration = Duration::from_secs(60);

// ============================================================================
// Timeouts
// ============================================================================

/// TCP connect + handshake budget per peer.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A peer that sends nothing for this long is dropped.
pub const READ_TIMEOUT: Duration = Duration::from_secs(120);

/// Budget for flushing a message to a peer.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Keep-alive cadence while a connection is idle. Must stay under the
/// remote side's two-minute read timeout.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(90);

/// An unanswered block request is reissued elsewhere after this long.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Cadence of the scheduler's timeout/housekeeping tick.
pub const SCHEDULER_TICK: Duration = Duration::from_secs(1);

/// Cadence of progress events while a download is active.
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

// ============================================================================
// Trackers
// ============================================================================

/// HTTP announce request timeout.
pub const HTTP_TRACKER_TIMEOUT: Duration = Duration::from_secs(30);

/// BEP 15 magic constant opening every UDP connect request.
pub const UDP_PROTOCOL_ID: u64 = 0x41727101980;

/// Base of the BEP 15 retransmission schedule: attempt `n` waits
/// `15 * 2^n` seconds.
pub const UDP_BASE_TIMEOUT: Duration = Duration::from_secs(15);

/// BEP 15 caps retransmission at eight attempts.
pub const UDP_MAX_ATTEMPTS: u32 = 8;

/// A UDP connection id is only valid for one minute.
pub const UDP_CONNECTION_TTL: Duration = Duration::from_secs(60);

/// Fallback announce interval when a tracker does not supply one.
pub const DEFAULT_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(1800);

/// Floor on the re-announce cadence so a bogus tracker interval cannot
/// make the engine hammer it.
pub const MIN_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(30);

/// How many peers we ask a tracker for.
pub const ANNOUNCE_NUMWANT: i32 = 80;

// ============================================================================
// Metadata exchange (BEP 9)
// ============================================================================

/// Peers contacted in parallel while fetching metadata for a magnet.
pub const METADATA_PEER_LIMIT: usize = 20;

/// Budget for one metadata piece round-trip with a peer.
pub const METADATA_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Overall budget for assembling and verifying the info dictionary.
pub const METADATA_FETCH_TIMEOUT: Duration = Duration::from_secs(180);
