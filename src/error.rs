use thiserror::Error;

use crate::metainfo::MetainfoError;
use crate::peer::PeerError;
use crate::storage::StorageError;
use crate::tracker::TrackerError;

/// Fatal session errors surfaced to the caller.
///
/// Recoverable trouble (a failed piece hash, a timed-out block, one
/// dead peer or tracker) is handled inside the engine and never shows
/// up here.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Unparseable torrent file or magnet link, or metadata that did
    /// not verify against the magnet's info hash.
    #[error("metainfo error: {0}")]
    Metainfo(#[from] MetainfoError),

    /// No tracker produced a usable announce.
    #[error("tracker error: {0}")]
    Tracker(#[from] TrackerError),

    /// A peer-layer failure escalated past per-peer recovery.
    #[error("peer error: {0}")]
    Peer(#[from] PeerError),

    /// Disk writes failed; the download cannot make progress.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration value was out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// The swarm produced no peers to download from.
    #[error("no usable peers")]
    NoPeers,

    /// The caller asked the session to stop.
    #[error("interrupted")]
    Interrupted,
}

impl EngineError {
    /// Process exit code for the CLI collaborator: 2 for bad input,
    /// 130 for a user interrupt, 1 for any other fatal error.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::Metainfo(_) | EngineError::InvalidConfig(_) => 2,
            EngineError::Interrupted => 130,
            _ => 1,
        }
    }
}
