use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{
    BLOCK_SIZE, DEFAULT_MAX_PEERS, DEFAULT_PIECES_PER_PEER, DEFAULT_PIPELINE_DEPTH, DEFAULT_PORT,
    MAX_BLOCK_SIZE,
};
use crate::error::EngineError;

/// Immutable session configuration, threaded through construction.
#[derive(Debug, Clone)]
pub struct Config {
    /// Where downloaded content lands.
    pub output_dir: PathBuf,
    /// Port reported to trackers.
    pub listen_port: u16,
    /// Peer connection cap.
    pub max_peers: usize,
    /// Request granularity; a power of two up to 128 KiB.
    pub block_size: u32,
    /// In-flight block requests per peer.
    pub pipeline_depth: usize,
    /// Concurrent piece assignments per peer.
    pub pieces_per_peer: usize,
    /// Re-announce cadence override; `None` follows the tracker.
    pub announce_interval_override: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            listen_port: DEFAULT_PORT,
            max_peers: DEFAULT_MAX_PEERS,
            block_size: BLOCK_SIZE,
            pipeline_depth: DEFAULT_PIPELINE_DEPTH,
            pieces_per_peer: DEFAULT_PIECES_PER_PEER,
            announce_interval_override: None,
        }
    }
}

impl Config {
    pub(crate) fn validate(&self) -> Result<(), EngineError> {
        if !self.block_size.is_power_of_two() || self.block_size > MAX_BLOCK_SIZE {
            return Err(EngineError::InvalidConfig(
                "block_size must be a power of two, at most 131072",
            ));
        }
        if self.max_peers == 0 {
            return Err(EngineError::InvalidConfig("max_peers must be positive"));
        }
        if self.pipeline_depth == 0 {
            return Err(EngineError::InvalidConfig(
                "pipeline_depth must be positive",
            ));
        }
        if self.pieces_per_peer == 0 || self.pieces_per_peer > u8::MAX as usize {
            return Err(EngineError::InvalidConfig(
                "pieces_per_peer must be between 1 and 255",
            ));
        }
        Ok(())
    }
}
