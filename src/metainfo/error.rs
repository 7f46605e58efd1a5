use crate::bencode::BencodeError;
use thiserror::Error;

/// Errors raised while parsing metainfo files or magnet links.
#[derive(Debug, Error)]
pub enum MetainfoError {
    #[error("bencode error: {0}")]
    Bencode(#[from] BencodeError),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid field: {0}")]
    InvalidField(&'static str),

    #[error("invalid info hash")]
    InvalidInfoHash,

    #[error("invalid magnet link: {0}")]
    InvalidMagnet(String),

    /// Fetched metadata did not hash to the expected info hash.
    #[error("info hash mismatch")]
    InfoHashMismatch,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
