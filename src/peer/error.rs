use thiserror::Error;

/// Errors that can occur on a peer connection.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timeout")]
    Timeout,

    #[error("connection closed by peer")]
    ConnectionClosed,

    /// The handshake was malformed or for the wrong protocol.
    #[error("invalid handshake")]
    InvalidHandshake,

    /// The peer answered the handshake with a different torrent.
    #[error("info hash mismatch")]
    InfoHashMismatch,

    /// A frame announced a body larger than the connection allows.
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// A message body did not match its id.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("unknown message id: {0}")]
    InvalidMessageId(u8),

    /// The peer broke a protocol rule (late bitfield, bad bitfield
    /// length, spare bits set, ...).
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Extension protocol (BEP-10/BEP-9) payload problems.
    #[error("extension error: {0}")]
    Extension(String),

    #[error("bencode error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),
}
