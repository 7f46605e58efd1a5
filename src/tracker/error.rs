use thiserror::Error;

/// Errors raised by tracker announces.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("bencode error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    /// The tracker answered but refused the announce.
    #[error("tracker rejected announce: {0}")]
    Rejected(String),

    /// The tracker answered with something unparseable.
    #[error("malformed tracker response: {0}")]
    MalformedResponse(String),

    /// The retransmission schedule ran out without an answer.
    #[error("tracker timed out")]
    Timeout,

    #[error("invalid tracker url: {0}")]
    InvalidUrl(String),

    /// Every configured tracker failed.
    #[error("no tracker reachable")]
    Unreachable,
}
