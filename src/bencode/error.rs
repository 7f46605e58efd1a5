use thiserror::Error;

/// Errors that can occur while decoding bencode.
#[derive(Debug, Error)]
pub enum BencodeError {
    /// Input ended before a complete value was parsed.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// Integer is malformed: empty, `-0`, leading zeros, or overflow.
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Byte-string length prefix is not a plain decimal number.
    #[error("invalid string length")]
    InvalidLength,

    /// Encountered a byte that cannot start a value.
    #[error("unexpected character: {0:?}")]
    UnexpectedChar(char),

    /// Extra bytes remain after the top-level value.
    #[error("trailing data after value")]
    TrailingData,

    /// Dictionary keys are not in strictly ascending order.
    #[error("dictionary keys out of order")]
    UnsortedKeys,

    /// The same dictionary key appears twice.
    #[error("duplicate dictionary key")]
    DuplicateKey,

    /// Recursion limit exceeded.
    #[error("nesting too deep")]
    NestingTooDeep,
}
