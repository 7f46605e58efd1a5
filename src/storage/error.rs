use thiserror::Error;

/// Storage failures. All of these are fatal to the session.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("disk full")]
    DiskFull,

    /// A file path tried to escape the output directory.
    #[error("path escapes output directory: {0}")]
    PathTraversal(String),

    /// The declared file list does not form a valid layout.
    #[error("invalid file layout: {0}")]
    InvalidLayout(&'static str),

    /// A piece write did not match the layout's expected length.
    #[error("piece {index} has wrong length")]
    BadPieceLength { index: u32 },

    /// The writer task stopped while writes were still coming.
    #[error("storage task stopped")]
    Closed,
}

impl StorageError {
    /// Classifies an I/O error, separating out a full disk.
    pub(crate) fn from_io(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::StorageFull {
            StorageError::DiskFull
        } else {
            StorageError::Io(e)
        }
    }
}
