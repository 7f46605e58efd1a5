//! Disk layout and write-out.
//!
//! A torrent is one logical byte stream chopped into pieces; on disk it
//! is one or more files. [`FileLayout`] maps a piece's byte range onto
//! file regions, and [`StorageWriter`] owns every file handle and
//! performs the actual writes, one task for the whole session.
//!
//! Pieces arrive in whatever order they verify; files are created and
//! sparsely pre-extended up front so any write order lands correctly.
//! Disk errors are fatal: the engine cannot make progress without
//! storage, so the writer task stops and its error ends the session.

mod error;
mod layout;
mod writer;

pub use error::StorageError;
pub use layout::{FileLayout, FileSpan};
pub use writer::{PieceWrite, StorageWriter};

#[cfg(test)]
mod tests;
