//! Torrent metainfo handling (BEP-3, BEP-9).
//!
//! Parses `.torrent` files and magnet links into the immutable
//! description the engine downloads from: file layout, piece hashes,
//! trackers, and the torrent's identity (the info hash).
//!
//! The info hash is computed over the *original* bytes of the `info`
//! dictionary as they appear in the metainfo stream, not over a
//! re-encoding. Some producers publish metainfo whose info keys are not
//! in canonical order; their published hashes cover those original
//! bytes, and re-encoding would silently change the torrent's identity.

mod error;
mod info_hash;
mod magnet;
mod torrent;

pub use error::MetainfoError;
pub use info_hash::InfoHash;
pub use magnet::MagnetLink;
pub use torrent::{FileEntry, Info, Metainfo};

#[cfg(test)]
mod tests;
