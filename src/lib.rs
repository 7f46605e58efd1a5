//! bitflood - a one-shot BitTorrent download engine
//!
//! Given a `.torrent` file or a magnet link, the engine discovers peers
//! through HTTP and UDP trackers, speaks the peer wire protocol with
//! many of them in parallel, fetches and SHA-1-verifies every piece,
//! and lays the bytes onto disk in the torrent's file layout. Magnet
//! links bootstrap by fetching the info dictionary from the swarm over
//! the extension protocol first.
//!
//! The engine downloads; it does not seed, resume, or traverse NATs.
//! The embedding application owns the command line, configuration
//! loading, and presentation; it consumes the session's event stream
//! and result.
//!
//! # Modules
//!
//! - [`bencode`] - BEP-3 bencode decoding and encoding
//! - [`metainfo`] - torrent files, magnet links, info hashes
//! - [`tracker`] - HTTP and UDP announce protocols
//! - [`peer`] - handshake, wire messages, extension protocol
//! - [`scheduler`] - rarest-first piece scheduling and verification
//! - [`storage`] - piece-to-file mapping and write-out
//! - [`session`] - the orchestrator tying it all together
//!
//! # Example
//!
//! ```no_run
//! use bitflood::{Config, Session, TorrentSource};
//!
//! # async fn example() -> Result<(), bitflood::EngineError> {
//! let session = Session::new(Config {
//!     output_dir: "./downloads".into(),
//!     ..Config::default()
//! })?;
//!
//! session
//!     .download(TorrentSource::parse(
//!         "magnet:?xt=urn:btih:dd8255ecdc7ca55fb0bbf81323d87062db1f6d1c",
//!     ))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod bencode;
pub mod constants;
mod error;
pub mod metainfo;
pub mod peer;
pub mod scheduler;
pub mod session;
pub mod storage;
pub mod tracker;

pub use error::EngineError;
pub use metainfo::{InfoHash, MagnetLink, Metainfo};
pub use session::{Config, Progress, Session, SessionEvent, ShutdownHandle, TorrentSource};
