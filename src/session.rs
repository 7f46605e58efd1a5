//! The session orchestrator.
//!
//! Everything above the wire lives here: resolving a torrent file or
//! magnet link into a metainfo (fetching it from the swarm when
//! needed), announcing to trackers, dialing peers up to the cap and
//! driving one worker task per connection, and wiring the scheduler to
//! the storage writer. Progress flows out over a broadcast channel at
//! one-second cadence; slow listeners lose old events instead of
//! slowing the engine down.

mod config;
mod events;
mod manager;
mod metadata;
mod stats;
mod worker;

pub use config::Config;
pub use events::{Progress, SessionEvent};
pub use manager::{Session, ShutdownHandle, TorrentSource};
pub use stats::TransferStats;
