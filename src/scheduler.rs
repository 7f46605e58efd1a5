//! The piece scheduler.
//!
//! One task owns every piece's state, the availability counts, and the
//! per-peer request bookkeeping. Peers never talk to each other or
//! touch scheduler state: each peer task posts [`PeerEvent`]s into the
//! scheduler's inbox and receives [`PeerCommand`]s on its own channel.
//!
//! Selection is rarest-first: among the pieces a requestable peer
//! claims, the one the fewest connected peers have wins, ties broken by
//! index. A piece normally belongs to one peer; only when a peer has
//! nothing unassigned left to offer may it double up on a piece that is
//! already in flight, which keeps the tail of the download from
//! stalling behind a single slow peer.
//!
//! Blocks land in an in-memory assembly at exactly their offset; a
//! piece whose last block arrives is hashed inline, then either handed
//! to storage and announced with HAVE, or discarded wholesale with a
//! strike against every peer that contributed to it.

mod events;
mod manager;
mod picker;
mod piece;

pub use events::{BlockRequest, PeerCommand, PeerEvent, PeerKey};
pub use manager::Scheduler;
pub use picker::PiecePicker;
pub use piece::{block_count, block_length, BlockRejected, PieceAssembly};

#[cfg(test)]
mod tests;
