//! Tracker protocols (BEP-3, BEP-15, BEP-23).
//!
//! Trackers are the engine's peer source: an announce registers us in
//! the swarm and returns addresses to dial. Both announce schemes are
//! supported, selected by URL scheme:
//!
//! - HTTP(S): a GET request with the announce parameters in the query
//!   string, answered with a bencoded dictionary.
//! - UDP (BEP-15): a two-step connect/announce exchange with binary
//!   packets and exponential retransmission.
//!
//! Compact peer lists (BEP-23, six bytes per peer) are the common case
//! and the dictionary form is accepted from HTTP trackers.
//!
//! [`announce_any`] runs the session's policy: try each tracker in
//! order and keep the first response that works.

mod announce;
mod error;
mod http;
mod response;
mod udp;

pub use announce::{announce_any, announce_url, Announce};
pub use error::TrackerError;
pub use http::HttpTracker;
pub use response::{parse_compact_peers, AnnounceResponse, TrackerEvent};
pub use udp::UdpTracker;
