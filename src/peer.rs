//! Peer wire protocol (BEP-3, BEP-10).
//!
//! Everything that travels over a TCP connection to another peer lives
//! here: the 68-byte handshake, the length-prefixed message framing,
//! the bitfield representation, and the extension protocol carrying the
//! ut_metadata exchange (BEP-9) used for magnet downloads.
//!
//! The modules in this subsystem are purely mechanical: they encode,
//! decode, and validate. Which blocks to request and when is the
//! scheduler's business; driving a live connection is the session's.

mod bitfield;
mod connection;
mod error;
mod extension;
mod message;
mod metadata;
mod peer_id;
mod transport;

pub use bitfield::Bitfield;
pub use connection::PeerConnection;
pub use error::PeerError;
pub use extension::{ExtensionHandshake, EXTENSION_HANDSHAKE_ID, OUR_UT_METADATA_ID, UT_METADATA};
pub use message::{Handshake, Message, MessageId, HANDSHAKE_LEN};
pub use metadata::{
    metadata_piece_count, metadata_piece_size, MetadataMessage, MetadataMessageType,
    METADATA_PIECE_SIZE,
};
pub use peer_id::PeerId;
pub use transport::{FrameReader, FrameWriter, PeerTransport};
