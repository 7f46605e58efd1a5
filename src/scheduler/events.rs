use std::net::SocketAddr;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::peer::Bitfield;

/// Peers are keyed by their socket address for the whole session.
pub type PeerKey = SocketAddr;

/// One block request on the wire: `(piece, begin, length)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRequest {
    pub piece: u32,
    pub begin: u32,
    pub length: u32,
}

/// What a peer task reports to the scheduler.
#[derive(Debug)]
pub enum PeerEvent {
    /// Connection and handshake succeeded; `commands` is the channel
    /// the scheduler drives this peer with.
    Connected {
        key: PeerKey,
        commands: mpsc::Sender<PeerCommand>,
    },
    /// The peer's opening BITFIELD (validated by the peer task).
    Bitfield { key: PeerKey, bitfield: Bitfield },
    /// The peer announced one more piece.
    Have { key: PeerKey, piece: u32 },
    Unchoked { key: PeerKey },
    Choked { key: PeerKey },
    /// A PIECE message arrived.
    Block {
        key: PeerKey,
        piece: u32,
        begin: u32,
        data: Bytes,
    },
    /// The connection is gone, for whatever reason.
    Disconnected { key: PeerKey },
}

/// What the scheduler tells a peer task to do.
#[derive(Debug)]
pub enum PeerCommand {
    /// Send REQUESTs for these blocks, in order.
    Request(Vec<BlockRequest>),
    /// Best-effort CANCEL for a request that was reassigned.
    Cancel(BlockRequest),
    /// Announce a piece we completed.
    Have(u32),
    /// Flip our interest state (INTERESTED / NOT_INTERESTED).
    SetInterested(bool),
    /// Drop the connection.
    Disconnect,
}
