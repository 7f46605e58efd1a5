use std::net::SocketAddr;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use super::error::PeerError;
use super::message::{Handshake, Message};
use super::peer_id::PeerId;
use super::transport::{FrameReader, FrameWriter, PeerTransport};
use crate::constants::CONNECT_TIMEOUT;

/// An established outbound peer connection.
///
/// `connect` dials the peer and completes the handshake; after that the
/// connection either serves sequential request/response exchanges (the
/// metadata fetcher) or is split into halves for the download worker's
/// concurrent read/write loop.
pub struct PeerConnection {
    pub addr: SocketAddr,
    /// The peer id the remote side presented. Tracker-provided ids are
    /// advisory, so it is recorded but never checked against anything.
    pub peer_id: Option<PeerId>,
    /// Whether the peer set the extension-protocol reserved bit.
    pub supports_extensions: bool,
    transport: PeerTransport,
}

impl PeerConnection {
    /// Dials `addr` and performs the handshake, all within the connect
    /// budget. The peer must echo our info hash or the connection is
    /// dropped with [`PeerError::InfoHashMismatch`].
    pub async fn connect(
        addr: SocketAddr,
        info_hash: [u8; 20],
        our_peer_id: PeerId,
    ) -> Result<Self, PeerError> {
        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| PeerError::Timeout)??;

        let mut transport = PeerTransport::new(stream);

        let handshake = Handshake::new(info_hash, *our_peer_id.as_bytes());
        let theirs = timeout(CONNECT_TIMEOUT, async {
            transport.send_handshake(&handshake).await?;
            transport.receive_handshake().await
        })
        .await
        .map_err(|_| PeerError::Timeout)??;

        if theirs.info_hash != info_hash {
            return Err(PeerError::InfoHashMismatch);
        }

        debug!(peer = %addr, ext = theirs.supports_extensions(), "handshake complete");

        Ok(Self {
            addr,
            peer_id: PeerId::from_bytes(&theirs.peer_id),
            supports_extensions: theirs.supports_extensions(),
            transport,
        })
    }

    /// Raises the frame cap once the torrent's bitfield length is known.
    pub fn set_max_frame_len(&mut self, max_frame: usize) {
        self.transport.set_max_frame_len(max_frame);
    }

    pub async fn send(&mut self, message: &Message) -> Result<(), PeerError> {
        self.transport.send(message).await
    }

    pub async fn receive(&mut self) -> Result<Message, PeerError> {
        self.transport.receive().await
    }

    /// Splits into framing halves for concurrent read/write.
    pub fn into_split(self) -> (FrameReader, FrameWriter) {
        self.transport.into_split()
    }
}
