use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use dashmap::DashSet;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::config::Config;
use crate::constants::{
    ANNOUNCE_NUMWANT, METADATA_FETCH_TIMEOUT, METADATA_PEER_LIMIT, METADATA_REQUEST_TIMEOUT,
};
use crate::error::EngineError;
use crate::metainfo::{InfoHash, MagnetLink};
use crate::peer::{
    metadata_piece_count, metadata_piece_size, ExtensionHandshake, Message, MetadataMessage,
    MetadataMessageType, PeerConnection, PeerError, PeerId, EXTENSION_HANDSHAKE_ID, UT_METADATA,
};
use crate::tracker::{announce_any, Announce, TrackerEvent};

/// Upper bound on an advertised metadata size. Real info dictionaries
/// are a few hundred KiB at most; anything past this is a hostile peer.
const MAX_METADATA_SIZE: usize = 8 * 1024 * 1024;

/// The shared assembly the fetch tasks fill in.
struct Assembly {
    total_size: Option<usize>,
    pieces: Vec<Option<Bytes>>,
    /// Piece indices some task is currently fetching.
    claimed: HashSet<usize>,
    /// Which peer supplied each stored piece.
    suppliers: HashMap<usize, SocketAddr>,
}

impl Assembly {
    fn new() -> Self {
        Self {
            total_size: None,
            pieces: Vec::new(),
            claimed: HashSet::new(),
            suppliers: HashMap::new(),
        }
    }

    /// Adopts a peer's advertised size, or checks it against the one
    /// already adopted.
    fn accept_size(&mut self, size: usize) -> bool {
        match self.total_size {
            None => {
                self.total_size = Some(size);
                self.pieces = vec![None; metadata_piece_count(size)];
                true
            }
            Some(existing) => existing == size,
        }
    }

    fn claim_next(&mut self) -> Option<usize> {
        let next = self
            .pieces
            .iter()
            .enumerate()
            .find(|(i, piece)| piece.is_none() && !self.claimed.contains(i))
            .map(|(i, _)| i)?;
        self.claimed.insert(next);
        Some(next)
    }

    fn store(&mut self, piece: usize, data: Bytes, from: SocketAddr) {
        self.claimed.remove(&piece);
        if let Some(slot) = self.pieces.get_mut(piece) {
            *slot = Some(data);
            self.suppliers.insert(piece, from);
        }
    }

    fn unclaim(&mut self, piece: usize) {
        self.claimed.remove(&piece);
    }

    fn is_complete(&self) -> bool {
        !self.pieces.is_empty() && self.pieces.iter().all(Option::is_some)
    }

    fn assemble(&self) -> Bytes {
        let mut out = BytesMut::new();
        for piece in self.pieces.iter().flatten() {
            out.extend_from_slice(piece);
        }
        out.freeze()
    }

    /// Throws the whole assembly away after a failed verification and
    /// returns the peers that contributed to it.
    fn discard(&mut self) -> Vec<SocketAddr> {
        let culprits = self.suppliers.values().copied().collect();
        for slot in self.pieces.iter_mut() {
            *slot = None;
        }
        self.claimed.clear();
        self.suppliers.clear();
        culprits
    }
}

/// Fetches and verifies the info dictionary for a magnet link (BEP-9).
///
/// Peers come from the magnet's trackers; up to [`METADATA_PEER_LIMIT`]
/// of them are worked in parallel, each claiming the next missing
/// metadata piece. An assembly that fails the info-hash check is
/// discarded wholesale and its contributors are blacklisted for the
/// session.
pub(super) async fn fetch_metadata(
    magnet: &MagnetLink,
    peer_id: PeerId,
    config: &Config,
) -> Result<Bytes, EngineError> {
    let request = Announce {
        info_hash: *magnet.info_hash.as_bytes(),
        peer_id: *peer_id.as_bytes(),
        port: config.listen_port,
        uploaded: 0,
        downloaded: 0,
        // Unknown until we have the metadata.
        left: 0,
        event: TrackerEvent::Started,
        numwant: ANNOUNCE_NUMWANT,
    };

    let response = announce_any(&magnet.trackers, &request).await?;
    if response.peers.is_empty() {
        return Err(EngineError::NoPeers);
    }

    info!(
        peers = response.peers.len(),
        info_hash = %magnet.info_hash,
        "fetching metadata from swarm"
    );

    let assembly = Arc::new(Mutex::new(Assembly::new()));
    let blacklist: Arc<DashSet<SocketAddr>> = Arc::new(DashSet::new());
    let (result_tx, mut result_rx) = mpsc::channel(1);

    for &addr in response.peers.iter().take(METADATA_PEER_LIMIT) {
        let assembly = assembly.clone();
        let blacklist = blacklist.clone();
        let result_tx = result_tx.clone();
        let info_hash = magnet.info_hash;

        tokio::spawn(async move {
            if let Err(e) =
                fetch_from_peer(addr, info_hash, peer_id, assembly, blacklist, result_tx).await
            {
                debug!(peer = %addr, error = %e, "metadata peer failed");
            }
        });
    }
    drop(result_tx);

    match timeout(METADATA_FETCH_TIMEOUT, result_rx.recv()).await {
        Ok(Some(metadata)) => Ok(metadata),
        // Every task gave up, or nobody delivered in time.
        Ok(None) => Err(EngineError::NoPeers),
        Err(_) => Err(EngineError::NoPeers),
    }
}

async fn fetch_from_peer(
    addr: SocketAddr,
    info_hash: InfoHash,
    peer_id: PeerId,
    assembly: Arc<Mutex<Assembly>>,
    blacklist: Arc<DashSet<SocketAddr>>,
    result_tx: mpsc::Sender<Bytes>,
) -> Result<(), PeerError> {
    if blacklist.contains(&addr) {
        return Ok(());
    }

    let mut connection = PeerConnection::connect(addr, *info_hash.as_bytes(), peer_id).await?;
    if !connection.supports_extensions {
        return Ok(());
    }

    connection
        .send(&Message::Extended {
            id: EXTENSION_HANDSHAKE_ID,
            payload: ExtensionHandshake::ours().encode(),
        })
        .await?;

    let theirs = timeout(
        METADATA_REQUEST_TIMEOUT,
        receive_extension_handshake(&mut connection),
    )
    .await
    .map_err(|_| PeerError::Timeout)??;

    let Some(ut_metadata) = theirs.extension_id(UT_METADATA) else {
        return Ok(());
    };
    let size = match theirs.metadata_size {
        Some(size) if size > 0 && (size as usize) <= MAX_METADATA_SIZE => size as usize,
        _ => return Ok(()),
    };

    if !assembly.lock().accept_size(size) {
        debug!(peer = %addr, size, "metadata size disagrees, skipping peer");
        return Ok(());
    }

    loop {
        if blacklist.contains(&addr) || result_tx.is_closed() {
            return Ok(());
        }

        let Some(piece) = assembly.lock().claim_next() else {
            return Ok(());
        };

        let request = MetadataMessage::request(piece as u32);
        if let Err(e) = connection
            .send(&Message::Extended {
                id: ut_metadata,
                payload: request.encode(),
            })
            .await
        {
            assembly.lock().unclaim(piece);
            return Err(e);
        }

        let reply = match timeout(
            METADATA_REQUEST_TIMEOUT,
            receive_metadata_message(&mut connection),
        )
        .await
        {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                assembly.lock().unclaim(piece);
                return Err(e);
            }
            Err(_) => {
                assembly.lock().unclaim(piece);
                return Err(PeerError::Timeout);
            }
        };

        match reply.msg_type {
            MetadataMessageType::Data if reply.piece as usize == piece => {
                let data = reply.data.unwrap_or_default();
                if data.len() != metadata_piece_size(piece as u32, size) {
                    assembly.lock().unclaim(piece);
                    return Err(PeerError::Extension("metadata piece length".into()));
                }

                let verified = {
                    let mut assembly = assembly.lock();
                    assembly.store(piece, data, addr);
                    if assembly.is_complete() {
                        let bytes = assembly.assemble();
                        if InfoHash::of(&bytes) == info_hash {
                            Some(bytes)
                        } else {
                            let culprits = assembly.discard();
                            warn!(
                                peers = culprits.len(),
                                "assembled metadata failed info-hash check"
                            );
                            for culprit in culprits {
                                blacklist.insert(culprit);
                            }
                            None
                        }
                    } else {
                        None
                    }
                };

                if let Some(bytes) = verified {
                    info!(bytes = bytes.len(), "metadata verified");
                    let _ = result_tx.send(bytes).await;
                    return Ok(());
                }

                if blacklist.contains(&addr) {
                    return Ok(());
                }
            }
            MetadataMessageType::Reject => {
                assembly.lock().unclaim(piece);
                debug!(peer = %addr, piece, "metadata piece rejected");
                return Ok(());
            }
            _ => {
                assembly.lock().unclaim(piece);
                return Err(PeerError::Extension("unexpected metadata reply".into()));
            }
        }
    }
}

/// Reads until the peer's extension handshake shows up, skipping the
/// regular torrent chatter (bitfield, have, choke) that may precede it.
async fn receive_extension_handshake(
    connection: &mut PeerConnection,
) -> Result<ExtensionHandshake, PeerError> {
    loop {
        if let Message::Extended { id, payload } = connection.receive().await? {
            if id == EXTENSION_HANDSHAKE_ID {
                return ExtensionHandshake::decode(&payload);
            }
        }
    }
}

/// Reads until a ut_metadata message addressed to us arrives.
async fn receive_metadata_message(
    connection: &mut PeerConnection,
) -> Result<MetadataMessage, PeerError> {
    use crate::peer::OUR_UT_METADATA_ID;

    loop {
        if let Message::Extended { id, payload } = connection.receive().await? {
            if id == OUR_UT_METADATA_ID {
                return MetadataMessage::decode(&payload);
            }
        }
    }
}
