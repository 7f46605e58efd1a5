use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::events::{BlockRequest, PeerCommand, PeerEvent, PeerKey};
use super::picker::PiecePicker;
use super::piece::{block_length, PieceAssembly};
use crate::constants::{REQUEST_TIMEOUT, SCHEDULER_TICK, STRIKE_LIMIT};
use crate::error::EngineError;
use crate::peer::Bitfield;
use crate::session::TransferStats;
use crate::storage::{PieceWrite, StorageError};

/// An in-flight piece: its assembly buffer plus which blocks are on the
/// wire and who supplied data for it.
struct PieceDownload {
    piece: u32,
    assembly: PieceAssembly,
    /// Block begins currently requested from some peer.
    requested: HashSet<u32>,
    /// Every peer that placed a block into the assembly. On a hash
    /// failure all of them take a strike.
    contributors: HashSet<PeerKey>,
}

impl PieceDownload {
    fn new(piece: u32, piece_len: u32, block_size: u32) -> Self {
        Self {
            piece,
            assembly: PieceAssembly::new(piece_len, block_size),
            requested: HashSet::new(),
            contributors: HashSet::new(),
        }
    }

    /// Claims the next unrequested block, ascending by offset.
    fn next_request(&mut self, block_size: u32) -> Option<BlockRequest> {
        let piece_len = self.assembly.piece_len();
        let mut begin = 0;
        while begin < piece_len {
            if !self.assembly.has_block(begin) && !self.requested.contains(&begin) {
                self.requested.insert(begin);
                return Some(BlockRequest {
                    piece: self.piece,
                    begin,
                    length: block_length(piece_len, block_size, begin),
                });
            }
            begin += block_size;
        }
        None
    }
}

struct Outstanding {
    length: u32,
    sent_at: Instant,
}

/// Scheduler-side view of one connected peer.
struct PeerBook {
    commands: mpsc::Sender<PeerCommand>,
    bitfield: Option<Bitfield>,
    peer_choking: bool,
    am_interested: bool,
    /// Requests on the wire, keyed by `(piece, begin)`.
    outstanding: HashMap<(u32, u32), Outstanding>,
    /// Pieces this peer is assigned to.
    assigned: Vec<u32>,
    strikes: u32,
}

impl PeerBook {
    fn new(commands: mpsc::Sender<PeerCommand>) -> Self {
        Self {
            commands,
            bitfield: None,
            peer_choking: true,
            am_interested: false,
            outstanding: HashMap::new(),
            assigned: Vec::new(),
            strikes: 0,
        }
    }
}

/// The piece scheduler task.
///
/// Owns all piece and peer bookkeeping; see the module docs for the
/// selection and verification policy. `run` consumes the scheduler and
/// resolves once every piece is complete, or with the first fatal
/// error.
pub struct Scheduler {
    piece_hashes: Vec<[u8; 20]>,
    piece_length: u64,
    total_length: u64,
    block_size: u32,
    pipeline_depth: usize,
    pieces_per_peer: usize,
    picker: PiecePicker,
    downloads: HashMap<u32, PieceDownload>,
    peers: HashMap<PeerKey, PeerBook>,
    inbox: mpsc::Receiver<PeerEvent>,
    storage: mpsc::Sender<PieceWrite>,
    stats: Arc<TransferStats>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        piece_hashes: Vec<[u8; 20]>,
        piece_length: u64,
        total_length: u64,
        block_size: u32,
        pipeline_depth: usize,
        pieces_per_peer: usize,
        inbox: mpsc::Receiver<PeerEvent>,
        storage: mpsc::Sender<PieceWrite>,
        stats: Arc<TransferStats>,
    ) -> Self {
        let picker = PiecePicker::new(piece_hashes.len());
        Self {
            piece_hashes,
            piece_length,
            total_length,
            block_size,
            pipeline_depth,
            pieces_per_peer,
            picker,
            downloads: HashMap::new(),
            peers: HashMap::new(),
            inbox,
            storage,
            stats,
        }
    }

    /// Runs the event loop to completion.
    pub async fn run(mut self) -> Result<(), EngineError> {
        let mut tick = interval(SCHEDULER_TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.picker.is_done() {
            tokio::select! {
                event = self.inbox.recv() => match event {
                    Some(event) => self.handle(event).await?,
                    // Every sender gone means the session tore down
                    // around us.
                    None => return Err(EngineError::Interrupted),
                },
                _ = tick.tick() => self.handle_tick(),
            }
        }

        info!("all pieces complete");
        for book in self.peers.values() {
            let _ = book.commands.try_send(PeerCommand::Disconnect);
        }
        Ok(())
    }

    async fn handle(&mut self, event: PeerEvent) -> Result<(), EngineError> {
        match event {
            PeerEvent::Connected { key, commands } => {
                self.peers.insert(key, PeerBook::new(commands));
            }
            PeerEvent::Bitfield { key, bitfield } => {
                if let Some(book) = self.peers.get_mut(&key) {
                    self.picker.add_bitfield(&bitfield);
                    book.bitfield = Some(bitfield);
                    self.update_interest(key);
                }
            }
            PeerEvent::Have { key, piece } => {
                if let Some(book) = self.peers.get_mut(&key) {
                    let bitfield = book
                        .bitfield
                        .get_or_insert_with(|| Bitfield::new(self.piece_hashes.len()));
                    if !bitfield.has_piece(piece as usize) {
                        bitfield.set_piece(piece as usize);
                        self.picker.add_have(piece);
                    }
                    self.update_interest(key);
                    self.fill_pipeline(key);
                }
            }
            PeerEvent::Unchoked { key } => {
                if let Some(book) = self.peers.get_mut(&key) {
                    book.peer_choking = false;
                    self.fill_pipeline(key);
                }
            }
            PeerEvent::Choked { key } => self.handle_choked(key),
            PeerEvent::Block {
                key,
                piece,
                begin,
                data,
            } => self.handle_block(key, piece, begin, data).await?,
            PeerEvent::Disconnected { key } => self.handle_disconnected(key),
        }
        Ok(())
    }

    fn handle_choked(&mut self, key: PeerKey) {
        let Some(book) = self.peers.get_mut(&key) else {
            return;
        };
        book.peer_choking = true;

        // Everything on the wire to this peer is forfeit; CANCELs would
        // be pointless since the peer won't serve a choked requester.
        for ((piece, begin), _) in book.outstanding.drain() {
            if let Some(download) = self.downloads.get_mut(&piece) {
                download.requested.remove(&begin);
            }
        }

        let released = std::mem::take(&mut book.assigned);
        for piece in released {
            self.picker.unassign(piece);
            self.prune_download(piece);
        }
    }

    async fn handle_block(
        &mut self,
        key: PeerKey,
        piece: u32,
        begin: u32,
        data: Bytes,
    ) -> Result<(), EngineError> {
        let Some(book) = self.peers.get_mut(&key) else {
            return Ok(());
        };

        // A block only counts when it answers an outstanding request;
        // unsolicited, duplicate, and stale data is dropped without
        // ceremony.
        let Some(outstanding) = book.outstanding.remove(&(piece, begin)) else {
            debug!(peer = %key, piece, begin, "unsolicited block discarded");
            return Ok(());
        };

        let completed = {
            let Some(download) = self.downloads.get_mut(&piece) else {
                return Ok(());
            };
            download.requested.remove(&begin);

            if outstanding.length as usize != data.len() {
                debug!(peer = %key, piece, begin, "block length mismatch discarded");
                false
            } else {
                match download.assembly.insert(begin, &data) {
                    Ok(complete) => {
                        download.contributors.insert(key);
                        self.stats.record_block(data.len() as u64);
                        complete
                    }
                    Err(reason) => {
                        debug!(peer = %key, piece, begin, ?reason, "block rejected");
                        false
                    }
                }
            }
        };

        if completed {
            self.finish_piece(piece).await?;
        }

        self.fill_pipeline(key);
        Ok(())
    }

    fn handle_disconnected(&mut self, key: PeerKey) {
        let Some(mut book) = self.peers.remove(&key) else {
            return;
        };

        if let Some(ref bitfield) = book.bitfield {
            self.picker.remove_bitfield(bitfield);
        }

        for ((piece, begin), _) in book.outstanding.drain() {
            if let Some(download) = self.downloads.get_mut(&piece) {
                download.requested.remove(&begin);
            }
        }

        for piece in book.assigned.drain(..) {
            self.picker.unassign(piece);
            self.prune_download(piece);
        }

        debug!(peer = %key, "peer removed from scheduler");
    }

    /// Reissues timed-out requests elsewhere and tops up pipelines.
    fn handle_tick(&mut self) {
        let now = Instant::now();
        let keys: Vec<PeerKey> = self.peers.keys().copied().collect();

        for &key in &keys {
            let Some(book) = self.peers.get_mut(&key) else {
                continue;
            };

            let expired: Vec<(u32, u32)> = book
                .outstanding
                .iter()
                .filter(|(_, req)| now.duration_since(req.sent_at) > REQUEST_TIMEOUT)
                .map(|(k, _)| *k)
                .collect();

            if expired.is_empty() {
                continue;
            }

            let mut pieces = HashSet::new();
            for (piece, begin) in expired {
                if let Some(req) = book.outstanding.remove(&(piece, begin)) {
                    let _ = book.commands.try_send(PeerCommand::Cancel(BlockRequest {
                        piece,
                        begin,
                        length: req.length,
                    }));
                }
                if let Some(download) = self.downloads.get_mut(&piece) {
                    download.requested.remove(&begin);
                }
                pieces.insert(piece);
            }

            // Give up the affected pieces entirely so another peer
            // picks them up; this peer can earn new work if it ever
            // answers again.
            for piece in pieces {
                warn!(peer = %key, piece, "block requests timed out");
                if let Some(pos) = book.assigned.iter().position(|&p| p == piece) {
                    book.assigned.swap_remove(pos);
                    self.picker.unassign(piece);
                }
            }
        }

        for key in keys {
            self.fill_pipeline(key);
        }
    }

    async fn finish_piece(&mut self, piece: u32) -> Result<(), EngineError> {
        let Some(download) = self.downloads.remove(&piece) else {
            return Ok(());
        };

        let expected = &self.piece_hashes[piece as usize];
        if !download.assembly.verify(expected) {
            warn!(piece, "piece failed hash verification, discarding");

            for contributor in &download.contributors {
                if let Some(book) = self.peers.get_mut(contributor) {
                    book.strikes += 1;
                    if book.strikes >= STRIKE_LIMIT {
                        warn!(peer = %contributor, "strike limit reached, disconnecting");
                        let _ = book.commands.try_send(PeerCommand::Disconnect);
                    }
                }
            }

            // The piece reverts to missing: drop every assignment and
            // any duplicate requests still on the wire.
            for book in self.peers.values_mut() {
                while let Some(pos) = book.assigned.iter().position(|&p| p == piece) {
                    book.assigned.swap_remove(pos);
                    self.picker.unassign(piece);
                }
                book.outstanding.retain(|&(p, _), _| p != piece);
            }

            return Ok(());
        }

        self.picker.mark_complete(piece);
        self.stats.record_piece();
        info!(
            piece,
            done = self.picker.complete_count(),
            total = self.picker.piece_count(),
            "piece verified"
        );

        // Release every assignment, cancel tail duplicates, announce
        // the piece, and drop interest in peers with nothing left for
        // us.
        for book in self.peers.values_mut() {
            while let Some(pos) = book.assigned.iter().position(|&p| p == piece) {
                book.assigned.swap_remove(pos);
                self.picker.unassign(piece);
            }

            let stale: Vec<(u32, u32)> = book
                .outstanding
                .keys()
                .filter(|&&(p, _)| p == piece)
                .copied()
                .collect();
            for (p, b) in stale {
                if let Some(req) = book.outstanding.remove(&(p, b)) {
                    let _ = book.commands.try_send(PeerCommand::Cancel(BlockRequest {
                        piece: p,
                        begin: b,
                        length: req.length,
                    }));
                }
            }

            let _ = book.commands.try_send(PeerCommand::Have(piece));

            if book.am_interested {
                let wants = book
                    .bitfield
                    .as_ref()
                    .map(|bf| self.picker.wants_any(bf))
                    .unwrap_or(false);
                if !wants {
                    book.am_interested = false;
                    let _ = book.commands.try_send(PeerCommand::SetInterested(false));
                }
            }
        }

        // The HAVE is broadcast once the write is enqueued, not once it
        // hits disk; storage failure still ends the session.
        self.storage
            .send(PieceWrite {
                index: piece,
                data: download.assembly.into_bytes(),
            })
            .await
            .map_err(|_| EngineError::Storage(StorageError::Closed))?;

        Ok(())
    }

    /// Tops a peer's pipeline up to the configured depth, assigning new
    /// pieces as needed.
    fn fill_pipeline(&mut self, key: PeerKey) {
        let now = Instant::now();
        let Some(book) = self.peers.get_mut(&key) else {
            return;
        };
        if book.peer_choking || !book.am_interested {
            return;
        }
        let Some(bitfield) = book.bitfield.clone() else {
            return;
        };

        let mut batch: Vec<BlockRequest> = Vec::new();

        'fill: while book.outstanding.len() + batch.len() < self.pipeline_depth {
            for &piece in &book.assigned {
                if let Some(download) = self.downloads.get_mut(&piece) {
                    if let Some(request) = download.next_request(self.block_size) {
                        batch.push(request);
                        continue 'fill;
                    }
                }
            }

            if book.assigned.len() >= self.pieces_per_peer {
                break;
            }
            let Some(piece) = self.picker.pick(&bitfield, self.pieces_per_peer as u8) else {
                break;
            };

            self.picker.assign(piece);
            book.assigned.push(piece);
            let start = piece as u64 * self.piece_length;
            let piece_len = ((self.total_length - start).min(self.piece_length)) as u32;
            let block_size = self.block_size;
            self.downloads
                .entry(piece)
                .or_insert_with(|| PieceDownload::new(piece, piece_len, block_size));
        }

        if batch.is_empty() {
            return;
        }

        for request in &batch {
            book.outstanding.insert(
                (request.piece, request.begin),
                Outstanding {
                    length: request.length,
                    sent_at: now,
                },
            );
        }

        if let Err(e) = book.commands.try_send(PeerCommand::Request(batch.clone())) {
            // Peer task backed up or gone; undo so the blocks are
            // requestable elsewhere. A Disconnected event follows if
            // the peer is truly dead.
            debug!(peer = %key, error = %e, "request batch dropped");
            for request in &batch {
                book.outstanding.remove(&(request.piece, request.begin));
                if let Some(download) = self.downloads.get_mut(&request.piece) {
                    download.requested.remove(&request.begin);
                }
            }
        }
    }

    fn update_interest(&mut self, key: PeerKey) {
        let Some(book) = self.peers.get_mut(&key) else {
            return;
        };
        let wants = book
            .bitfield
            .as_ref()
            .map(|bf| self.picker.wants_any(bf))
            .unwrap_or(false);
        if wants != book.am_interested {
            book.am_interested = wants;
            let _ = book.commands.try_send(PeerCommand::SetInterested(wants));
        }
    }

    /// Drops an in-flight piece that has no assignees and no data yet,
    /// returning it cleanly to missing.
    fn prune_download(&mut self, piece: u32) {
        if self.picker.assignees(piece) == 0 {
            if let Some(download) = self.downloads.get(&piece) {
                if download.assembly.blocks_received() == 0 && download.requested.is_empty() {
                    self.downloads.remove(&piece);
                }
            }
        }
    }

    fn piece_len(&self, piece: u32) -> u32 {
        let start = piece as u64 * self.piece_length;
        ((self.total_length - start).min(self.piece_length)) as u32
    }
}
