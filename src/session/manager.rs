use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::interval;
use tracing::{debug, info, warn};

use super::config::Config;
use super::events::SessionEvent;
use super::metadata::fetch_metadata;
use super::stats::TransferStats;
use super::worker::{run_peer, WorkerContext};
use crate::constants::{
    ANNOUNCE_NUMWANT, FAILED_PEER_BACKOFF, FRAME_SLACK, MIN_ANNOUNCE_INTERVAL, PROGRESS_INTERVAL,
};
use crate::error::EngineError;
use crate::metainfo::{MagnetLink, Metainfo};
use crate::peer::PeerId;
use crate::scheduler::{PeerEvent, Scheduler};
use crate::storage::{FileLayout, PieceWrite, StorageError, StorageWriter};
use crate::tracker::{announce_any, Announce, TrackerEvent};

/// What to download: a `.torrent` file on disk or a magnet link.
#[derive(Debug, Clone)]
pub enum TorrentSource {
    TorrentFile(PathBuf),
    Magnet(String),
}

impl TorrentSource {
    /// Classifies user input: magnet URIs by their scheme, anything
    /// else as a path to a metainfo file.
    pub fn parse(input: &str) -> Self {
        if input.starts_with("magnet:") {
            TorrentSource::Magnet(input.to_string())
        } else {
            TorrentSource::TorrentFile(PathBuf::from(input))
        }
    }
}

/// Lets the embedding application stop a running download; the session
/// then cancels its peers, flushes storage, and reports `Interrupted`.
#[derive(Clone)]
pub struct ShutdownHandle {
    signal: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.signal.send(true);
    }
}

/// A one-shot download session.
///
/// # Examples
///
/// ```no_run
/// use bitflood::session::{Config, Session, TorrentSource};
///
/// # async fn example() -> Result<(), bitflood::EngineError> {
/// let session = Session::new(Config {
///     output_dir: "./downloads".into(),
///     ..Config::default()
/// })?;
///
/// let mut events = session.subscribe();
/// tokio::spawn(async move {
///     while let Ok(event) = events.recv().await {
///         println!("{:?}", event);
///     }
/// });
///
/// session
///     .download(TorrentSource::parse("example.torrent"))
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct Session {
    config: Config,
    peer_id: PeerId,
    stats: Arc<TransferStats>,
    events: broadcast::Sender<SessionEvent>,
    signal: Arc<watch::Sender<bool>>,
}

impl Session {
    pub fn new(config: Config) -> Result<Self, EngineError> {
        config.validate()?;
        let (events, _) = broadcast::channel(256);
        let (signal, _) = watch::channel(false);
        Ok(Self {
            config,
            peer_id: PeerId::generate(),
            stats: Arc::new(TransferStats::new()),
            events,
            signal: Arc::new(signal),
        })
    }

    /// Subscribes to progress and terminal events. Lagging receivers
    /// lose the oldest events rather than slowing the engine.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            signal: self.signal.clone(),
        }
    }

    /// Runs the download to completion, emitting the terminal event on
    /// the way out.
    pub async fn download(&self, source: TorrentSource) -> Result<(), EngineError> {
        let result = self.run(source).await;
        let terminal = match &result {
            Ok(()) => SessionEvent::Completed,
            Err(e) => SessionEvent::Failed {
                message: e.to_string(),
            },
        };
        let _ = self.events.send(terminal);
        result
    }

    async fn run(&self, source: TorrentSource) -> Result<(), EngineError> {
        let metainfo = self.resolve(source).await?;

        let info_hash = *metainfo.info_hash.as_bytes();
        let piece_count = metainfo.info.piece_count();
        let total = metainfo.info.total_length;
        let trackers = metainfo.trackers();

        info!(
            name = %metainfo.info.name,
            info_hash = %metainfo.info_hash,
            pieces = piece_count,
            bytes = total,
            "starting download"
        );

        // Bootstrap announce: the first tracker that answers supplies
        // the initial peer set; total failure here is fatal.
        let announce_base = Announce {
            info_hash,
            peer_id: *self.peer_id.as_bytes(),
            port: self.config.listen_port,
            uploaded: 0,
            downloaded: 0,
            left: total,
            event: TrackerEvent::Started,
            numwant: ANNOUNCE_NUMWANT,
        };
        let first = announce_any(&trackers, &announce_base).await?;

        let mut known: HashSet<SocketAddr> = first.peers.iter().copied().collect();
        self.stats.set_peers_seen(known.len());
        info!(peers = known.len(), interval = first.interval, "swarm joined");

        // Storage writer.
        let layout = FileLayout::new(
            metainfo.info.files.clone(),
            metainfo.info.piece_length,
            total,
        )?;
        let writer = StorageWriter::create(self.config.output_dir.clone(), layout).await?;
        let (storage_tx, storage_rx) = mpsc::channel::<PieceWrite>(64);
        let mut storage_task: JoinHandle<Result<(), StorageError>> =
            tokio::spawn(writer.run(storage_rx));

        // Scheduler.
        let (events_tx, events_rx) = mpsc::channel::<PeerEvent>(1024);
        let scheduler = Scheduler::new(
            metainfo.info.pieces.clone(),
            metainfo.info.piece_length,
            total,
            self.config.block_size,
            self.config.pipeline_depth,
            self.config.pieces_per_peer,
            events_rx,
            storage_tx.clone(),
            self.stats.clone(),
        );
        let mut scheduler_task = tokio::spawn(scheduler.run());

        // Re-announces run in the background and feed fresh peers in.
        let (peers_tx, mut peers_rx) = mpsc::channel::<Vec<SocketAddr>>(16);
        let announce_interval = self
            .config
            .announce_interval_override
            .unwrap_or(Duration::from_secs(first.interval as u64))
            .max(MIN_ANNOUNCE_INTERVAL);
        tokio::spawn(announcer(
            trackers,
            announce_base,
            total,
            self.stats.clone(),
            self.config.announce_interval_override,
            announce_interval,
            peers_tx,
            self.signal.subscribe(),
        ));

        // Peer workers.
        let failed: Arc<DashMap<SocketAddr, Instant>> = Arc::new(DashMap::new());
        let mut active: HashSet<SocketAddr> = HashSet::new();
        let mut workers: JoinSet<SocketAddr> = JoinSet::new();

        let bitfield_frame = piece_count.div_ceil(8) + 1;
        let max_frame =
            (self.config.block_size as usize + 13).max(bitfield_frame) + FRAME_SLACK;

        let seed = WorkerSeed {
            info_hash,
            peer_id: self.peer_id,
            piece_count,
            max_frame,
            events: events_tx,
            stats: self.stats.clone(),
            failed,
            signal: self.signal.clone(),
            max_peers: self.config.max_peers,
        };

        launch_peers(&mut workers, &mut active, &known, &seed);

        let mut progress = interval(PROGRESS_INTERVAL);
        let mut shutdown = self.signal.subscribe();

        loop {
            tokio::select! {
                result = &mut scheduler_task => {
                    match result {
                        Ok(Ok(())) => break,
                        Ok(Err(e)) => {
                            // When the scheduler died because storage
                            // closed, the writer's own error names the
                            // real cause.
                            if matches!(e, EngineError::Storage(_)) {
                                drop(seed);
                                drop(storage_tx);
                                if let Ok(Err(storage_err)) = storage_task.await {
                                    return Err(storage_err.into());
                                }
                            }
                            return Err(e);
                        }
                        Err(_) => return Err(EngineError::Interrupted),
                    }
                }
                result = &mut storage_task => {
                    scheduler_task.abort();
                    let err = match result {
                        Ok(Err(e)) => e,
                        _ => StorageError::Closed,
                    };
                    return Err(err.into());
                }
                _ = shutdown.changed() => {
                    info!("shutdown requested");
                    scheduler_task.abort();
                    workers.shutdown().await;
                    drop(seed);
                    drop(storage_tx);
                    let _ = storage_task.await;
                    return Err(EngineError::Interrupted);
                }
                _ = progress.tick() => {
                    let _ = self.events.send(SessionEvent::Progress(
                        self.stats.snapshot(piece_count, total),
                    ));
                    // Backed-off peers become dialable again over time.
                    launch_peers(&mut workers, &mut active, &known, &seed);
                }
                Some(peers) = peers_rx.recv() => {
                    let before = known.len();
                    known.extend(peers);
                    if known.len() != before {
                        self.stats.set_peers_seen(known.len());
                        debug!(known = known.len(), "peer list grew");
                    }
                    launch_peers(&mut workers, &mut active, &known, &seed);
                }
                Some(finished) = workers.join_next() => {
                    if let Ok(addr) = finished {
                        active.remove(&addr);
                    }
                    launch_peers(&mut workers, &mut active, &known, &seed);
                }
            }
        }

        info!("download complete, flushing storage");
        workers.shutdown().await;
        drop(seed);
        drop(storage_tx);
        storage_task
            .await
            .unwrap_or(Err(StorageError::Closed))?;

        Ok(())
    }

    /// Turns the source into a parsed metainfo, fetching the info
    /// dictionary from the swarm for magnet links.
    async fn resolve(&self, source: TorrentSource) -> Result<Metainfo, EngineError> {
        match source {
            TorrentSource::TorrentFile(path) => Ok(Metainfo::load(&path).await?),
            TorrentSource::Magnet(uri) => {
                let magnet = MagnetLink::parse(&uri)?;
                info!(
                    info_hash = %magnet.info_hash,
                    name = magnet.display_name.as_deref().unwrap_or("?"),
                    "resolving magnet link"
                );
                let metadata = fetch_metadata(&magnet, self.peer_id, &self.config).await?;
                Ok(Metainfo::from_info_bytes(
                    &metadata,
                    &magnet.trackers,
                    magnet.info_hash,
                )?)
            }
        }
    }
}

/// The cloneable ingredients every peer worker starts from.
struct WorkerSeed {
    info_hash: [u8; 20],
    peer_id: PeerId,
    piece_count: usize,
    max_frame: usize,
    events: mpsc::Sender<PeerEvent>,
    stats: Arc<TransferStats>,
    failed: Arc<DashMap<SocketAddr, Instant>>,
    signal: Arc<watch::Sender<bool>>,
    max_peers: usize,
}

impl WorkerSeed {
    fn context(&self) -> WorkerContext {
        WorkerContext {
            info_hash: self.info_hash,
            peer_id: self.peer_id,
            piece_count: self.piece_count,
            max_frame: self.max_frame,
            events: self.events.clone(),
            stats: self.stats.clone(),
            failed: self.failed.clone(),
            shutdown: self.signal.subscribe(),
        }
    }
}

/// Dials every known, idle, non-backed-off peer up to the cap.
fn launch_peers(
    workers: &mut JoinSet<SocketAddr>,
    active: &mut HashSet<SocketAddr>,
    known: &HashSet<SocketAddr>,
    seed: &WorkerSeed,
) {
    for &addr in known {
        if active.len() >= seed.max_peers {
            break;
        }
        if active.contains(&addr) {
            continue;
        }
        if let Some(last_failure) = seed.failed.get(&addr) {
            if last_failure.elapsed() < FAILED_PEER_BACKOFF {
                continue;
            }
        }

        active.insert(addr);
        workers.spawn(run_peer(addr, seed.context()));
    }
}

/// Periodic re-announce loop: keeps the tracker informed and feeds any
/// newly discovered peers back to the session.
#[allow(clippy::too_many_arguments)]
async fn announcer(
    trackers: Vec<String>,
    base: Announce,
    total: u64,
    stats: Arc<TransferStats>,
    interval_override: Option<Duration>,
    initial_interval: Duration,
    peers_tx: mpsc::Sender<Vec<SocketAddr>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut wait = initial_interval;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shutdown.changed() => return,
            _ = peers_tx.closed() => return,
        }

        let downloaded = stats.bytes_done();
        let request = Announce {
            downloaded,
            left: total.saturating_sub(downloaded),
            event: TrackerEvent::None,
            ..base
        };

        match announce_any(&trackers, &request).await {
            Ok(response) => {
                wait = interval_override
                    .unwrap_or(Duration::from_secs(response.interval as u64))
                    .max(MIN_ANNOUNCE_INTERVAL);
                if peers_tx.send(response.peers).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!(error = %e, "re-announce failed");
                wait = MIN_ANNOUNCE_INTERVAL * 2;
            }
        }
    }
}
