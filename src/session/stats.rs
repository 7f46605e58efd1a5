use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::events::Progress;

/// Window over which the download rate is measured.
const RATE_WINDOW: Duration = Duration::from_secs(10);

struct Counters {
    pieces_done: usize,
    bytes_done: u64,
    peers_connected: usize,
    peers_seen: usize,
    /// Recent block arrivals, for the rate window.
    arrivals: VecDeque<(Instant, u64)>,
}

/// Shared transfer accounting.
///
/// Written by the scheduler (blocks, pieces) and the session (peer
/// counts), read by the progress emitter. Small and lock-cheap; every
/// operation is a few machine words under a `parking_lot` mutex.
pub struct TransferStats {
    started: Instant,
    counters: Mutex<Counters>,
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            counters: Mutex::new(Counters {
                pieces_done: 0,
                bytes_done: 0,
                peers_connected: 0,
                peers_seen: 0,
                arrivals: VecDeque::new(),
            }),
        }
    }

    pub fn record_block(&self, bytes: u64) {
        let now = Instant::now();
        let mut counters = self.counters.lock();
        counters.bytes_done += bytes;
        counters.arrivals.push_back((now, bytes));
        while let Some(&(t, _)) = counters.arrivals.front() {
            if now.duration_since(t) > RATE_WINDOW {
                counters.arrivals.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn record_piece(&self) {
        self.counters.lock().pieces_done += 1;
    }

    pub fn peer_connected(&self) {
        self.counters.lock().peers_connected += 1;
    }

    pub fn peer_gone(&self) {
        let mut counters = self.counters.lock();
        counters.peers_connected = counters.peers_connected.saturating_sub(1);
    }

    /// Total distinct peer addresses discovered so far.
    pub fn set_peers_seen(&self, seen: usize) {
        self.counters.lock().peers_seen = seen;
    }

    pub fn bytes_done(&self) -> u64 {
        self.counters.lock().bytes_done
    }

    pub fn snapshot(&self, pieces_total: usize, bytes_total: u64) -> Progress {
        let now = Instant::now();
        let counters = self.counters.lock();

        let windowed: u64 = counters
            .arrivals
            .iter()
            .filter(|(t, _)| now.duration_since(*t) <= RATE_WINDOW)
            .map(|&(_, b)| b)
            .sum();
        let span = counters
            .arrivals
            .front()
            .map(|&(t, _)| now.duration_since(t))
            .unwrap_or_default()
            .min(RATE_WINDOW);
        let download_rate_bps = if span.as_secs_f64() > 0.0 {
            windowed as f64 / span.as_secs_f64()
        } else {
            0.0
        };

        Progress {
            pieces_done: counters.pieces_done,
            pieces_total,
            bytes_done: counters.bytes_done,
            bytes_total,
            peers_connected: counters.peers_connected,
            peers_total_seen: counters.peers_seen,
            download_rate_bps,
            elapsed: now.duration_since(self.started),
        }
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}
