use std::time::Duration;

/// A progress snapshot, emitted at least once per second while the
/// download is active.
#[derive(Debug, Clone)]
pub struct Progress {
    pub pieces_done: usize,
    pub pieces_total: usize,
    pub bytes_done: u64,
    pub bytes_total: u64,
    pub peers_connected: usize,
    pub peers_total_seen: usize,
    /// Download rate over the recent window, in bytes per second.
    pub download_rate_bps: f64,
    pub elapsed: Duration,
}

/// Events published to the UI collaborator.
///
/// Progress events are droppable: a lagging subscriber loses the
/// oldest ones. The terminal outcome also comes back as the return
/// value of the download call itself.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Progress(Progress),
    Completed,
    Failed { message: String },
}
