use tracing::{debug, warn};

use super::error::TrackerError;
use super::http::HttpTracker;
use super::response::{AnnounceResponse, TrackerEvent};
use super::udp::UdpTracker;

/// Parameters of one announce, shared by both tracker schemes.
#[derive(Debug, Clone, Copy)]
pub struct Announce {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    pub left: u64,
    pub event: TrackerEvent,
    /// How many peers to ask for; -1 lets the tracker decide.
    pub numwant: i32,
}

/// Announces to a single tracker, dispatching on the URL scheme.
pub async fn announce_url(url: &str, req: &Announce) -> Result<AnnounceResponse, TrackerError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        HttpTracker::new(url)?.announce(req).await
    } else if url.starts_with("udp://") {
        UdpTracker::connect(url).await?.announce(req).await
    } else {
        Err(TrackerError::InvalidUrl(url.to_string()))
    }
}

/// Announces to trackers in order and returns the first response that
/// works. Individual failures are logged and skipped; if every tracker
/// fails the announce is [`TrackerError::Unreachable`].
pub async fn announce_any(urls: &[String], req: &Announce) -> Result<AnnounceResponse, TrackerError> {
    for url in urls {
        debug!(url, "announcing");
        match announce_url(url, req).await {
            Ok(response) => {
                debug!(
                    url,
                    peers = response.peers.len(),
                    interval = response.interval,
                    "announce ok"
                );
                return Ok(response);
            }
            Err(e) => {
                warn!(url, error = %e, "tracker failed");
            }
        }
    }

    Err(TrackerError::Unreachable)
}
