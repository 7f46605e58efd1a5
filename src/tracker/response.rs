use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Lifecycle event reported with an announce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerEvent {
    /// Regular interval announce (no event parameter).
    None,
    /// First announce of a session.
    Started,
    /// Sent when the torrent is removed.
    Stopped,
    /// Sent once the download finishes.
    Completed,
}

impl TrackerEvent {
    /// HTTP query value; empty means the parameter is omitted.
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerEvent::None => "",
            TrackerEvent::Started => "started",
            TrackerEvent::Stopped => "stopped",
            TrackerEvent::Completed => "completed",
        }
    }

    /// BEP-15 event code.
    pub fn as_udp_id(&self) -> u32 {
        match self {
            TrackerEvent::None => 0,
            TrackerEvent::Completed => 1,
            TrackerEvent::Started => 2,
            TrackerEvent::Stopped => 3,
        }
    }
}

/// A successful announce: the swarm interval and the peers to dial.
#[derive(Debug, Clone)]
pub struct AnnounceResponse {
    /// Seconds until the tracker wants the next announce.
    pub interval: u32,
    /// Optional floor on the announce cadence.
    pub min_interval: Option<u32>,
    /// Seeder count, when reported.
    pub complete: Option<u32>,
    /// Leecher count, when reported.
    pub incomplete: Option<u32>,
    /// Peer addresses.
    pub peers: Vec<SocketAddr>,
}

impl AnnounceResponse {
    pub fn new(interval: u32) -> Self {
        Self {
            interval,
            min_interval: None,
            complete: None,
            incomplete: None,
            peers: Vec::new(),
        }
    }
}

/// Parses a BEP-23 compact peer list: six bytes per peer, four for the
/// IPv4 address and two for the big-endian port. A trailing fragment is
/// ignored.
pub fn parse_compact_peers(data: &[u8]) -> Vec<SocketAddr> {
    data.chunks_exact(6)
        .map(|chunk| {
            let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
            let port = u16::from_be_bytes([chunk[4], chunk[5]]);
            SocketAddr::new(IpAddr::V4(ip), port)
        })
        .collect()
}
