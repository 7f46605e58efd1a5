use std::net::SocketAddr;
use std::time::Instant;

use bytes::{Buf, BufMut, BytesMut};
use rand::Rng as _;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::timeout;
use tracing::debug;

use super::announce::Announce;
use super::error::TrackerError;
use super::response::{parse_compact_peers, AnnounceResponse};
use crate::constants::{
    UDP_BASE_TIMEOUT, UDP_CONNECTION_TTL, UDP_MAX_ATTEMPTS, UDP_PROTOCOL_ID,
};

const ACTION_CONNECT: u32 = 0;
const ACTION_ANNOUNCE: u32 = 1;
const ACTION_ERROR: u32 = 3;

/// A UDP tracker client (BEP-15).
///
/// Announcing is a two-step exchange: a connect request yields a 64-bit
/// connection id, which authorises announce requests for one minute.
/// Lost packets are retransmitted on the BEP-15 schedule: attempt `n`
/// waits `15 * 2^n` seconds, for at most eight attempts.
pub struct UdpTracker {
    socket: UdpSocket,
    addr: SocketAddr,
    connection: Option<(u64, Instant)>,
}

impl UdpTracker {
    /// Resolves a `udp://host:port` URL and binds a local socket.
    pub async fn connect(url: &str) -> Result<Self, TrackerError> {
        let authority = parse_udp_url(url)?;

        let addr = lookup_host(authority)
            .await?
            .find(SocketAddr::is_ipv4)
            .ok_or_else(|| TrackerError::InvalidUrl(url.to_string()))?;

        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(addr).await?;

        Ok(Self {
            socket,
            addr,
            connection: None,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Runs a full announce, obtaining or refreshing the connection id
    /// as needed.
    pub async fn announce(&mut self, req: &Announce) -> Result<AnnounceResponse, TrackerError> {
        for attempt in 0..UDP_MAX_ATTEMPTS {
            let connection_id = match self.connection_id(attempt).await {
                Ok(id) => id,
                // A lost connect packet burns the attempt, not the
                // whole announce.
                Err(TrackerError::Timeout) => continue,
                Err(e) => return Err(e),
            };

            let transaction_id: u32 = rand::rng().random();
            let key: u32 = rand::rng().random();

            let mut packet = BytesMut::with_capacity(98);
            packet.put_u64(connection_id);
            packet.put_u32(ACTION_ANNOUNCE);
            packet.put_u32(transaction_id);
            packet.put_slice(&req.info_hash);
            packet.put_slice(&req.peer_id);
            packet.put_u64(req.downloaded);
            packet.put_u64(req.left);
            packet.put_u64(req.uploaded);
            packet.put_u32(req.event.as_udp_id());
            packet.put_u32(0); // IP: let the tracker use the source address
            packet.put_u32(key);
            packet.put_i32(req.numwant);
            packet.put_u16(req.port);

            match self.exchange(&packet, 8, attempt).await {
                Ok(response) => return parse_announce_packet(&response, transaction_id),
                Err(TrackerError::Timeout) => {
                    debug!(tracker = %self.addr, attempt, "announce retransmit");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        Err(TrackerError::Timeout)
    }

    /// Returns a connection id younger than the 60-second BEP-15 expiry,
    /// performing the connect handshake when needed.
    async fn connection_id(&mut self, attempt: u32) -> Result<u64, TrackerError> {
        if let Some((id, obtained)) = self.connection {
            if obtained.elapsed() < UDP_CONNECTION_TTL {
                return Ok(id);
            }
            self.connection = None;
        }

        let transaction_id: u32 = rand::rng().random();

        let mut packet = BytesMut::with_capacity(16);
        packet.put_u64(UDP_PROTOCOL_ID);
        packet.put_u32(ACTION_CONNECT);
        packet.put_u32(transaction_id);

        let response = self.exchange(&packet, 16, attempt).await?;
        let mut buf = &response[..];

        let action = buf.get_u32();
        let echoed = buf.get_u32();
        if action != ACTION_CONNECT || echoed != transaction_id {
            return Err(TrackerError::MalformedResponse(
                "connect response mismatch".into(),
            ));
        }

        let id = buf.get_u64();
        self.connection = Some((id, Instant::now()));
        Ok(id)
    }

    /// One send/receive round with the attempt's retransmission timeout.
    async fn exchange(
        &self,
        packet: &[u8],
        min_len: usize,
        attempt: u32,
    ) -> Result<Vec<u8>, TrackerError> {
        let mut buf = vec![0u8; 4096];
        self.socket.send(packet).await?;

        let wait = UDP_BASE_TIMEOUT * (1u32 << attempt.min(UDP_MAX_ATTEMPTS - 1));
        match timeout(wait, self.socket.recv(&mut buf)).await {
            Ok(Ok(n)) if n >= min_len => {
                buf.truncate(n);
                Ok(buf)
            }
            Ok(Ok(_)) => Err(TrackerError::MalformedResponse("response too short".into())),
            Ok(Err(e)) => Err(TrackerError::Io(e)),
            Err(_) => Err(TrackerError::Timeout),
        }
    }
}

fn parse_announce_packet(
    response: &[u8],
    transaction_id: u32,
) -> Result<AnnounceResponse, TrackerError> {
    let mut buf = &response[..];

    let action = buf.get_u32();
    let echoed = buf.get_u32();

    if action == ACTION_ERROR {
        let message = String::from_utf8_lossy(buf).into_owned();
        return Err(TrackerError::Rejected(message));
    }
    if action != ACTION_ANNOUNCE || echoed != transaction_id {
        return Err(TrackerError::MalformedResponse(
            "announce response mismatch".into(),
        ));
    }
    if buf.remaining() < 12 {
        return Err(TrackerError::MalformedResponse(
            "announce response too short".into(),
        ));
    }

    let interval = buf.get_u32();
    let leechers = buf.get_u32();
    let seeders = buf.get_u32();

    let mut result = AnnounceResponse::new(interval);
    result.complete = Some(seeders);
    result.incomplete = Some(leechers);
    result.peers = parse_compact_peers(buf);

    Ok(result)
}

fn parse_udp_url(url: &str) -> Result<&str, TrackerError> {
    let rest = url
        .strip_prefix("udp://")
        .ok_or_else(|| TrackerError::InvalidUrl(url.to_string()))?;

    let authority = rest.split('/').next().unwrap_or(rest);
    if authority.is_empty() {
        return Err(TrackerError::InvalidUrl(url.to_string()));
    }

    Ok(authority)
}
