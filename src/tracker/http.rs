use reqwest::Client;

use super::announce::Announce;
use super::error::TrackerError;
use super::response::{parse_compact_peers, AnnounceResponse, TrackerEvent};
use crate::bencode::decode_lenient;
use crate::constants::{HTTP_TRACKER_TIMEOUT, USER_AGENT};

/// An HTTP(S) tracker client (BEP-3).
///
/// The announce is a GET request whose query carries the raw 20-byte
/// `info_hash` and `peer_id` percent-encoded byte-for-byte; the
/// response is a bencoded dictionary. Tracker responses are decoded
/// leniently because unsorted dictionary keys are common in the wild.
pub struct HttpTracker {
    client: Client,
    url: String,
}

impl HttpTracker {
    pub fn new(url: &str) -> Result<Self, TrackerError> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(TrackerError::InvalidUrl(url.to_string()));
        }

        let client = Client::builder()
            .timeout(HTTP_TRACKER_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    pub async fn announce(&self, req: &Announce) -> Result<AnnounceResponse, TrackerError> {
        let separator = if self.url.contains('?') { '&' } else { '?' };
        let mut url = format!(
            "{}{}info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact=1",
            self.url,
            separator,
            percent_encode(&req.info_hash),
            percent_encode(&req.peer_id),
            req.port,
            req.uploaded,
            req.downloaded,
            req.left,
        );

        if req.numwant >= 0 {
            url.push_str(&format!("&numwant={}", req.numwant));
        }
        if req.event != TrackerEvent::None {
            url.push_str(&format!("&event={}", req.event.as_str()));
        }

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            return Err(TrackerError::MalformedResponse(format!(
                "http status {}",
                status
            )));
        }

        parse_announce_body(&body)
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

pub(super) fn parse_announce_body(body: &[u8]) -> Result<AnnounceResponse, TrackerError> {
    let value = decode_lenient(body)?;
    let dict = value
        .as_dict()
        .ok_or_else(|| TrackerError::MalformedResponse("expected dict".into()))?;

    if let Some(reason) = value.get_str(b"failure reason") {
        return Err(TrackerError::Rejected(reason.to_string()));
    }

    let interval = value
        .get_integer(b"interval")
        .ok_or_else(|| TrackerError::MalformedResponse("missing interval".into()))?
        as u32;

    let mut response = AnnounceResponse::new(interval);
    response.min_interval = value.get_integer(b"min interval").map(|v| v as u32);
    response.complete = value.get_integer(b"complete").map(|v| v as u32);
    response.incomplete = value.get_integer(b"incomplete").map(|v| v as u32);

    match dict.get(b"peers".as_slice()) {
        Some(peers) => {
            if let Some(compact) = peers.as_bytes() {
                response.peers = parse_compact_peers(compact);
            } else if let Some(list) = peers.as_list() {
                for peer in list {
                    let ip = peer.get_str(b"ip").and_then(|s| s.parse().ok());
                    let port = peer.get_integer(b"port").map(|p| p as u16);
                    if let (Some(ip), Some(port)) = (ip, port) {
                        response.peers.push(std::net::SocketAddr::new(ip, port));
                    }
                }
            } else {
                return Err(TrackerError::MalformedResponse("invalid peers".into()));
            }
        }
        None => return Err(TrackerError::MalformedResponse("missing peers".into())),
    }

    Ok(response)
}

/// Percent-encodes raw bytes for the announce query. Unlike a generic
/// URL encoder this must pass the full 20 bytes through unchanged, so
/// everything outside the unreserved set is escaped.
fn percent_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for &b in bytes {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02x}", b));
        }
    }
    out
}
