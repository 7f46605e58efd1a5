use std::collections::HashMap;

use super::error::MetainfoError;
use super::info_hash::InfoHash;

/// A parsed magnet link (BEP-9).
///
/// Only the info hash is mandatory; everything else is advisory. With a
/// magnet source the engine first fetches the info dictionary from the
/// swarm (metadata exchange) before the download proper starts.
///
/// # Examples
///
/// ```
/// use bitflood::metainfo::MagnetLink;
///
/// let magnet = MagnetLink::parse(
///     "magnet:?xt=urn:btih:dd8255ecdc7ca55fb0bbf81323d87062db1f6d1c\
///      &dn=Ubuntu&tr=udp://t.example:6969",
/// ).unwrap();
///
/// assert_eq!(magnet.display_name.as_deref(), Some("Ubuntu"));
/// assert_eq!(magnet.trackers, vec!["udp://t.example:6969".to_string()]);
/// ```
#[derive(Debug, Clone)]
pub struct MagnetLink {
    /// The torrent's info hash, from `xt=urn:btih:`.
    pub info_hash: InfoHash,
    /// Suggested display name (`dn`).
    pub display_name: Option<String>,
    /// Tracker URLs (`tr`, repeatable).
    pub trackers: Vec<String>,
    /// Web seed URLs (`ws`, repeatable).
    pub web_seeds: Vec<String>,
    /// Expected content length in bytes (`xl`).
    pub expected_length: Option<u64>,
}

impl MagnetLink {
    /// Parses a magnet URI.
    ///
    /// The `xt` parameter must carry a `urn:btih:` info hash, either
    /// 40 hex characters or 32 base32 characters, case-insensitive.
    /// A missing or unrecognised `xt` is an error.
    pub fn parse(uri: &str) -> Result<Self, MetainfoError> {
        let query = uri
            .strip_prefix("magnet:?")
            .ok_or_else(|| MetainfoError::InvalidMagnet("missing magnet:? prefix".into()))?;

        let params = parse_query(query);

        let xt = params
            .get("xt")
            .and_then(|v| v.first())
            .ok_or_else(|| MetainfoError::InvalidMagnet("missing xt parameter".into()))?;

        let hash_str = xt
            .strip_prefix("urn:btih:")
            .ok_or_else(|| MetainfoError::InvalidMagnet("unsupported xt format".into()))?;

        let info_hash = match hash_str.len() {
            40 => InfoHash::from_hex(hash_str)
                .map_err(|_| MetainfoError::InvalidMagnet("invalid hex info hash".into()))?,
            32 => {
                let decoded = base32_decode(hash_str)
                    .ok_or_else(|| MetainfoError::InvalidMagnet("invalid base32 info hash".into()))?;
                InfoHash::from_slice(&decoded)
                    .map_err(|_| MetainfoError::InvalidMagnet("invalid base32 info hash".into()))?
            }
            _ => {
                return Err(MetainfoError::InvalidMagnet(
                    "invalid info hash length".into(),
                ))
            }
        };

        let display_name = params
            .get("dn")
            .and_then(|v| v.first())
            .map(|s| url_decode(s));

        let trackers = params
            .get("tr")
            .map(|v| v.iter().map(|s| url_decode(s)).collect())
            .unwrap_or_default();

        let web_seeds = params
            .get("ws")
            .map(|v| v.iter().map(|s| url_decode(s)).collect())
            .unwrap_or_default();

        let expected_length = params
            .get("xl")
            .and_then(|v| v.first())
            .and_then(|s| s.parse().ok());

        Ok(Self {
            info_hash,
            display_name,
            trackers,
            web_seeds,
            expected_length,
        })
    }
}

fn parse_query(query: &str) -> HashMap<String, Vec<String>> {
    let mut params: HashMap<String, Vec<String>> = HashMap::new();

    for part in query.split('&') {
        if let Some((key, value)) = part.split_once('=') {
            params
                .entry(key.to_string())
                .or_default()
                .push(value.to_string());
        }
    }

    params
}

fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                if let Ok(byte) =
                    u8::from_str_radix(std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or(""), 16)
                {
                    out.push(byte);
                    i += 3;
                    continue;
                }
                out.push(b'%');
                i += 1;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn base32_decode(input: &str) -> Option<Vec<u8>> {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

    let input = input.to_uppercase();
    let input = input.trim_end_matches('=');

    let mut out = Vec::with_capacity(input.len() * 5 / 8);
    let mut buffer: u64 = 0;
    let mut bits = 0;

    for c in input.bytes() {
        let value = ALPHABET.iter().position(|&x| x == c)? as u64;
        buffer = (buffer << 5) | value;
        bits += 5;

        if bits >= 8 {
            bits -= 8;
            out.push((buffer >> bits) as u8);
            buffer &= (1 << bits) - 1;
        }
    }

    Some(out)
}
