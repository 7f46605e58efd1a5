use std::ops::Range;
use std::path::{Path, PathBuf};

use bytes::Bytes;

use super::error::MetainfoError;
use super::info_hash::InfoHash;
use crate::bencode::{self, decode_lenient, Value};

/// A parsed torrent description.
///
/// Immutable once parsed; every other subsystem reads from it.
#[derive(Debug, Clone)]
pub struct Metainfo {
    /// The content description from the `info` dictionary.
    pub info: Info,
    /// SHA-1 of the original `info` byte span.
    pub info_hash: InfoHash,
    /// Primary tracker URL.
    pub announce: Option<String>,
    /// Multi-tier tracker list (BEP-12).
    pub announce_list: Vec<Vec<String>>,
    /// The raw bencoded `info` bytes, kept for metadata exchange.
    raw_info: Bytes,
}

/// The contents of the `info` dictionary.
#[derive(Debug, Clone)]
pub struct Info {
    /// Suggested name for the file or root directory.
    pub name: String,
    /// Bytes per piece (except the last piece).
    pub piece_length: u64,
    /// Expected SHA-1 digest of each piece.
    pub pieces: Vec<[u8; 20]>,
    /// Files in declared order, with running offsets.
    pub files: Vec<FileEntry>,
    /// Total size of all files.
    pub total_length: u64,
}

/// A file within the torrent's logical byte stream.
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// Path relative to the output directory (root name included).
    pub path: PathBuf,
    /// File size in bytes.
    pub length: u64,
    /// Offset of the file's first byte in the concatenated stream.
    pub offset: u64,
}

impl Info {
    /// Number of pieces.
    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    /// Actual length of piece `index`; the final piece carries the
    /// remainder.
    pub fn piece_len(&self, index: usize) -> u64 {
        let start = index as u64 * self.piece_length;
        (self.total_length - start).min(self.piece_length)
    }
}

impl Metainfo {
    /// Loads and parses a `.torrent` file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, MetainfoError> {
        let data = tokio::fs::read(path).await?;
        Self::from_bytes(&data)
    }

    /// Parses a `.torrent` file from raw bytes.
    ///
    /// Decoding is lenient about dictionary key order: such files exist
    /// in the wild and their published info hashes cover the original
    /// bytes, which is also what this parser hashes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, MetainfoError> {
        let value = decode_lenient(data)?;
        let dict = value.as_dict().ok_or(MetainfoError::InvalidField("root"))?;

        let span = find_info_span(data)?;
        let raw_info = Bytes::copy_from_slice(&data[span]);
        let info_hash = InfoHash::of(&raw_info);

        let info_value = dict
            .get(b"info".as_slice())
            .ok_or(MetainfoError::MissingField("info"))?;
        let info = parse_info(info_value)?;

        let announce = value.get_str(b"announce").map(String::from);

        let announce_list = dict
            .get(b"announce-list".as_slice())
            .and_then(|v| v.as_list())
            .map(|tiers| {
                tiers
                    .iter()
                    .filter_map(|tier| {
                        tier.as_list().map(|urls| {
                            urls.iter()
                                .filter_map(|u| u.as_str().map(String::from))
                                .collect()
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            info,
            info_hash,
            announce,
            announce_list,
            raw_info,
        })
    }

    /// Builds a `Metainfo` from info-dictionary bytes obtained via
    /// metadata exchange (BEP-9), verifying them against the expected
    /// info hash from the magnet link.
    pub fn from_info_bytes(
        info_bytes: &[u8],
        trackers: &[String],
        expected: InfoHash,
    ) -> Result<Self, MetainfoError> {
        if InfoHash::of(info_bytes) != expected {
            return Err(MetainfoError::InfoHashMismatch);
        }

        let value = decode_lenient(info_bytes)?;
        let info = parse_info(&value)?;

        Ok(Self {
            info,
            info_hash: expected,
            announce: None,
            announce_list: vec![trackers.to_vec()],
            raw_info: Bytes::copy_from_slice(info_bytes),
        })
    }

    /// The raw bencoded `info` bytes.
    pub fn raw_info(&self) -> &Bytes {
        &self.raw_info
    }

    /// All tracker URLs: `announce` first, then `announce-list` tiers,
    /// deduplicated.
    pub fn trackers(&self) -> Vec<String> {
        let mut trackers = Vec::new();

        if let Some(ref announce) = self.announce {
            trackers.push(announce.clone());
        }

        for tier in &self.announce_list {
            for url in tier {
                if !trackers.contains(url) {
                    trackers.push(url.clone());
                }
            }
        }

        trackers
    }
}

/// Locates the byte range of the top-level `info` value in a metainfo
/// stream, so the info hash can cover the producer's original bytes.
fn find_info_span(data: &[u8]) -> Result<Range<usize>, MetainfoError> {
    if data.first() != Some(&b'd') {
        return Err(MetainfoError::InvalidField("root"));
    }

    let mut pos = 1;
    while pos < data.len() && data[pos] != b'e' {
        let key = read_key(data, &mut pos)?;
        if key == b"info" {
            let start = pos;
            bencode::skip_value(data, &mut pos)?;
            return Ok(start..pos);
        }
        bencode::skip_value(data, &mut pos)?;
    }

    Err(MetainfoError::MissingField("info"))
}

fn read_key<'a>(data: &'a [u8], pos: &mut usize) -> Result<&'a [u8], MetainfoError> {
    let start = *pos;
    while *pos < data.len() && data[*pos].is_ascii_digit() {
        *pos += 1;
    }
    if *pos >= data.len() || data[*pos] != b':' || *pos == start {
        return Err(MetainfoError::InvalidField("dictionary key"));
    }
    let len: usize = std::str::from_utf8(&data[start..*pos])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(MetainfoError::InvalidField("dictionary key"))?;
    *pos += 1;
    if *pos + len > data.len() {
        return Err(MetainfoError::InvalidField("dictionary key"));
    }
    let key = &data[*pos..*pos + len];
    *pos += len;
    Ok(key)
}

fn parse_info(value: &Value) -> Result<Info, MetainfoError> {
    let dict = value.as_dict().ok_or(MetainfoError::InvalidField("info"))?;

    let name = value
        .get_str(b"name")
        .ok_or(MetainfoError::MissingField("name"))?
        .to_string();

    let piece_length = value
        .get_integer(b"piece length")
        .ok_or(MetainfoError::MissingField("piece length"))?;
    if piece_length <= 0 {
        return Err(MetainfoError::InvalidField("piece length"));
    }
    let piece_length = piece_length as u64;

    let pieces_bytes = value
        .get(b"pieces")
        .and_then(|v| v.as_bytes())
        .ok_or(MetainfoError::MissingField("pieces"))?;
    if pieces_bytes.len() % 20 != 0 {
        return Err(MetainfoError::InvalidField("pieces"));
    }

    let pieces: Vec<[u8; 20]> = pieces_bytes
        .chunks_exact(20)
        .map(|chunk| {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(chunk);
            hash
        })
        .collect();

    let (files, total_length) = if let Some(length) = value.get_integer(b"length") {
        if length < 0 {
            return Err(MetainfoError::InvalidField("length"));
        }
        let length = length as u64;
        let file = FileEntry {
            path: PathBuf::from(&name),
            length,
            offset: 0,
        };
        (vec![file], length)
    } else if let Some(entries) = dict.get(b"files".as_slice()).and_then(|v| v.as_list()) {
        let mut files = Vec::with_capacity(entries.len());
        let mut offset = 0u64;

        for entry in entries {
            let length = entry
                .get_integer(b"length")
                .ok_or(MetainfoError::MissingField("file length"))?;
            if length < 0 {
                return Err(MetainfoError::InvalidField("file length"));
            }

            let components = entry
                .get(b"path")
                .and_then(|v| v.as_list())
                .ok_or(MetainfoError::MissingField("file path"))?;
            if components.is_empty() {
                return Err(MetainfoError::InvalidField("file path"));
            }

            let path: PathBuf = std::iter::once(name.as_str())
                .chain(components.iter().filter_map(|c| c.as_str()))
                .collect();

            files.push(FileEntry {
                path,
                length: length as u64,
                offset,
            });
            offset += length as u64;
        }

        (files, offset)
    } else {
        return Err(MetainfoError::MissingField("length or files"));
    };

    // Every piece hash must be accounted for, and vice versa.
    let expected_pieces = total_length.div_ceil(piece_length) as usize;
    if pieces.len() != expected_pieces {
        return Err(MetainfoError::InvalidField("pieces"));
    }

    Ok(Info {
        name,
        piece_length,
        pieces,
        files,
        total_length,
    })
}
