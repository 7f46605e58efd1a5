//! Metadata exchange messages (ut_metadata, BEP-9).
//!
//! For magnet downloads the info dictionary itself is fetched from
//! peers, 16 KiB at a time, over the extension protocol. A data message
//! is a bencoded header immediately followed by the raw piece bytes;
//! the header's end is found by walking the bencode tokens.

use std::collections::BTreeMap;

use bytes::Bytes;

use super::error::PeerError;
use crate::bencode::{self, decode_lenient, encode, Value};

/// Metadata is transferred in 16 KiB pieces, indexed independently of
/// content pieces.
pub const METADATA_PIECE_SIZE: usize = 16384;

/// ut_metadata message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataMessageType {
    Request = 0,
    Data = 1,
    Reject = 2,
}

impl MetadataMessageType {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(MetadataMessageType::Request),
            1 => Some(MetadataMessageType::Data),
            2 => Some(MetadataMessageType::Reject),
            _ => None,
        }
    }
}

/// One ut_metadata message.
#[derive(Debug, Clone)]
pub struct MetadataMessage {
    pub msg_type: MetadataMessageType,
    /// Metadata piece index.
    pub piece: u32,
    /// Total metadata size; only present on data messages.
    pub total_size: Option<u32>,
    /// Raw piece bytes; only present on data messages.
    pub data: Option<Bytes>,
}

impl MetadataMessage {
    pub fn request(piece: u32) -> Self {
        Self {
            msg_type: MetadataMessageType::Request,
            piece,
            total_size: None,
            data: None,
        }
    }

    pub fn reject(piece: u32) -> Self {
        Self {
            msg_type: MetadataMessageType::Reject,
            piece,
            total_size: None,
            data: None,
        }
    }

    /// Encodes the bencoded header, with the raw piece bytes appended
    /// for data messages.
    pub fn encode(&self) -> Bytes {
        let mut dict = BTreeMap::new();
        dict.insert(
            Bytes::from_static(b"msg_type"),
            Value::Integer(self.msg_type as i64),
        );
        dict.insert(
            Bytes::from_static(b"piece"),
            Value::Integer(self.piece as i64),
        );
        if let Some(total_size) = self.total_size {
            dict.insert(
                Bytes::from_static(b"total_size"),
                Value::Integer(total_size as i64),
            );
        }

        let mut out = encode(&Value::Dict(dict));
        if let Some(ref data) = self.data {
            out.extend_from_slice(data);
        }
        Bytes::from(out)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, PeerError> {
        // The header is one bencoded dict; a data message's piece bytes
        // follow it without any delimiter.
        let mut header_end = 0;
        bencode::skip_value(payload, &mut header_end)?;

        let header = decode_lenient(&payload[..header_end])?;
        if header.as_dict().is_none() {
            return Err(PeerError::Extension("metadata header is not a dict".into()));
        }

        let msg_type = header
            .get_integer(b"msg_type")
            .and_then(MetadataMessageType::from_code)
            .ok_or_else(|| PeerError::Extension("bad metadata msg_type".into()))?;

        let piece = header
            .get_integer(b"piece")
            .filter(|&p| (0..=u32::MAX as i64).contains(&p))
            .ok_or_else(|| PeerError::Extension("bad metadata piece".into()))?
            as u32;

        let total_size = header
            .get_integer(b"total_size")
            .filter(|&s| s >= 0)
            .map(|s| s as u32);

        let data = if msg_type == MetadataMessageType::Data {
            Some(Bytes::copy_from_slice(&payload[header_end..]))
        } else {
            None
        };

        Ok(Self {
            msg_type,
            piece,
            total_size,
            data,
        })
    }
}

/// Number of metadata pieces for a metadata of `total_size` bytes.
pub fn metadata_piece_count(total_size: usize) -> usize {
    total_size.div_ceil(METADATA_PIECE_SIZE)
}

/// Expected size of metadata piece `piece`.
pub fn metadata_piece_size(piece: u32, total_size: usize) -> usize {
    let offset = piece as usize * METADATA_PIECE_SIZE;
    total_size.saturating_sub(offset).min(METADATA_PIECE_SIZE)
}
