use std::collections::BTreeMap;

use bytes::Bytes;

use super::error::PeerError;
use crate::bencode::{decode_lenient, encode, Value};
use crate::constants::USER_AGENT;

/// Ext-id zero is reserved for the extension handshake itself.
pub const EXTENSION_HANDSHAKE_ID: u8 = 0;

/// Name of the metadata-exchange extension (BEP-9).
pub const UT_METADATA: &str = "ut_metadata";

/// The ext-id we assign to ut_metadata in our handshake. Peers address
/// metadata messages to us with this id; we address them with whatever
/// id the peer's own handshake assigned.
pub const OUR_UT_METADATA_ID: u8 = 1;

/// The BEP-10 extension handshake payload.
///
/// Carries `m`, the sender's mapping of extension names to the ids it
/// wants them addressed by, plus optional niceties. `metadata_size` is
/// how ut_metadata peers advertise the info-dictionary size.
#[derive(Debug, Clone, Default)]
pub struct ExtensionHandshake {
    pub extensions: BTreeMap<String, u8>,
    pub client: Option<String>,
    pub reqq: Option<i64>,
    pub metadata_size: Option<i64>,
}

impl ExtensionHandshake {
    /// The handshake we send: ut_metadata support and a client tag.
    pub fn ours() -> Self {
        let mut extensions = BTreeMap::new();
        extensions.insert(UT_METADATA.to_string(), OUR_UT_METADATA_ID);
        Self {
            extensions,
            client: Some(USER_AGENT.to_string()),
            reqq: None,
            metadata_size: None,
        }
    }

    /// The peer's ext-id for a named extension, if it supports it.
    pub fn extension_id(&self, name: &str) -> Option<u8> {
        self.extensions.get(name).copied().filter(|&id| id != 0)
    }

    pub fn encode(&self) -> Bytes {
        let mut m = BTreeMap::new();
        for (name, id) in &self.extensions {
            m.insert(
                Bytes::copy_from_slice(name.as_bytes()),
                Value::Integer(*id as i64),
            );
        }

        let mut dict = BTreeMap::new();
        dict.insert(Bytes::from_static(b"m"), Value::Dict(m));

        if let Some(ref client) = self.client {
            dict.insert(Bytes::from_static(b"v"), Value::string(client));
        }
        if let Some(reqq) = self.reqq {
            dict.insert(Bytes::from_static(b"reqq"), Value::Integer(reqq));
        }
        if let Some(size) = self.metadata_size {
            dict.insert(Bytes::from_static(b"metadata_size"), Value::Integer(size));
        }

        Bytes::from(encode(&Value::Dict(dict)))
    }

    pub fn decode(payload: &[u8]) -> Result<Self, PeerError> {
        let value = decode_lenient(payload)?;
        if value.as_dict().is_none() {
            return Err(PeerError::Extension("handshake is not a dict".into()));
        }

        let mut handshake = Self::default();

        if let Some(m) = value.get(b"m").and_then(|v| v.as_dict()) {
            for (name, id) in m {
                if let (Ok(name), Some(id)) = (std::str::from_utf8(name), id.as_integer()) {
                    if (0..=u8::MAX as i64).contains(&id) {
                        handshake.extensions.insert(name.to_string(), id as u8);
                    }
                }
            }
        }

        handshake.client = value.get_str(b"v").map(String::from);
        handshake.reqq = value.get_integer(b"reqq");
        handshake.metadata_size = value.get_integer(b"metadata_size");

        Ok(handshake)
    }
}
