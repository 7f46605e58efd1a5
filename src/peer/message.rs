use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::error::PeerError;

/// The BitTorrent protocol identifier.
pub const PROTOCOL: &[u8] = b"BitTorrent protocol";

/// Length of the handshake message in bytes.
pub const HANDSHAKE_LEN: usize = 68;

// Reserved byte 5, bit 0x10: extension protocol (BEP-10), i.e. bit 20
// counting from the most significant bit of the reserved field.
const EXTENSION_BIT_BYTE: usize = 5;
const EXTENSION_BIT_MASK: u8 = 0x10;

/// The 68-byte handshake that opens every peer connection:
/// `0x13 "BitTorrent protocol" <8 reserved> <info_hash> <peer_id>`.
#[derive(Debug, Clone)]
pub struct Handshake {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
    pub reserved: [u8; 8],
}

impl Handshake {
    /// Creates our outgoing handshake, advertising extension protocol
    /// support.
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        let mut reserved = [0u8; 8];
        reserved[EXTENSION_BIT_BYTE] |= EXTENSION_BIT_MASK;
        Self {
            info_hash,
            peer_id,
            reserved,
        }
    }

    /// Whether the sender supports the extension protocol (BEP-10).
    pub fn supports_extensions(&self) -> bool {
        (self.reserved[EXTENSION_BIT_BYTE] & EXTENSION_BIT_MASK) != 0
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HANDSHAKE_LEN);
        buf.put_u8(PROTOCOL.len() as u8);
        buf.put_slice(PROTOCOL);
        buf.put_slice(&self.reserved);
        buf.put_slice(&self.info_hash);
        buf.put_slice(&self.peer_id);
        buf.freeze()
    }

    pub fn decode(data: &[u8]) -> Result<Self, PeerError> {
        if data.len() < HANDSHAKE_LEN {
            return Err(PeerError::InvalidHandshake);
        }
        if data[0] as usize != PROTOCOL.len() || &data[1..20] != PROTOCOL {
            return Err(PeerError::InvalidHandshake);
        }

        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&data[20..28]);
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&data[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&data[48..68]);

        Ok(Self {
            info_hash,
            peer_id,
            reserved,
        })
    }
}

/// Message ids of the peer wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
    /// Extension protocol message (BEP-10).
    Extended = 20,
}

impl TryFrom<u8> for MessageId {
    type Error = PeerError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageId::Choke),
            1 => Ok(MessageId::Unchoke),
            2 => Ok(MessageId::Interested),
            3 => Ok(MessageId::NotInterested),
            4 => Ok(MessageId::Have),
            5 => Ok(MessageId::Bitfield),
            6 => Ok(MessageId::Request),
            7 => Ok(MessageId::Piece),
            8 => Ok(MessageId::Cancel),
            20 => Ok(MessageId::Extended),
            other => Err(PeerError::InvalidMessageId(other)),
        }
    }
}

/// A peer wire message.
///
/// On the wire every message is `<u32 length><u8 id><payload>`; a
/// length of zero is a keep-alive with no id.
#[derive(Debug, Clone)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { piece: u32 },
    Bitfield(Bytes),
    Request { index: u32, begin: u32, length: u32 },
    Piece { index: u32, begin: u32, data: Bytes },
    Cancel { index: u32, begin: u32, length: u32 },
    Extended { id: u8, payload: Bytes },
}

impl Message {
    /// Encodes the message including its length prefix.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();

        match self {
            Message::KeepAlive => buf.put_u32(0),
            Message::Choke => put_header(&mut buf, 1, MessageId::Choke),
            Message::Unchoke => put_header(&mut buf, 1, MessageId::Unchoke),
            Message::Interested => put_header(&mut buf, 1, MessageId::Interested),
            Message::NotInterested => put_header(&mut buf, 1, MessageId::NotInterested),
            Message::Have { piece } => {
                put_header(&mut buf, 5, MessageId::Have);
                buf.put_u32(*piece);
            }
            Message::Bitfield(bits) => {
                put_header(&mut buf, 1 + bits.len() as u32, MessageId::Bitfield);
                buf.put_slice(bits);
            }
            Message::Request {
                index,
                begin,
                length,
            } => {
                put_header(&mut buf, 13, MessageId::Request);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_u32(*length);
            }
            Message::Piece { index, begin, data } => {
                put_header(&mut buf, 9 + data.len() as u32, MessageId::Piece);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_slice(data);
            }
            Message::Cancel {
                index,
                begin,
                length,
            } => {
                put_header(&mut buf, 13, MessageId::Cancel);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_u32(*length);
            }
            Message::Extended { id, payload } => {
                put_header(&mut buf, 2 + payload.len() as u32, MessageId::Extended);
                buf.put_u8(*id);
                buf.put_slice(payload);
            }
        }

        buf.freeze()
    }

    /// Decodes one frame. `data` must hold the complete frame including
    /// the length prefix; the transport guarantees this.
    pub fn decode(mut data: Bytes) -> Result<Self, PeerError> {
        if data.len() < 4 {
            return Err(PeerError::InvalidMessage("truncated frame".into()));
        }

        let length = data.get_u32() as usize;
        if length == 0 {
            return Ok(Message::KeepAlive);
        }
        if data.remaining() < length {
            return Err(PeerError::InvalidMessage("incomplete frame".into()));
        }

        let id = MessageId::try_from(data.get_u8())?;
        let body = length - 1;

        match id {
            MessageId::Choke => Ok(Message::Choke),
            MessageId::Unchoke => Ok(Message::Unchoke),
            MessageId::Interested => Ok(Message::Interested),
            MessageId::NotInterested => Ok(Message::NotInterested),
            MessageId::Have => {
                if body != 4 {
                    return Err(PeerError::InvalidMessage("have length".into()));
                }
                Ok(Message::Have {
                    piece: data.get_u32(),
                })
            }
            MessageId::Bitfield => Ok(Message::Bitfield(data.copy_to_bytes(body))),
            MessageId::Request => {
                if body != 12 {
                    return Err(PeerError::InvalidMessage("request length".into()));
                }
                Ok(Message::Request {
                    index: data.get_u32(),
                    begin: data.get_u32(),
                    length: data.get_u32(),
                })
            }
            MessageId::Piece => {
                if body < 8 {
                    return Err(PeerError::InvalidMessage("piece length".into()));
                }
                let index = data.get_u32();
                let begin = data.get_u32();
                Ok(Message::Piece {
                    index,
                    begin,
                    data: data.copy_to_bytes(body - 8),
                })
            }
            MessageId::Cancel => {
                if body != 12 {
                    return Err(PeerError::InvalidMessage("cancel length".into()));
                }
                Ok(Message::Cancel {
                    index: data.get_u32(),
                    begin: data.get_u32(),
                    length: data.get_u32(),
                })
            }
            MessageId::Extended => {
                if body < 1 {
                    return Err(PeerError::InvalidMessage("extended length".into()));
                }
                let id = data.get_u8();
                Ok(Message::Extended {
                    id,
                    payload: data.copy_to_bytes(body - 1),
                })
            }
        }
    }
}

fn put_header(buf: &mut BytesMut, length: u32, id: MessageId) {
    buf.put_u32(length);
    buf.put_u8(id as u8);
}
