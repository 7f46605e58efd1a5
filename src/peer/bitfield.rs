use super::error::PeerError;

/// A peer's claimed piece inventory: one bit per piece, MSB-first.
#[derive(Debug, Clone)]
pub struct Bitfield {
    bits: Vec<u8>,
    piece_count: usize,
}

impl Bitfield {
    /// An empty bitfield for `piece_count` pieces.
    pub fn new(piece_count: usize) -> Self {
        Self {
            bits: vec![0; piece_count.div_ceil(8)],
            piece_count,
        }
    }

    /// Validates and adopts a BITFIELD payload.
    ///
    /// The payload must be exactly `⌈piece_count/8⌉` bytes and the
    /// spare bits past the last piece must be zero; anything else is a
    /// protocol violation.
    pub fn parse(payload: &[u8], piece_count: usize) -> Result<Self, PeerError> {
        if payload.len() != piece_count.div_ceil(8) {
            return Err(PeerError::Protocol(format!(
                "bitfield length {} for {} pieces",
                payload.len(),
                piece_count
            )));
        }

        let spare = payload.len() * 8 - piece_count;
        if spare > 0 {
            let mask = (1u8 << spare) - 1;
            if let Some(last) = payload.last() {
                if last & mask != 0 {
                    return Err(PeerError::Protocol("bitfield spare bits set".into()));
                }
            }
        }

        Ok(Self {
            bits: payload.to_vec(),
            piece_count,
        })
    }

    pub fn has_piece(&self, index: usize) -> bool {
        if index >= self.piece_count {
            return false;
        }
        (self.bits[index / 8] >> (7 - index % 8)) & 1 == 1
    }

    pub fn set_piece(&mut self, index: usize) {
        if index < self.piece_count {
            self.bits[index / 8] |= 1 << (7 - index % 8);
        }
    }

    /// Number of pieces the peer claims.
    pub fn count(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|&b| b == 0)
    }

    pub fn is_complete(&self) -> bool {
        self.count() == self.piece_count
    }

    pub fn piece_count(&self) -> usize {
        self.piece_count
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }
}
