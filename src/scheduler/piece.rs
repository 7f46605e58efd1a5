use bytes::Bytes;
use sha1::{Digest, Sha1};

/// Number of blocks in a piece of `piece_len` bytes.
pub fn block_count(piece_len: u32, block_size: u32) -> u32 {
    piece_len.div_ceil(block_size)
}

/// Length of the block starting at `begin`; the final block of a piece
/// carries the remainder.
pub fn block_length(piece_len: u32, block_size: u32, begin: u32) -> u32 {
    piece_len.saturating_sub(begin).min(block_size)
}

/// Why a block was refused by the assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRejected {
    /// `begin` is not a multiple of the block size or past the piece.
    OutOfRange,
    /// The data does not match the block's expected length.
    WrongLength,
    /// This block was already placed; the buffer is untouched.
    Duplicate,
}

/// The in-memory buffer a piece is reassembled in.
///
/// Each block lands at exactly its `begin` offset, exactly once;
/// overlapping, out-of-range, or duplicate writes are refused. Once
/// every block is present the buffer is hashed and either shipped to
/// storage or thrown away wholesale.
#[derive(Debug)]
pub struct PieceAssembly {
    buffer: Vec<u8>,
    received: Vec<bool>,
    received_count: u32,
    block_size: u32,
}

impl PieceAssembly {
    pub fn new(piece_len: u32, block_size: u32) -> Self {
        let blocks = block_count(piece_len, block_size) as usize;
        Self {
            buffer: vec![0; piece_len as usize],
            received: vec![false; blocks],
            received_count: 0,
            block_size,
        }
    }

    pub fn piece_len(&self) -> u32 {
        self.buffer.len() as u32
    }

    pub fn block_count(&self) -> u32 {
        self.received.len() as u32
    }

    /// Whether the block starting at `begin` has been placed.
    pub fn has_block(&self, begin: u32) -> bool {
        if begin % self.block_size != 0 {
            return false;
        }
        self.received
            .get((begin / self.block_size) as usize)
            .copied()
            .unwrap_or(false)
    }

    /// Places one block. On success, reports whether the piece is now
    /// complete.
    pub fn insert(&mut self, begin: u32, data: &[u8]) -> Result<bool, BlockRejected> {
        if begin % self.block_size != 0 || begin >= self.piece_len() {
            return Err(BlockRejected::OutOfRange);
        }

        let expected = block_length(self.piece_len(), self.block_size, begin);
        if data.len() as u32 != expected {
            return Err(BlockRejected::WrongLength);
        }

        let slot = (begin / self.block_size) as usize;
        if self.received[slot] {
            return Err(BlockRejected::Duplicate);
        }

        let begin = begin as usize;
        self.buffer[begin..begin + data.len()].copy_from_slice(data);
        self.received[slot] = true;
        self.received_count += 1;

        Ok(self.is_complete())
    }

    pub fn is_complete(&self) -> bool {
        self.received_count == self.block_count()
    }

    /// How many blocks have been placed so far.
    pub fn blocks_received(&self) -> u32 {
        self.received_count
    }

    /// SHA-1 of the assembled buffer against the expected digest.
    pub fn verify(&self, expected: &[u8; 20]) -> bool {
        let mut hasher = Sha1::new();
        hasher.update(&self.buffer);
        hasher.finalize().as_slice() == expected
    }

    /// Consumes the assembly, yielding the piece bytes.
    pub fn into_bytes(self) -> Bytes {
        Bytes::from(self.buffer)
    }
}
