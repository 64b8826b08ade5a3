use super::encoding::{sha256d, BlockDecodeError, ByteReader};
use crate::types::Hash32;

pub const HEADER_SIZE: usize = 80;

/// Consensus block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block_hash: Hash32,
    pub merkle_root: Hash32,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    pub fn decode(reader: &mut ByteReader<'_>) -> Result<Self, BlockDecodeError> {
        Ok(Self {
            version: reader.read_i32_le()?,
            prev_block_hash: reader.read_hash()?,
            merkle_root: reader.read_hash()?,
            time: reader.read_u32_le()?,
            bits: reader.read_u32_le()?,
            nonce: reader.read_u32_le()?,
        })
    }

    /// Parses the header from the first 80 bytes of `bytes`. Anything after the
    /// header (a raw block's transactions) is ignored.
    pub fn from_prefix(bytes: &[u8]) -> Result<Self, BlockDecodeError> {
        Self::decode(&mut ByteReader::new(bytes))
    }

    /// Parses a hex header as returned by `getblockheader <hash> false`.
    pub fn from_hex(value: &str) -> Result<Self, BlockDecodeError> {
        let bytes =
            hex::decode(value.trim()).map_err(|e| BlockDecodeError::InvalidHex(e.to_string()))?;
        if bytes.len() > HEADER_SIZE {
            return Err(BlockDecodeError::TrailingBytes(bytes.len() - HEADER_SIZE));
        }
        Self::from_prefix(&bytes)
    }

    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..36].copy_from_slice(self.prev_block_hash.as_bytes());
        out[36..68].copy_from_slice(self.merkle_root.as_bytes());
        out[68..72].copy_from_slice(&self.time.to_le_bytes());
        out[72..76].copy_from_slice(&self.bits.to_le_bytes());
        out[76..80].copy_from_slice(&self.nonce.to_le_bytes());
        out
    }

    #[must_use]
    pub fn hash(&self) -> Hash32 {
        sha256d(&self.encode())
    }
}
