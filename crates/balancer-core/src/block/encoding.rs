use sha2::{Digest, Sha256};

use crate::types::Hash32;

/// Errors raised while decoding consensus-serialized data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlockDecodeError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),
    #[error("unexpected end of data: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },
    #[error("non-canonical compact size encoding")]
    NonCanonicalCompactSize,
    #[error("declared count {0} exceeds available data")]
    CountTooLarge(u64),
    #[error("block contains no transactions")]
    NoTransactions,
    #[error("segwit marker present without witness data")]
    EmptyWitness,
    #[error("{0} trailing bytes after block")]
    TrailingBytes(usize),
}

#[must_use]
pub fn sha256d(data: &[u8]) -> Hash32 {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut out = [0u8; 32];
    out.copy_from_slice(&second);
    Hash32(out)
}

/// Merkle root over transaction ids, duplicating the last entry of odd layers.
#[must_use]
pub fn merkle_root(txids: &[Hash32]) -> Hash32 {
    if txids.is_empty() {
        return Hash32::ZERO;
    }

    let mut layer = txids.to_vec();
    while layer.len() > 1 {
        if layer.len() % 2 == 1 {
            let last = layer[layer.len() - 1];
            layer.push(last);
        }
        layer = layer
            .chunks(2)
            .map(|pair| {
                let mut buf = [0u8; 64];
                buf[..32].copy_from_slice(pair[0].as_bytes());
                buf[32..].copy_from_slice(pair[1].as_bytes());
                sha256d(&buf)
            })
            .collect();
    }
    layer[0]
}

/// Cursor over a byte slice with little-endian helpers.
#[derive(Debug)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Bytes consumed between `start` and the current position.
    #[must_use]
    pub fn consumed_since(&self, start: usize) -> &'a [u8] {
        &self.data[start..self.pos]
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], BlockDecodeError> {
        if len > self.remaining() {
            return Err(BlockDecodeError::UnexpectedEof { needed: len, remaining: self.remaining() });
        }
        let out = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    pub fn peek_u8(&self, offset: usize) -> Option<u8> {
        self.data.get(self.pos + offset).copied()
    }

    pub fn read_u8(&mut self) -> Result<u8, BlockDecodeError> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16_le(&mut self) -> Result<u16, BlockDecodeError> {
        let mut buf = [0u8; 2];
        buf.copy_from_slice(self.read_bytes(2)?);
        Ok(u16::from_le_bytes(buf))
    }

    pub fn read_u32_le(&mut self) -> Result<u32, BlockDecodeError> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.read_bytes(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_i32_le(&mut self) -> Result<i32, BlockDecodeError> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.read_bytes(4)?);
        Ok(i32::from_le_bytes(buf))
    }

    pub fn read_u64_le(&mut self) -> Result<u64, BlockDecodeError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.read_bytes(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    pub fn read_hash(&mut self) -> Result<Hash32, BlockDecodeError> {
        let mut buf = [0u8; 32];
        buf.copy_from_slice(self.read_bytes(32)?);
        Ok(Hash32(buf))
    }

    /// Reads a canonical `CompactSize` integer.
    pub fn read_compact_size(&mut self) -> Result<u64, BlockDecodeError> {
        let value = match self.read_u8()? {
            n @ 0..=0xfc => return Ok(u64::from(n)),
            0xfd => {
                let v = u64::from(self.read_u16_le()?);
                if v < 0xfd {
                    return Err(BlockDecodeError::NonCanonicalCompactSize);
                }
                v
            }
            0xfe => {
                let v = u64::from(self.read_u32_le()?);
                if v <= 0xffff {
                    return Err(BlockDecodeError::NonCanonicalCompactSize);
                }
                v
            }
            0xff => {
                let v = self.read_u64_le()?;
                if v <= 0xffff_ffff {
                    return Err(BlockDecodeError::NonCanonicalCompactSize);
                }
                v
            }
        };
        Ok(value)
    }

    /// Reads an element count, rejecting counts that could not possibly fit
    /// in the remaining bytes at `min_item_size` bytes each.
    pub fn read_count(&mut self, min_item_size: usize) -> Result<usize, BlockDecodeError> {
        let count = self.read_compact_size()?;
        let fits = usize::try_from(count)
            .ok()
            .and_then(|c| c.checked_mul(min_item_size.max(1)))
            .is_some_and(|bytes| bytes <= self.remaining());
        if !fits {
            return Err(BlockDecodeError::CountTooLarge(count));
        }
        // `fits` implies the conversion succeeded
        Ok(count as usize)
    }

    /// Reads a length-prefixed byte string.
    pub fn read_var_bytes(&mut self) -> Result<&'a [u8], BlockDecodeError> {
        let len = self.read_count(1)?;
        self.read_bytes(len)
    }
}

pub(crate) fn write_compact_size(out: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xfc => out.push(value as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(value as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            out.push(0xfe);
            out.extend_from_slice(&(value as u32).to_le_bytes());
        }
        _ => {
            out.push(0xff);
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
}
