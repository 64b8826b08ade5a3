use bytes::Bytes;

use super::{
    encoding::{merkle_root, sha256d, BlockDecodeError, ByteReader},
    header::BlockHeader,
};
use crate::types::Hash32;

/// Smallest possible serialized input: outpoint, empty script, sequence.
const MIN_INPUT_SIZE: usize = 41;
/// Smallest possible serialized output: value and empty script.
const MIN_OUTPUT_SIZE: usize = 9;

/// A decoded transaction. Only the raw bytes and identifiers are retained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub raw: Bytes,
    pub txid: Hash32,
    pub wtxid: Hash32,
    pub input_count: usize,
    pub output_count: usize,
}

impl Transaction {
    /// Decodes one transaction in either legacy or BIP144 (segwit) form.
    pub fn decode(reader: &mut ByteReader<'_>) -> Result<Self, BlockDecodeError> {
        let start = reader.position();
        let version = reader.read_bytes(4)?;

        let segwit = reader.peek_u8(0) == Some(0x00) && reader.peek_u8(1) == Some(0x01);
        if segwit {
            reader.read_bytes(2)?;
        }

        let body_start = reader.position();
        let input_count = reader.read_count(MIN_INPUT_SIZE)?;
        for _ in 0..input_count {
            reader.read_bytes(36)?;
            reader.read_var_bytes()?;
            reader.read_bytes(4)?;
        }
        let output_count = reader.read_count(MIN_OUTPUT_SIZE)?;
        for _ in 0..output_count {
            reader.read_bytes(8)?;
            reader.read_var_bytes()?;
        }
        let body = reader.consumed_since(body_start);

        if segwit {
            let mut any_witness = false;
            for _ in 0..input_count {
                let items = reader.read_count(1)?;
                any_witness |= items > 0;
                for _ in 0..items {
                    reader.read_var_bytes()?;
                }
            }
            if !any_witness {
                return Err(BlockDecodeError::EmptyWitness);
            }
        }

        let lock_time = reader.read_bytes(4)?;
        let raw = reader.consumed_since(start);

        let txid = if segwit {
            let mut stripped = Vec::with_capacity(body.len() + 8);
            stripped.extend_from_slice(version);
            stripped.extend_from_slice(body);
            stripped.extend_from_slice(lock_time);
            sha256d(&stripped)
        } else {
            sha256d(raw)
        };

        Ok(Self {
            raw: Bytes::copy_from_slice(raw),
            txid,
            wtxid: sha256d(raw),
            input_count,
            output_count,
        })
    }

    /// Decodes exactly one transaction from `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BlockDecodeError> {
        let mut reader = ByteReader::new(bytes);
        let tx = Self::decode(&mut reader)?;
        match reader.remaining() {
            0 => Ok(tx),
            n => Err(BlockDecodeError::TrailingBytes(n)),
        }
    }
}

/// A fully decoded block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Decodes a serialized block. Trailing bytes are an error.
    pub fn decode(bytes: &[u8]) -> Result<Self, BlockDecodeError> {
        let mut reader = ByteReader::new(bytes);
        let header = BlockHeader::decode(&mut reader)?;

        let count = reader.read_count(MIN_INPUT_SIZE + MIN_OUTPUT_SIZE)?;
        if count == 0 {
            return Err(BlockDecodeError::NoTransactions);
        }

        let transactions =
            (0..count).map(|_| Transaction::decode(&mut reader)).collect::<Result<Vec<_>, _>>()?;

        match reader.remaining() {
            0 => Ok(Self { header, transactions }),
            n => Err(BlockDecodeError::TrailingBytes(n)),
        }
    }

    pub fn from_hex(value: &str) -> Result<Self, BlockDecodeError> {
        let bytes =
            hex::decode(value.trim()).map_err(|e| BlockDecodeError::InvalidHex(e.to_string()))?;
        Self::decode(&bytes)
    }

    #[must_use]
    pub fn hash(&self) -> Hash32 {
        self.header.hash()
    }

    /// Merkle root recomputed from the transaction ids.
    #[must_use]
    pub fn computed_merkle_root(&self) -> Hash32 {
        let txids: Vec<Hash32> = self.transactions.iter().map(|tx| tx.txid).collect();
        merkle_root(&txids)
    }
}
