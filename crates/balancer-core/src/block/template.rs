use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{
    encoding::{merkle_root, sha256d, write_compact_size, BlockDecodeError},
    header::BlockHeader,
    transaction::Transaction,
};
use crate::types::Hash32;

const COIN: u64 = 100_000_000;
const HALVING_INTERVAL: u64 = 210_000;
/// Transactions smaller than this are rejected by BCH-family nodes.
const MIN_TRANSACTION_SIZE: usize = 100;
const OP_TRUE: u8 = 0x51;

/// Block subsidy at `height`: 50 coins halving every 210,000 blocks.
#[must_use]
pub fn block_subsidy(height: u64) -> u64 {
    let halvings = height / HALVING_INTERVAL;
    if halvings >= 64 {
        return 0;
    }
    (50 * COIN) >> halvings
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("invalid bits: {0}")]
    InvalidBits(String),
    #[error("invalid transaction {index}: {source}")]
    InvalidTransaction { index: usize, source: BlockDecodeError },
    #[error("invalid witness commitment: {0}")]
    InvalidCommitment(String),
}

/// One non-coinbase transaction of a BIP22 template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateTransaction {
    /// Hex-encoded serialized transaction.
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default)]
    pub depends: Vec<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sigops: Option<i64>,
    /// Node-specific members (e.g. `weight`) passed through unchanged.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `getblocktemplate` result as described in BIP22/BIP23.
///
/// Members this type does not model are kept in `extra` so a template fetched
/// from one node reaches the miner exactly as that node produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockTemplate {
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub version: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<String>,
    #[serde(rename = "previousblockhash")]
    pub previous_block_hash: Hash32,
    #[serde(default)]
    pub transactions: Vec<TemplateTransaction>,
    #[serde(rename = "coinbaseaux", default)]
    pub coinbase_aux: Map<String, Value>,
    #[serde(rename = "coinbasevalue")]
    pub coinbase_value: u64,
    #[serde(rename = "longpollid", default, skip_serializing_if = "Option::is_none")]
    pub long_poll_id: Option<String>,
    pub target: String,
    #[serde(rename = "mintime")]
    pub min_time: u64,
    #[serde(default)]
    pub mutable: Vec<String>,
    #[serde(rename = "noncerange", default = "default_nonce_range")]
    pub nonce_range: String,
    #[serde(rename = "sigoplimit", default, skip_serializing_if = "Option::is_none")]
    pub sigop_limit: Option<u64>,
    #[serde(rename = "sizelimit", default, skip_serializing_if = "Option::is_none")]
    pub size_limit: Option<u64>,
    #[serde(rename = "curtime")]
    pub cur_time: u64,
    pub bits: String,
    pub height: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_witness_commitment: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_nonce_range() -> String {
    "00000000ffffffff".to_string()
}

impl BlockTemplate {
    #[must_use]
    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    pub fn bits_u32(&self) -> Result<u32, TemplateError> {
        u32::from_str_radix(self.bits.trim(), 16)
            .map_err(|_| TemplateError::InvalidBits(self.bits.clone()))
    }

    /// Assembles a complete block from this template for `getblocktemplate`
    /// proposal mode.
    ///
    /// The coinbase pays `coinbasevalue` to an anyone-can-spend output and
    /// carries the BIP34 height. When the template advertises a witness
    /// commitment the coinbase includes it along with the all-zero witness
    /// reserved value the commitment was computed against.
    pub fn proposal_block(&self) -> Result<Vec<u8>, TemplateError> {
        let bits = self.bits_u32()?;
        let commitment = self
            .default_witness_commitment
            .as_deref()
            .map(hex::decode)
            .transpose()
            .map_err(|e| TemplateError::InvalidCommitment(e.to_string()))?;

        let transactions = self
            .transactions
            .iter()
            .enumerate()
            .map(|(index, tx)| {
                hex::decode(&tx.data)
                    .map_err(|e| BlockDecodeError::InvalidHex(e.to_string()))
                    .and_then(|raw| Transaction::from_bytes(&raw))
                    .map_err(|source| TemplateError::InvalidTransaction { index, source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let coinbase = Coinbase::new(self.height, self.coinbase_value, commitment);

        let mut txids = Vec::with_capacity(transactions.len() + 1);
        txids.push(coinbase.txid());
        txids.extend(transactions.iter().map(|tx| tx.txid));

        let header = BlockHeader {
            version: self.version,
            prev_block_hash: self.previous_block_hash,
            merkle_root: merkle_root(&txids),
            time: u32::try_from(self.cur_time).unwrap_or(u32::MAX),
            bits,
            nonce: 0,
        };

        let mut block = header.encode().to_vec();
        write_compact_size(&mut block, txids.len() as u64);
        block.extend_from_slice(&coinbase.serialize(true));
        for tx in &transactions {
            block.extend_from_slice(&tx.raw);
        }
        Ok(block)
    }

    /// Hex form of [`Self::proposal_block`], as sent in the `data` member.
    pub fn proposal_hex(&self) -> Result<String, TemplateError> {
        self.proposal_block().map(hex::encode)
    }
}

struct Coinbase {
    script_sig: Vec<u8>,
    value: u64,
    commitment: Option<Vec<u8>>,
}

impl Coinbase {
    fn new(height: u64, value: u64, commitment: Option<Vec<u8>>) -> Self {
        let mut coinbase = Self { script_sig: height_push(height), value, commitment };
        let size = coinbase.serialize(false).len();
        if size < MIN_TRANSACTION_SIZE {
            coinbase.script_sig.resize(coinbase.script_sig.len() + MIN_TRANSACTION_SIZE - size, 0);
        }
        coinbase
    }

    fn txid(&self) -> Hash32 {
        sha256d(&self.serialize(false))
    }

    fn serialize(&self, with_witness: bool) -> Vec<u8> {
        let with_witness = with_witness && self.commitment.is_some();
        let mut out = Vec::with_capacity(160);

        out.extend_from_slice(&2u32.to_le_bytes());
        if with_witness {
            out.extend_from_slice(&[0x00, 0x01]);
        }

        out.push(1);
        out.extend_from_slice(&[0u8; 32]);
        out.extend_from_slice(&u32::MAX.to_le_bytes());
        write_compact_size(&mut out, self.script_sig.len() as u64);
        out.extend_from_slice(&self.script_sig);
        out.extend_from_slice(&u32::MAX.to_le_bytes());

        out.push(if self.commitment.is_some() { 2 } else { 1 });
        out.extend_from_slice(&self.value.to_le_bytes());
        out.extend_from_slice(&[1, OP_TRUE]);
        if let Some(script) = &self.commitment {
            out.extend_from_slice(&0u64.to_le_bytes());
            write_compact_size(&mut out, script.len() as u64);
            out.extend_from_slice(script);
        }

        if with_witness {
            out.extend_from_slice(&[1, 32]);
            out.extend_from_slice(&[0u8; 32]);
        }

        out.extend_from_slice(&0u32.to_le_bytes());
        out
    }
}

/// Script pushing `height` the way `CScript() << height` does.
fn height_push(height: u64) -> Vec<u8> {
    match height {
        0 => vec![0x00],
        1..=16 => vec![0x50 + height as u8],
        _ => {
            let mut num = Vec::with_capacity(9);
            let mut rest = height;
            while rest > 0 {
                num.push((rest & 0xff) as u8);
                rest >>= 8;
            }
            if num.last().is_some_and(|b| b & 0x80 != 0) {
                num.push(0x00);
            }
            let mut script = Vec::with_capacity(num.len() + 1);
            script.push(num.len() as u8);
            script.extend_from_slice(&num);
            script
        }
    }
}
