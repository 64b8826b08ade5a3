use serde_json::Map;

use crate::block::{
    asert::{self, AsertParams, CompactError},
    block_subsidy, BlockHeader, BlockTemplate,
};

/// Version stamped on placeholder templates (BIP9 top bits, no signals).
pub const PLACEHOLDER_VERSION: i32 = 0x2000_0000;

/// Builds an empty-block template extending `tip`, which sits at `tip_height`.
///
/// The target is projected with ASERT from the tip's timestamp, so a miner
/// polling right after a block lands can start work before any backend has
/// built a real template.
///
/// # Errors
///
/// Returns an error if the configured anchor or limit bits are invalid.
pub fn placeholder_template(
    params: &AsertParams,
    tip: &BlockHeader,
    tip_height: u64,
    now: u64,
) -> Result<BlockTemplate, CompactError> {
    let bits = asert::next_bits(params, tip_height, i64::from(tip.time))?;
    let target = asert::compact_to_u256(bits)?;
    let height = tip_height + 1;
    let min_time = u64::from(tip.time) + 1;

    Ok(BlockTemplate {
        capabilities: vec!["proposal".to_string()],
        version: PLACEHOLDER_VERSION,
        rules: Vec::new(),
        previous_block_hash: tip.hash(),
        transactions: Vec::new(),
        coinbase_aux: Map::new(),
        coinbase_value: block_subsidy(height),
        long_poll_id: None,
        target: asert::target_hex(target),
        min_time,
        mutable: vec!["time".to_string(), "transactions".to_string(), "prevblock".to_string()],
        nonce_range: "00000000ffffffff".to_string(),
        sigop_limit: None,
        size_limit: None,
        cur_time: now.max(min_time),
        bits: format!("{bits:08x}"),
        height,
        default_witness_commitment: None,
        extra: Map::new(),
    })
}
