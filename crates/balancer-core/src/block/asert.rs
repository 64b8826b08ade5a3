//! aserti3-2d target computation.
//!
//! Used only to stamp a plausible target on the empty-block placeholder served
//! between a new tip arriving and a node-built template replacing it.

use primitive_types::U256;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CompactError {
    #[error("compact target has negative sign bit")]
    Negative,
    #[error("compact target overflows 256-bit range")]
    Overflow,
}

/// Anchor block and schedule parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AsertParams {
    pub anchor_height: u64,
    /// Timestamp of the anchor block's parent.
    pub anchor_parent_time: i64,
    pub anchor_bits: u32,
    pub half_life_seconds: i64,
    pub target_spacing_seconds: i64,
    pub pow_limit_bits: u32,
}

impl AsertParams {
    /// Checks that both compact targets decode and the anchor is within the
    /// proof-of-work limit.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        let anchor = compact_to_u256(self.anchor_bits)
            .map_err(|e| format!("Invalid anchor_bits {:#010x}: {e}", self.anchor_bits))?;
        let limit = compact_to_u256(self.pow_limit_bits)
            .map_err(|e| format!("Invalid pow_limit_bits {:#010x}: {e}", self.pow_limit_bits))?;
        if anchor.is_zero() || anchor > limit {
            return Err(format!("anchor_bits {:#010x} is outside the proof-of-work limit", self.anchor_bits));
        }
        if self.half_life_seconds <= 0 || self.target_spacing_seconds <= 0 {
            return Err("ASERT half life and target spacing must be positive".to_string());
        }
        Ok(())
    }
}

impl Default for AsertParams {
    /// BCH mainnet anchor (block 661647).
    fn default() -> Self {
        Self {
            anchor_height: 661_647,
            anchor_parent_time: 1_605_447_844,
            anchor_bits: 0x1804_dafe,
            half_life_seconds: 2 * 24 * 60 * 60,
            target_spacing_seconds: 600,
            pow_limit_bits: 0x1d00_ffff,
        }
    }
}

pub fn compact_to_u256(bits: u32) -> Result<U256, CompactError> {
    let size = bits >> 24;
    let mut word = bits & 0x007f_ffff;

    if bits & 0x0080_0000 != 0 {
        return Err(CompactError::Negative);
    }

    let value = if size <= 3 {
        word >>= 8 * (3 - size);
        U256::from(word)
    } else {
        U256::from(word) << (8 * (size - 3))
    };

    if word != 0 && (size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32)) {
        return Err(CompactError::Overflow);
    }

    Ok(value)
}

#[must_use]
pub fn u256_to_compact(value: U256) -> u32 {
    if value.is_zero() {
        return 0;
    }

    let mut size = ((value.bits() + 7) / 8) as u32;
    let mut compact = if size <= 3 {
        value.low_u32() << (8 * (3 - size))
    } else {
        (value >> (8 * (size - 3))).low_u32()
    };

    if compact & 0x0080_0000 != 0 {
        compact >>= 8;
        size += 1;
    }

    (size << 24) | (compact & 0x007f_ffff)
}

/// 64-character big-endian hex, the form of the BIP22 `target` member.
#[must_use]
pub fn target_hex(target: U256) -> String {
    format!("{target:064x}")
}

/// Target for the block following `prev_height`, whose timestamp is `prev_time`.
///
/// # Errors
///
/// Returns an error if the anchor or limit bits do not encode a valid target.
pub fn next_target(params: &AsertParams, prev_height: u64, prev_time: i64) -> Result<U256, CompactError> {
    let anchor_target = compact_to_u256(params.anchor_bits)?;
    let pow_limit = compact_to_u256(params.pow_limit_bits)?;

    let time_diff = i128::from(prev_time) - i128::from(params.anchor_parent_time);
    let height_diff = i128::from(prev_height) - i128::from(params.anchor_height);

    // truncating division, then an arithmetic shift for the integer part
    let exponent = ((time_diff - i128::from(params.target_spacing_seconds) * (height_diff + 1))
        * 65536) /
        i128::from(params.half_life_seconds.max(1));
    let mut shifts = exponent >> 16;
    let frac = u128::from(exponent as u16);

    let factor = 65536 +
        ((195_766_423_245_049 * frac +
            971_821_376 * frac * frac +
            5_127 * frac * frac * frac +
            (1u128 << 47)) >>
            48);

    let (mut next, overflowed) = anchor_target.overflowing_mul(U256::from(factor as u64));
    if overflowed {
        return Ok(pow_limit);
    }

    shifts -= 16;
    if shifts <= 0 {
        let right = -shifts;
        next = if right >= 256 { U256::zero() } else { next >> (right as usize) };
    } else if shifts >= 256 {
        next = pow_limit;
    } else {
        let left = shifts as usize;
        let shifted = next << left;
        next = if (shifted >> left) == next { shifted } else { pow_limit };
    }

    if next.is_zero() {
        Ok(U256::one())
    } else if next > pow_limit {
        Ok(pow_limit)
    } else {
        Ok(next)
    }
}

/// Compact bits for the block following `prev_height`.
pub fn next_bits(params: &AsertParams, prev_height: u64, prev_time: i64) -> Result<u32, CompactError> {
    next_target(params, prev_height, prev_time).map(u256_to_compact)
}
