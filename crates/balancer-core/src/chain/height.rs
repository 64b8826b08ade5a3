use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, fmt, str::FromStr};

/// Error type for chain work parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainWorkParseError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),
    #[error("chain work too long: {0} bytes")]
    TooLong(usize),
}

/// Cumulative proof-of-work as a 256-bit big-endian unsigned integer.
///
/// The derived ordering compares the byte arrays lexicographically, which for
/// fixed-width big-endian values is exactly unsigned numeric comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ChainWork(pub [u8; 32]);

impl ChainWork {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parses the hex string nodes return in `getblockchaininfo.chainwork`.
    ///
    /// Shorter strings are left-padded with zeros, so `"0a"` and `"000a"` parse
    /// to the same value.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not hex or encodes more than 32 bytes.
    pub fn from_hex(value: &str) -> Result<Self, ChainWorkParseError> {
        let trimmed = value.trim().trim_start_matches("0x");
        let padded = if trimmed.len() % 2 == 1 { format!("0{trimmed}") } else { trimmed.to_string() };
        let bytes =
            hex::decode(&padded).map_err(|e| ChainWorkParseError::InvalidHex(e.to_string()))?;

        let significant = match bytes.iter().position(|b| *b != 0) {
            Some(first) => &bytes[first..],
            None => &[][..],
        };
        if significant.len() > 32 {
            return Err(ChainWorkParseError::TooLong(significant.len()));
        }

        let mut work = [0u8; 32];
        work[32 - significant.len()..].copy_from_slice(significant);
        Ok(Self(work))
    }
}

impl From<[u8; 32]> for ChainWork {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl FromStr for ChainWork {
    type Err = ChainWorkParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl fmt::Display for ChainWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Block height paired with the chain work a node reported alongside it.
///
/// # Ordering
///
/// When both sides carry work the comparison is decided by work alone; height
/// only breaks exact work ties so that `Ord` stays consistent with `Eq`. When
/// either side lacks work the comparison falls back to height, with a work
/// presence tie-break for the same reason.
///
/// # Example
///
/// ```
/// use balancer_core::chain::{ChainHeight, ChainWork};
///
/// let lagging = ChainHeight::new(99, None);
/// let tip = ChainHeight::new(100, None);
///
/// assert!(tip.is_better_than(&lagging));
/// // With an orphan depth of two, one block ahead is not enough.
/// assert!(!tip.is_better_than_by(&lagging, 2));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ChainHeight {
    pub height: u64,
    pub chain_work: Option<ChainWork>,
}

impl ChainHeight {
    /// Default for a backend that has never been queried.
    pub const UNKNOWN: ChainHeight = ChainHeight { height: 0, chain_work: None };

    #[must_use]
    pub const fn new(height: u64, chain_work: Option<ChainWork>) -> Self {
        Self { height, chain_work }
    }

    #[must_use]
    pub fn is_unknown(&self) -> bool {
        *self == Self::UNKNOWN
    }

    /// Strict comparison with no orphan tolerance.
    #[must_use]
    pub fn is_better_than(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Greater
    }

    /// Tolerant comparison used by the selector.
    ///
    /// A work deficit always loses. Otherwise `self` wins only when it is at
    /// least `orphan_depth` blocks ahead. An `orphan_depth` of zero is the plain
    /// strict comparison.
    #[must_use]
    pub fn is_better_than_by(&self, other: &Self, orphan_depth: u64) -> bool {
        if orphan_depth == 0 {
            return self.is_better_than(other);
        }

        if let (Some(ours), Some(theirs)) = (&self.chain_work, &other.chain_work) {
            if ours < theirs {
                return false;
            }
        }

        self.height >= other.height.saturating_add(orphan_depth)
    }

    /// Returns `true` when `self` trails `best`.
    #[must_use]
    pub fn is_behind(&self, best: &Self) -> bool {
        best.is_better_than(self)
    }
}

impl Ord for ChainHeight {
    fn cmp(&self, other: &Self) -> Ordering {
        match (&self.chain_work, &other.chain_work) {
            (Some(ours), Some(theirs)) => {
                ours.cmp(theirs).then_with(|| self.height.cmp(&other.height))
            }
            _ => self
                .height
                .cmp(&other.height)
                .then_with(|| self.chain_work.cmp(&other.chain_work)),
        }
    }
}

impl PartialOrd for ChainHeight {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ChainHeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.chain_work {
            Some(work) => write!(f, "{} ({work})", self.height),
            None => write!(f, "{} (no work)", self.height),
        }
    }
}
