//! Chain position tracking.
//!
//! Every backend carries a [`ChainHeight`]: the block height it last reported
//! together with the cumulative chain work when the node exposes it. The
//! ordering defined here is the single rule the selector, the consensus engine
//! and the notification relay use to decide which backend is "ahead".
//!
//! ```text
//!            both sides report work?
//!                 │           │
//!                yes          no
//!                 │           │
//!          compare work   compare height
//!      (big-endian, MSB first)
//! ```
//!
//! The orphan-depth variant ([`ChainHeight::is_better_than_by`]) never forgives
//! a work deficit; it only relaxes how far ahead in height a backend has to be
//! before it displaces a more preferred one.

mod height;

pub use height::{ChainHeight, ChainWork, ChainWorkParseError};
