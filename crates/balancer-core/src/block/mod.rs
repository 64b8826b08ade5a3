//! Bitcoin block primitives the proxy needs to reason about on its own.
//!
//! The proxy never validates consensus rules; it only decodes what it must:
//!
//! - [`BlockHeader`]: 80-byte headers carried by raw-block notifications and
//!   returned by `getblockheader`.
//! - [`Block`]: full blocks submitted through `submitblock`, decoded to reject
//!   garbage before any node is contacted.
//! - [`BlockTemplate`]: the BIP22 `getblocktemplate` object, plus assembly of
//!   a proposal block so other nodes can vote on a template.
//! - [`asert`]: aserti3-2d target projection for the empty-block placeholder.

pub mod asert;
mod encoding;
mod header;
mod template;
mod transaction;

pub use encoding::{merkle_root, sha256d, BlockDecodeError, ByteReader};
pub use header::{BlockHeader, HEADER_SIZE};
pub use template::{block_subsidy, BlockTemplate, TemplateError, TemplateTransaction};
pub use transaction::{Block, Transaction};
