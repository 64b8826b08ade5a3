//! JSON-RPC request routing.
//!
//! # Main Components
//!
//! - `ProxyEngine`: dispatches on the method name and fails over across backends
//! - `ProxyError`: client-side failures (unparseable body, undecodable block)
//!
//! # Dispatch
//!
//! | Method | Handling |
//! |--------|----------|
//! | `getblocktemplate`, `getblocktemplatelight` | Template cache |
//! | `submitblock` | Decode, then broadcast to every backend |
//! | `getzmqnotifications` | Configured publish ports, no backend contact |
//! | Anything else | Best backend first, next best on failure |
//!
//! ```text
//! Request ──► parse ── error ──► 400
//!               │
//!               ▼
//!        select_best(excluded) ── none ──► first failing reply, or 500
//!               │
//!               ▼
//!          forward ── ok ──► reply
//!               │
//!             failed: exclude, retry
//! ```

pub mod engine;
pub mod errors;

pub use engine::{ProxyEngine, RpcReply};
pub use errors::ProxyError;
