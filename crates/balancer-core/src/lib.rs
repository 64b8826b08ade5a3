//! # Balancer Core
//!
//! Core library for a chain-aware reverse proxy in front of several Bitcoin
//! compatible nodes. Mining software talks to one JSON-RPC endpoint; the proxy
//! picks the node on the best chain, hands out block templates other nodes
//! agree on and fans node notifications back out.
//!
//! - **[`chain`]**: `ChainHeight` and the orphan-tolerant comparison.
//!
//! - **[`upstream`]**: backend registry, best-node selection, node connectors and
//!   the chain-height monitor.
//!
//! - **[`template`]**: quorum-validated block templates and the background
//!   template cache.
//!
//! - **[`notify`]**: ZMQ subscriptions to nodes, deduplication and the proxy's own
//!   ZMQ publishers.
//!
//! - **[`proxy`]**: JSON-RPC dispatch with failover.
//!
//! - **[`block`]**: block, header and template primitives, ASERT difficulty.
//!
//! - **[`config`]** and **[`runtime`]**: layered configuration and component
//!   lifecycle.
//!
//! ## Request Flow
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────┐
//! │ ProxyEngine │
//! │  (dispatch) │
//! └──────┬──────┘
//!        │
//!    ┌───┴──────────────┬─────────────────┐
//!    ▼                  ▼                 ▼
//! getblocktemplate   submitblock      other methods
//!    │                  │                 │
//!    ▼                  ▼                 ▼
//! TemplateCache     every backend     NodeSelector
//!    │              in parallel       best-first, failover
//!    ▼
//! TemplateConsensus
//! (fetch, validate on peers, quorum)
//! ```

pub mod block;
pub mod chain;
pub mod config;
pub mod notify;
pub mod proxy;
pub mod runtime;
pub mod template;
pub mod types;
pub mod upstream;
