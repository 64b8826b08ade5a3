//! Backend node access and best-node selection.
//!
//! This module owns everything that talks to an upstream node:
//! - the [`NodeConnector`] capability trait and its JSON-RPC implementation
//! - the shared [`HttpClient`] with its concurrency limit
//! - the [`Backend`] registry entry with its advance-only chain height
//! - the [`NodeSelector`] that picks the best eligible backend per decision
//! - the [`ChainHeightMonitor`] that keeps lagging backends' heights current
//!
//! # Selection
//!
//! There is no cached leader. Every routing decision calls
//! [`NodeSelector::select_best`], which walks the rank-ordered registry and
//! keeps the backend with the best chain height, ties going to the lower rank.
//! An orphan-depth tolerance lets a preferred backend that is a block or two
//! behind stay selected while blocks propagate.

pub mod bitcoin_rpc;
pub mod connector;
pub mod endpoint;
pub mod errors;
pub mod health;
pub mod http_client;
pub mod selector;

#[cfg(test)]
pub(crate) mod testing;

pub use bitcoin_rpc::{BitcoinRpcConnector, RpcEndpoint};
pub use connector::{is_successful_rpc_response, ConnectorKind, NodeConnector};
pub use endpoint::{Backend, BackendKey, DEFAULT_BACKEND_TIMEOUT};
pub use errors::UpstreamError;
pub use health::{query_all, refresh_lagging, ChainHeightMonitor};
pub use http_client::{HttpClient, HttpClientConfig, HttpResponse, RpcCredentials};
pub use selector::NodeSelector;
