//! Mock infrastructure for testing the balancer against scripted nodes.
//!
//! - `RpcMockBuilder`: a mockito server answering node JSON-RPC methods
//! - test helpers for templates, configs and runtimes
//!
//! ```ignore
//! use tests::mock_infrastructure::{template_json, RpcMockBuilder};
//!
//! let mut node = RpcMockBuilder::new().await;
//! node.mock_blockchain_info(100).mock_block_template(&template_json("a", 101));
//! let config = node.node_config("a", ConnectorKind::BitcoinCore);
//! ```

pub mod rpc_mock;
pub mod test_helpers;

pub use rpc_mock::RpcMockBuilder;
pub use test_helpers::*;
