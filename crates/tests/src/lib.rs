//! Integration tests for the node balancer.
//!
//! Each backend node is a `mockito` server reached through the real
//! `BitcoinRpcConnector`, so these tests exercise the same HTTP path a
//! deployment does.
//!
//! - `failover_tests`: best-node routing and failover of forwarded methods
//! - `consensus_tests`: template consensus and the template cache
//! - `submit_block_tests`: block broadcast and decode failures
//! - `notification_tests`: webhooks, node subscriptions, dedup and re-publication
//! - `runtime_tests`: builder validation, startup queries, shutdown
//! - `mock_infrastructure`: reusable node mocks and fixtures
//!
//! ```bash
//! cargo test --package tests
//! ```

#[cfg(test)]
mod consensus_tests;

#[cfg(test)]
mod failover_tests;

#[cfg(test)]
mod notification_tests;

#[cfg(test)]
mod runtime_tests;


/// Mock infrastructure for testing
pub mod mock_infrastructure;
