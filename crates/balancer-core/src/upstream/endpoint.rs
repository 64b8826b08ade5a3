use arc_swap::ArcSwap;
use bytes::Bytes;
use std::{fmt, sync::Arc, time::Duration};
use tracing::{debug, info};

use crate::{
    block::{BlockHeader, BlockTemplate},
    chain::ChainHeight,
    types::{Hash32, NotificationType},
    upstream::{connector::NodeConnector, http_client::HttpResponse},
};

use super::errors::UpstreamError;

/// Timeout applied to calls against a node without a configured `max_timeout`.
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Identity of a backend for exclusion sets: `(host, port, rank)`.
///
/// Two entries pointing at the same node with different ranks are distinct;
/// the display name plays no part.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BackendKey {
    pub host: String,
    pub port: u16,
    pub rank: usize,
}

/// One configured node: connector, static preference rank, per-node timeout
/// and the last chain height it reported.
///
/// The chain height only ever advances. Writers from the chain monitor and
/// from notification callbacks race through [`Backend::update_chain_height`],
/// which swaps in a whole new value only when it is strictly better.
pub struct Backend {
    name: String,
    rank: usize,
    max_timeout: Option<Duration>,
    connector: Arc<dyn NodeConnector>,
    chain_height: ArcSwap<ChainHeight>,
}

impl Backend {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        rank: usize,
        max_timeout: Option<Duration>,
        connector: Arc<dyn NodeConnector>,
    ) -> Self {
        Self {
            name: name.into(),
            rank,
            max_timeout,
            connector,
            chain_height: ArcSwap::from_pointee(ChainHeight::UNKNOWN),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.rank
    }

    #[must_use]
    pub fn host(&self) -> &str {
        self.connector.host()
    }

    #[must_use]
    pub fn key(&self) -> BackendKey {
        BackendKey { host: self.connector.host().to_string(), port: self.connector.port(), rank: self.rank }
    }

    #[must_use]
    pub fn connector(&self) -> &Arc<dyn NodeConnector> {
        &self.connector
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.max_timeout.unwrap_or(DEFAULT_BACKEND_TIMEOUT)
    }

    #[must_use]
    pub fn chain_height(&self) -> ChainHeight {
        **self.chain_height.load()
    }

    /// Stores `candidate` if it is strictly better than the current value.
    ///
    /// Returns `true` when the stored height changed.
    pub fn update_chain_height(&self, candidate: ChainHeight) -> bool {
        let mut improved = false;
        self.chain_height.rcu(|current| {
            improved = candidate.is_better_than(current);
            if improved {
                Arc::new(candidate)
            } else {
                Arc::clone(current)
            }
        });

        if improved {
            debug!(backend = %self.name, height = candidate.height, "chain height advanced");
        }
        improved
    }

    /// Queries the node and stores the answer if it is better.
    ///
    /// Returns the height the node reported, whether or not it was stored.
    pub async fn refresh_chain_height(&self) -> Result<ChainHeight, UpstreamError> {
        let reported = self.connector.chain_height(self.timeout()).await?;
        if self.update_chain_height(reported) {
            info!(backend = %self.name, chain_height = %reported, "backend chain height updated");
        }
        Ok(reported)
    }

    pub async fn fetch_template(&self) -> Result<BlockTemplate, UpstreamError> {
        self.connector.fetch_template(self.timeout()).await
    }

    pub async fn validate_template(
        &self,
        template: &BlockTemplate,
    ) -> Result<Option<bool>, UpstreamError> {
        self.connector.validate_template(template, self.timeout()).await
    }

    pub async fn submit_block(&self, block_hex: &str) -> Result<bool, UpstreamError> {
        self.connector.submit_block(block_hex, self.timeout()).await
    }

    pub async fn block_header(&self, hash: &Hash32) -> Result<BlockHeader, UpstreamError> {
        self.connector.block_header(hash, self.timeout()).await
    }

    pub async fn handle_request(&self, body: Bytes) -> Result<HttpResponse, UpstreamError> {
        self.connector.handle_request(body, self.timeout()).await
    }

    #[must_use]
    pub fn supports_notification(&self, kind: NotificationType) -> bool {
        self.connector.supports_notification(kind)
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("name", &self.name)
            .field("rank", &self.rank)
            .field("host", &self.connector.host())
            .field("port", &self.connector.port())
            .field("chain_height", &self.chain_height())
            .finish()
    }
}
