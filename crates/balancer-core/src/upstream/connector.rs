use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};

use crate::{
    block::{BlockHeader, BlockTemplate},
    chain::ChainHeight,
    types::{Hash32, Notification, NotificationType},
    upstream::{http_client::HttpResponse, UpstreamError},
};

/// Node software flavor behind a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectorKind {
    /// Bitcoin Core compatible: templates, proposal validation, chain work.
    #[default]
    #[serde(alias = "DEFAULT")]
    BitcoinCore,
    /// Bitcoin Core compatible node that is never asked to validate.
    NoValidate,
    /// bchd: no proposal validation, chain work may be absent.
    Bchd,
}

impl ConnectorKind {
    #[must_use]
    pub fn supports_validation(&self) -> bool {
        matches!(self, Self::BitcoinCore)
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BitcoinCore => "BITCOIN_CORE",
            Self::NoValidate => "NO_VALIDATE",
            Self::Bchd => "BCHD",
        }
    }
}

/// Capability set the core needs from one backend node.
///
/// Implementations translate each capability into the node's own RPC dialect.
/// Every call is bounded by the `timeout` passed in; an elapsed timeout is an
/// error, never retried by the connector itself.
#[async_trait]
pub trait NodeConnector: Send + Sync {
    fn host(&self) -> &str;

    fn port(&self) -> u16;

    fn kind(&self) -> ConnectorKind;

    async fn fetch_template(&self, timeout: Duration) -> Result<BlockTemplate, UpstreamError>;

    /// Asks the node whether `template` would make a valid block.
    ///
    /// `Ok(None)` means the node has no opinion (validation unsupported or
    /// inconclusive), which is distinct from a rejection.
    async fn validate_template(
        &self,
        template: &BlockTemplate,
        timeout: Duration,
    ) -> Result<Option<bool>, UpstreamError>;

    /// Submits a hex-encoded block. `Ok(true)` when the node accepted it.
    async fn submit_block(&self, block_hex: &str, timeout: Duration) -> Result<bool, UpstreamError>;

    async fn chain_height(&self, timeout: Duration) -> Result<ChainHeight, UpstreamError>;

    async fn block_header(
        &self,
        hash: &Hash32,
        timeout: Duration,
    ) -> Result<BlockHeader, UpstreamError>;

    /// Forwards a raw JSON-RPC request body and returns the node's reply as-is.
    async fn handle_request(
        &self,
        body: Bytes,
        timeout: Duration,
    ) -> Result<HttpResponse, UpstreamError>;

    fn is_successful_response(&self, response: &HttpResponse) -> bool {
        is_successful_rpc_response(response)
    }

    fn supports_notification(&self, kind: NotificationType) -> bool;

    /// Starts listening for the node's own notifications, pushing each into
    /// `sink` until `shutdown` fires.
    fn subscribe(
        &self,
        _sink: mpsc::Sender<Notification>,
        _shutdown: &broadcast::Sender<()>,
    ) -> Vec<JoinHandle<()>> {
        Vec::new()
    }
}

/// A reply counts as successful when it is HTTP 2xx, parses as a JSON object
/// and its `error` member is absent or null.
#[must_use]
pub fn is_successful_rpc_response(response: &HttpResponse) -> bool {
    if !response.is_success() {
        return false;
    }

    match serde_json::from_slice::<serde_json::Value>(&response.body) {
        Ok(serde_json::Value::Object(map)) => map.get("error").map_or(true, serde_json::Value::is_null),
        _ => false,
    }
}
