use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Value};
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::{
    block::{BlockHeader, BlockTemplate},
    chain::{ChainHeight, ChainWork},
    notify::subscriber::NotificationSubscriber,
    types::{methods, Hash32, JsonRpcRequest, JsonRpcResponse, Notification, NotificationType},
    upstream::{
        connector::{ConnectorKind, NodeConnector},
        http_client::{HttpClient, HttpResponse, RpcCredentials},
        UpstreamError,
    },
};

/// Network location and credentials of a node's RPC interface.
#[derive(Debug, Clone)]
pub struct RpcEndpoint {
    pub host: String,
    pub port: u16,
    pub secure: bool,
    pub credentials: Option<RpcCredentials>,
}

impl RpcEndpoint {
    #[must_use]
    pub fn url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}:{}/", self.host, self.port)
    }
}

#[derive(Debug, Deserialize)]
struct BlockchainInfo {
    blocks: u64,
    #[serde(default)]
    chainwork: Option<String>,
}

/// JSON-RPC over HTTP connector for Bitcoin Core style nodes.
///
/// One type covers all three flavors; [`ConnectorKind`] only switches how
/// validation and chain work are treated.
pub struct BitcoinRpcConnector {
    endpoint: RpcEndpoint,
    url: String,
    kind: ConnectorKind,
    client: Arc<HttpClient>,
    notification_ports: BTreeMap<NotificationType, u16>,
    next_id: AtomicU64,
}

impl BitcoinRpcConnector {
    #[must_use]
    pub fn new(endpoint: RpcEndpoint, kind: ConnectorKind, client: Arc<HttpClient>) -> Self {
        let url = endpoint.url();
        Self {
            endpoint,
            url,
            kind,
            client,
            notification_ports: BTreeMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn with_notification_ports(mut self, ports: BTreeMap<NotificationType, u16>) -> Self {
        self.notification_ports = ports;
        self
    }

    /// Calls `method` and returns its `result`, mapping every failure shape
    /// (HTTP status, JSON-RPC error, unparseable body) to an error.
    async fn call(&self, method: &str, params: Value, timeout: Duration) -> Result<Value, UpstreamError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(method, Some(params), json!(id));
        let body = request
            .to_bytes()
            .map_err(|e| UpstreamError::InvalidResponse(format!("request encoding failed: {e}")))?;

        let response = self.client.post(&self.url, body, self.endpoint.credentials.as_ref(), timeout).await?;

        // Core answers RPC errors with HTTP 500 and a JSON body, so look at
        // the body before the status.
        let parsed = serde_json::from_slice::<JsonRpcResponse>(&response.body);
        if let Ok(JsonRpcResponse { error: Some(error), .. }) = parsed {
            return Err(UpstreamError::RpcError(error.code, error.message));
        }

        if !response.is_success() {
            let text = String::from_utf8_lossy(&response.body);
            let truncated: String = text.chars().take(256).collect();
            return Err(UpstreamError::HttpError(response.status, truncated));
        }

        parsed
            .map(|reply| reply.result)
            .map_err(|e| UpstreamError::InvalidResponse(format!("{method}: {e}")))
    }
}

/// Interprets a `submitblock` or proposal result string.
///
/// `None` is acceptance, `duplicate` means the node already has the block,
/// `inconclusive` means it could not decide.
fn interpret_block_result(result: &Value) -> Option<bool> {
    match result {
        Value::Null => Some(true),
        Value::String(reason) if reason == "duplicate" => Some(true),
        Value::String(reason) if reason.starts_with("inconclusive") => None,
        _ => Some(false),
    }
}

#[async_trait]
impl NodeConnector for BitcoinRpcConnector {
    fn host(&self) -> &str {
        &self.endpoint.host
    }

    fn port(&self) -> u16 {
        self.endpoint.port
    }

    fn kind(&self) -> ConnectorKind {
        self.kind
    }

    async fn fetch_template(&self, timeout: Duration) -> Result<BlockTemplate, UpstreamError> {
        let request = match self.kind {
            ConnectorKind::Bchd => json!([{ "capabilities": ["proposal"] }]),
            _ => json!([{ "capabilities": ["proposal"], "rules": ["segwit"] }]),
        };
        let result = self.call(methods::GET_BLOCK_TEMPLATE, request, timeout).await?;
        serde_json::from_value(result)
            .map_err(|e| UpstreamError::InvalidResponse(format!("getblocktemplate: {e}")))
    }

    async fn validate_template(
        &self,
        template: &BlockTemplate,
        timeout: Duration,
    ) -> Result<Option<bool>, UpstreamError> {
        if !self.kind.supports_validation() {
            return Ok(None);
        }

        let data = match template.proposal_hex() {
            Ok(data) => data,
            Err(e) => {
                warn!(host = %self.endpoint.host, error = %e, "template cannot be assembled into a proposal");
                return Ok(Some(false));
            }
        };

        let result = self
            .call(methods::GET_BLOCK_TEMPLATE, json!([{ "mode": "proposal", "data": data }]), timeout)
            .await?;

        let verdict = interpret_block_result(&result);
        if verdict == Some(false) {
            debug!(host = %self.endpoint.host, reason = %result, "template proposal rejected");
        }
        Ok(verdict)
    }

    async fn submit_block(&self, block_hex: &str, timeout: Duration) -> Result<bool, UpstreamError> {
        let result = self.call(methods::SUBMIT_BLOCK, json!([block_hex]), timeout).await?;
        match interpret_block_result(&result) {
            Some(false) => {
                debug!(host = %self.endpoint.host, reason = %result, "block rejected");
                Ok(false)
            }
            _ => Ok(true),
        }
    }

    async fn chain_height(&self, timeout: Duration) -> Result<ChainHeight, UpstreamError> {
        let result = self.call(methods::GET_BLOCKCHAIN_INFO, json!([]), timeout).await?;
        let info: BlockchainInfo = serde_json::from_value(result)
            .map_err(|e| UpstreamError::InvalidResponse(format!("getblockchaininfo: {e}")))?;

        let chain_work = match info.chainwork.as_deref() {
            Some(hex) if !hex.is_empty() => Some(
                ChainWork::from_hex(hex)
                    .map_err(|e| UpstreamError::InvalidResponse(format!("chainwork: {e}")))?,
            ),
            _ => None,
        };

        Ok(ChainHeight::new(info.blocks, chain_work))
    }

    async fn block_header(
        &self,
        hash: &Hash32,
        timeout: Duration,
    ) -> Result<BlockHeader, UpstreamError> {
        let result = self
            .call(methods::GET_BLOCK_HEADER, json!([hash.to_display_hex(), false]), timeout)
            .await?;
        let hex = result
            .as_str()
            .ok_or_else(|| UpstreamError::InvalidResponse("getblockheader: expected hex string".into()))?;
        Ok(BlockHeader::from_hex(hex)?)
    }

    async fn handle_request(
        &self,
        body: Bytes,
        timeout: Duration,
    ) -> Result<HttpResponse, UpstreamError> {
        self.client.post(&self.url, body, self.endpoint.credentials.as_ref(), timeout).await
    }

    fn supports_notification(&self, kind: NotificationType) -> bool {
        self.notification_ports.contains_key(&kind)
    }

    fn subscribe(
        &self,
        sink: mpsc::Sender<Notification>,
        shutdown: &broadcast::Sender<()>,
    ) -> Vec<JoinHandle<()>> {
        self.notification_ports
            .iter()
            .map(|(kind, port)| {
                NotificationSubscriber::new(self.endpoint.host.clone(), *port, *kind)
                    .spawn(sink.clone(), shutdown.subscribe())
            })
            .collect()
    }
}
