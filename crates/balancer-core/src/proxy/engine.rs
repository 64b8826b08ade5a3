use bytes::Bytes;
use futures::future::join_all;
use serde::Serialize;
use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
    time::Instant,
};
use tracing::{debug, info, warn};

use super::errors::ProxyError;
use crate::{
    block::Block,
    template::TemplateCache,
    types::{methods, JsonRpcRequest, JsonRpcResponse, NotificationType},
    upstream::{HttpResponse, NodeSelector},
};

/// Error code sent with a failed `getblocktemplate`.
pub const NO_TEMPLATE_CODE: i32 = i32::MIN;
pub const NO_TEMPLATE_MESSAGE: &str = "No valid templates found.";
pub const NO_VIABLE_BACKEND_MESSAGE: &str = "No viable node connection found.";
pub const BLOCK_DECODE_FAILED: &str = "Block decode failed";
pub const BLOCK_REJECTED: &str = "rejected";

/// HTTP status and JSON body of a routed reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcReply {
    pub status: u16,
    pub body: Bytes,
}

impl RpcReply {
    fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self { status, body: Bytes::from(body) },
            Err(e) => {
                warn!(error = %e, "failed to serialize reply");
                Self { status: 500, body: Bytes::from_static(b"{\"id\":null,\"error\":\"Internal error\",\"result\":null}") }
            }
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl From<HttpResponse> for RpcReply {
    fn from(response: HttpResponse) -> Self {
        Self { status: response.status, body: response.body }
    }
}

/// Reply envelope in the node dialect: `error` is a plain string or null.
#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    id: &'a serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<i32>,
    error: Option<&'a str>,
    result: Option<T>,
}

impl<'a, T: Serialize> Envelope<'a, T> {
    fn result(id: &'a serde_json::Value, result: Option<T>) -> Self {
        Self { id, code: None, error: None, result }
    }

    fn error(id: &'a serde_json::Value, code: Option<i32>, message: &'a str) -> Self {
        Self { id, code, error: Some(message), result: None }
    }
}

#[derive(Serialize)]
struct PublishEndpoint {
    #[serde(rename = "type")]
    kind: &'static str,
    address: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    BlockTemplate,
    SubmitBlock,
    ZmqNotifications,
    Forward,
}

impl Route {
    fn of(method: &str) -> Self {
        match method.to_ascii_lowercase().as_str() {
            methods::GET_BLOCK_TEMPLATE | methods::GET_BLOCK_TEMPLATE_LIGHT => Self::BlockTemplate,
            methods::SUBMIT_BLOCK => Self::SubmitBlock,
            methods::GET_ZMQ_NOTIFICATIONS => Self::ZmqNotifications,
            _ => Self::Forward,
        }
    }
}

/// Dispatches JSON-RPC requests from mining software.
///
/// Template requests are answered from the [`TemplateCache`], block
/// submissions are broadcast to every backend, notification discovery is
/// answered locally, and everything else is forwarded to the best backend
/// with failover to the next best on any unsuccessful reply.
///
/// Every path produces a well-formed reply; backend failures never escape as
/// errors.
pub struct ProxyEngine {
    selector: Arc<NodeSelector>,
    cache: Arc<TemplateCache>,
    publish_ports: BTreeMap<NotificationType, u16>,
}

impl ProxyEngine {
    #[must_use]
    pub fn new(
        selector: Arc<NodeSelector>,
        cache: Arc<TemplateCache>,
        publish_ports: BTreeMap<NotificationType, u16>,
    ) -> Self {
        Self { selector, cache, publish_ports }
    }

    #[must_use]
    pub fn selector(&self) -> &Arc<NodeSelector> {
        &self.selector
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<TemplateCache> {
        &self.cache
    }

    /// Reply for a request whose time budget ran out before any backend
    /// produced a usable answer. Carries the request's id when it parses.
    #[must_use]
    pub fn deadline_reply(body: &[u8]) -> RpcReply {
        let id = serde_json::from_slice::<JsonRpcRequest>(body)
            .map(|request| request.id)
            .unwrap_or_else(|_| Arc::new(serde_json::Value::Null));
        RpcReply::json(500, &Envelope::<()>::error(&id, None, NO_VIABLE_BACKEND_MESSAGE))
    }

    /// Routes one raw request body.
    pub async fn handle(&self, body: Bytes) -> RpcReply {
        let request: JsonRpcRequest = match serde_json::from_slice(&body) {
            Ok(request) => request,
            Err(e) => {
                let error = ProxyError::from(e);
                debug!(error = %error, "unparseable request");
                return Self::client_error(&error, &serde_json::Value::Null);
            }
        };

        debug!(method = %request.method, "routing");
        match Route::of(&request.method) {
            Route::BlockTemplate => self.block_template(&request).await,
            Route::SubmitBlock => self.submit_block(&request).await,
            Route::ZmqNotifications => self.zmq_notifications(&request),
            Route::Forward => self.forward(&request, body).await,
        }
    }

    fn client_error(error: &ProxyError, id: &serde_json::Value) -> RpcReply {
        let response = JsonRpcResponse::error(error.rpc_code(), error.to_string(), Arc::new(id.clone()));
        RpcReply::json(400, &response)
    }

    async fn block_template(&self, request: &JsonRpcRequest) -> RpcReply {
        let started = Instant::now();
        match self.cache.get_template().await {
            Ok(template) => {
                info!(
                    height = template.height,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "block template acquired"
                );
                RpcReply::json(200, &Envelope::result(&request.id, Some(&*template)))
            }
            Err(e) => {
                let error = ProxyError::from(e);
                warn!(error = %error, "no block template available");
                RpcReply::json(
                    500,
                    &Envelope::<()>::error(&request.id, Some(NO_TEMPLATE_CODE), NO_TEMPLATE_MESSAGE),
                )
            }
        }
    }

    async fn submit_block(&self, request: &JsonRpcRequest) -> RpcReply {
        let outcome = match Self::decode_submission(request) {
            Ok((block, block_hex)) => {
                if self.broadcast_block(&block, block_hex).await {
                    None
                } else {
                    Some(BLOCK_REJECTED)
                }
            }
            Err(e) => {
                debug!(error = %e, "submitted block failed to decode");
                Some(BLOCK_DECODE_FAILED)
            }
        };

        debug!(result = ?outcome, "submitblock result");
        RpcReply::json(200, &Envelope::result(&request.id, outcome))
    }

    fn decode_submission(request: &JsonRpcRequest) -> Result<(Block, &str), ProxyError> {
        let block_hex = request
            .param(0)
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| ProxyError::InvalidRequest("missing block data".to_string()))?;
        let block = Block::from_hex(block_hex)?;
        Ok((block, block_hex))
    }

    /// Submits to every backend at once. Returns whether any accepted.
    async fn broadcast_block(&self, block: &Block, block_hex: &str) -> bool {
        let hash = block.hash();
        let outcomes = join_all(self.selector.backends().iter().map(|backend| async move {
            match backend.submit_block(block_hex).await {
                Ok(true) => {
                    info!(backend = %backend.name(), block = %hash, "block accepted");
                    true
                }
                Ok(false) => {
                    info!(backend = %backend.name(), block = %hash, "block rejected");
                    false
                }
                Err(e) => {
                    warn!(backend = %backend.name(), block = %hash, error = %e, "block submission failed");
                    false
                }
            }
        }))
        .await;

        let accepted = outcomes.iter().filter(|accepted| **accepted).count();
        info!(
            block = %hash,
            accepted,
            rejected = outcomes.len() - accepted,
            "block submission finished"
        );
        accepted > 0
    }

    fn zmq_notifications(&self, request: &JsonRpcRequest) -> RpcReply {
        let endpoints: Vec<PublishEndpoint> = self
            .publish_ports
            .iter()
            .map(|(kind, port)| PublishEndpoint {
                kind: kind.publisher_name(),
                address: format!("tcp://0.0.0.0:{port}"),
            })
            .collect();

        // the node reports this list as a JSON string, not an array
        let listing = serde_json::to_string(&endpoints).unwrap_or_else(|_| "[]".to_string());
        RpcReply::json(200, &Envelope::result(&request.id, Some(listing)))
    }

    /// Tries backends best-first until one answers successfully.
    ///
    /// The first unsuccessful reply is kept and returned if every backend
    /// fails; transport failures leave nothing to return.
    async fn forward(&self, request: &JsonRpcRequest, body: Bytes) -> RpcReply {
        let method = request.method.as_str();
        let mut attempted = HashSet::new();
        let mut fallback: Option<HttpResponse> = None;

        while let Some(backend) = self.selector.select_best(&attempted, None) {
            attempted.insert(backend.key());
            debug!(method, backend = %backend.name(), "forwarding request");

            let started = Instant::now();
            let response = backend.handle_request(body.clone()).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match response {
                Ok(response) if backend.connector().is_successful_response(&response) => {
                    debug!(method, backend = %backend.name(), elapsed_ms, "response received");
                    return response.into();
                }
                Ok(response) => {
                    debug!(
                        method,
                        backend = %backend.name(),
                        status = response.status,
                        elapsed_ms,
                        "non-ok response, trying next node"
                    );
                    fallback.get_or_insert(response);
                }
                Err(e) => {
                    debug!(method, backend = %backend.name(), error = %e, elapsed_ms, "request failed, trying next node");
                }
            }
        }

        match fallback {
            Some(response) => response.into(),
            None => {
                warn!(method, attempted = attempted.len(), "no viable node connection");
                RpcReply::json(500, &Envelope::<()>::error(&request.id, None, NO_VIABLE_BACKEND_MESSAGE))
            }
        }
    }
}
