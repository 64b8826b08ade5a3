use axum::{
    body::Bytes,
    extract::{rejection::FormRejection, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, post, MethodRouter},
    Form, Router,
};
use balancer_core::{
    config::ServerConfig,
    notify::NotificationRelay,
    proxy::{ProxyEngine, RpcReply},
    runtime::BalancerComponents,
    types::{Notification, NotificationType},
};
use serde::Deserialize;
use std::{sync::Arc, time::Duration};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{compression::CompressionLayer, limit::RequestBodyLimitLayer, timeout::TimeoutLayer};
use tracing::{debug, warn};

use crate::middleware::{request_id, request_id_layers};

pub const PUBLISH_BLOCK_RAW: &str = "/api/v1/publish/block/raw";
pub const PUBLISH_BLOCK_HASH: &str = "/api/v1/publish/block/hash";
pub const PUBLISH_TRANSACTION_RAW: &str = "/api/v1/publish/transaction/raw";
pub const PUBLISH_TRANSACTION_HASH: &str = "/api/v1/publish/transaction/hash";

const HASH_PAYLOAD_LEN: usize = 32;

/// Handles shared by every route.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ProxyEngine>,
    pub relay: Arc<NotificationRelay>,
    /// Budget for one JSON-RPC request, failover included.
    pub request_timeout: Duration,
}

impl AppState {
    #[must_use]
    pub fn new(components: &BalancerComponents, server: &ServerConfig) -> Self {
        Self {
            engine: Arc::clone(components.proxy_engine()),
            relay: Arc::clone(components.relay()),
            request_timeout: Duration::from_secs(server.request_timeout_seconds),
        }
    }
}

/// Form fields a node posts to the webhook endpoints.
///
/// The payload is hex. Raw variants may send it as `data`.
#[derive(Debug, Default, Deserialize)]
pub struct WebhookForm {
    #[serde(default, rename = "nodeHost")]
    pub node_host: String,
    #[serde(default, rename = "nodeName")]
    pub node_name: String,
    #[serde(default, rename = "blockHash", alias = "data")]
    pub payload: String,
}

/// Builds the listener's router with its request limits.
pub fn create_app(components: &BalancerComponents, server: &ServerConfig) -> Router {
    let (set_request_id, propagate_request_id) = request_id_layers();

    // The RPC route enforces its own deadline so a timeout still yields a
    // JSON-RPC body. Webhook replies are plain text.
    let webhooks = Router::new()
        .route(PUBLISH_BLOCK_RAW, webhook(NotificationType::Block))
        .route(PUBLISH_BLOCK_HASH, webhook(NotificationType::BlockHash))
        .route(PUBLISH_TRANSACTION_RAW, webhook(NotificationType::Transaction))
        .route(PUBLISH_TRANSACTION_HASH, webhook(NotificationType::TransactionHash))
        .layer(TimeoutLayer::new(Duration::from_secs(server.request_timeout_seconds)));

    Router::new()
        .route("/", post(handle_rpc))
        .merge(webhooks)
        .with_state(AppState::new(components, server))
        .layer(ConcurrencyLimitLayer::new(server.max_concurrent_requests))
        .layer(RequestBodyLimitLayer::new(server.max_body_bytes))
        .layer(CompressionLayer::new())
        // propagate must sit inside set so the generated id reaches the response
        .layer(propagate_request_id)
        .layer(set_request_id)
}

/// Handles one JSON-RPC request from a miner.
pub async fn handle_rpc(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let id = request_id(&headers);
    debug!(request_id = id, bytes = body.len(), "rpc request");

    match tokio::time::timeout(state.request_timeout, state.engine.handle(body.clone())).await {
        Ok(reply) => rpc_response(reply),
        Err(_) => {
            warn!(request_id = id, timeout_secs = state.request_timeout.as_secs(), "rpc request timed out");
            rpc_response(ProxyEngine::deadline_reply(&body))
        }
    }
}

fn rpc_response(reply: RpcReply) -> Response {
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, [(header::CONTENT_TYPE, "application/json")], reply.body).into_response()
}

fn webhook(kind: NotificationType) -> MethodRouter<AppState> {
    any(move |method: Method, State(state): State<AppState>, form: Result<Form<WebhookForm>, FormRejection>| async move {
        handle_webhook(kind, &method, &state, form)
            .await
            .into_response()
    })
}

async fn handle_webhook(
    kind: NotificationType,
    method: &Method,
    state: &AppState,
    form: Result<Form<WebhookForm>, FormRejection>,
) -> (StatusCode, &'static str) {
    if method != Method::POST {
        return (StatusCode::BAD_REQUEST, "Invalid method. Required: POST");
    }

    let Form(form) = match form {
        Ok(form) => form,
        Err(e) => {
            debug!(%kind, error = %e, "webhook form rejected");
            return (StatusCode::BAD_REQUEST, "Invalid form body.");
        }
    };

    let Ok(payload) = hex::decode(form.payload.trim()) else {
        return (StatusCode::BAD_REQUEST, "Invalid payload encoding.");
    };
    if payload.is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing notification payload.");
    }
    if kind.is_hash() && payload.len() != HASH_PAYLOAD_LEN {
        return (StatusCode::BAD_REQUEST, "Invalid hash length.");
    }

    let Some(origin) = state.engine.selector().find(&form.node_host, &form.node_name) else {
        warn!(%kind, host = %form.node_host, name = %form.node_name, "webhook from unregistered node");
        return (StatusCode::INTERNAL_SERVER_ERROR, "Unregistered node connection.");
    };

    state.relay.on_webhook(&origin, Notification::new(kind, payload)).await;
    (StatusCode::OK, "OK")
}
