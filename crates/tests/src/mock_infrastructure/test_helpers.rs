//! Fixtures shared by the integration tests.

use balancer_core::{
    block::BlockTemplate,
    config::{AppConfig, NodeConfig},
    proxy::ProxyEngine,
    runtime::{BalancerRuntime, BalancerRuntimeBuilder},
};
use bytes::Bytes;
use serde_json::{json, Value};

/// A minimal BIP22 template at `height` whose `longpollid` is `tag`.
#[must_use]
pub fn template_json(tag: &str, height: u64) -> Value {
    json!({
        "capabilities": ["proposal"],
        "version": 536870912,
        "rules": ["segwit"],
        "previousblockhash": format!("{:064x}", height - 1),
        "transactions": [],
        "coinbaseaux": {},
        "coinbasevalue": 312500000,
        "longpollid": tag,
        "target": "7fffff0000000000000000000000000000000000000000000000000000000000",
        "mintime": 1_700_000_000u64,
        "mutable": ["time", "transactions", "prevblock"],
        "noncerange": "00000000ffffffff",
        "curtime": 1_700_000_600u64,
        "bits": "207fffff",
        "height": height
    })
}

/// Hex of a complete block assembled from [`template_json`].
#[must_use]
pub fn block_hex(height: u64) -> String {
    let template: BlockTemplate = serde_json::from_value(template_json("submit", height)).expect("static template");
    template.proposal_hex().expect("template assembles")
}

/// Config with `nodes` in preference order and template caching off, so
/// every `getblocktemplate` runs consensus on demand.
#[must_use]
pub fn uncached_config(nodes: Vec<NodeConfig>) -> AppConfig {
    let mut config = AppConfig { nodes, ..AppConfig::default() };
    config.template_cache.refresh_interval_ms = 0;
    config
}

/// Runtime without long-lived network tasks; heights are queried once.
pub async fn quiet_runtime(config: AppConfig) -> BalancerRuntime {
    quiet_builder(config).build().await.expect("runtime builds")
}

#[must_use]
pub fn quiet_builder(config: AppConfig) -> BalancerRuntimeBuilder {
    BalancerRuntime::builder()
        .with_config(config)
        .disable_chain_monitor()
        .disable_subscriptions()
        .disable_publishers()
}

/// Sends `request` through the engine and returns status and parsed body.
pub async fn rpc_call(engine: &ProxyEngine, request: Value) -> (u16, Value) {
    let reply = engine.handle(Bytes::from(request.to_string())).await;
    let body = serde_json::from_slice(&reply.body).expect("reply is JSON");
    (reply.status, body)
}
