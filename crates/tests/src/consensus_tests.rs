//! Integration tests for template consensus through `getblocktemplate`.
//!
//! Caching is disabled in most tests so each call runs one consensus round
//! and mock hit counts stay exact.

use crate::mock_infrastructure::{quiet_runtime, rpc_call, template_json, uncached_config, RpcMockBuilder};
use balancer_core::upstream::ConnectorKind;
use serde_json::{json, Value};
use std::time::Duration;

const GBT: &str = r#"{"id": 1, "method": "getblocktemplate", "params": [{"rules": ["segwit"]}]}"#;

async fn get_template(engine: &balancer_core::proxy::ProxyEngine) -> (u16, Value) {
    rpc_call(engine, serde_json::from_str(GBT).unwrap()).await
}

#[tokio::test]
async fn test_template_from_preferred_node_when_peers_agree() {
    let mut preferred = RpcMockBuilder::new().await;
    preferred.mock_blockchain_info(100).mock_block_template(&template_json("preferred", 101));
    let mut peer = RpcMockBuilder::new().await;
    peer.mock_blockchain_info(100)
        .mock_block_template(&template_json("peer", 101))
        .expect_proposals(&Value::Null, 1);

    let runtime = quiet_runtime(uncached_config(vec![
        preferred.node_config("preferred", ConnectorKind::BitcoinCore),
        peer.node_config("peer", ConnectorKind::BitcoinCore),
    ]))
    .await;

    let (status, body) = get_template(runtime.proxy_engine()).await;

    assert_eq!(status, 200);
    assert_eq!(body["result"]["longpollid"], "preferred");
    assert_eq!(body["result"]["height"], 101);
    peer.verify().await;
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_vetoed_template_falls_back_to_quorum() {
    let mut preferred = RpcMockBuilder::new().await;
    preferred
        .mock_blockchain_info(100)
        .mock_block_template(&template_json("preferred", 101))
        // approves the peer's candidate during the quorum round
        .expect_proposals(&Value::Null, 1);
    let mut peer = RpcMockBuilder::new().await;
    peer.mock_blockchain_info(100)
        .mock_block_template(&template_json("peer", 101))
        // vetoes the preferred candidate, once on the fast path and once in the quorum
        .expect_proposals(&json!("bad-txnmrklroot"), 2);

    let runtime = quiet_runtime(uncached_config(vec![
        preferred.node_config("preferred", ConnectorKind::BitcoinCore),
        peer.node_config("peer", ConnectorKind::BitcoinCore),
    ]))
    .await;

    let (status, body) = get_template(runtime.proxy_engine()).await;

    assert_eq!(status, 200);
    assert_eq!(body["result"]["longpollid"], "peer");
    preferred.verify().await;
    peer.verify().await;
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_non_validating_peer_does_not_veto() {
    let mut preferred = RpcMockBuilder::new().await;
    preferred.mock_blockchain_info(100).mock_block_template(&template_json("preferred", 101));
    let mut peer = RpcMockBuilder::new().await;
    peer.mock_blockchain_info(100).expect_proposals(&json!("rejected"), 0);

    let runtime = quiet_runtime(uncached_config(vec![
        preferred.node_config("preferred", ConnectorKind::BitcoinCore),
        peer.node_config("peer", ConnectorKind::NoValidate),
    ]))
    .await;

    let (status, body) = get_template(runtime.proxy_engine()).await;

    assert_eq!(status, 200);
    assert_eq!(body["result"]["longpollid"], "preferred");
    peer.verify().await;
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_lagging_peer_is_not_asked_to_validate() {
    let mut preferred = RpcMockBuilder::new().await;
    preferred.mock_blockchain_info(100).mock_block_template(&template_json("preferred", 101));
    let mut lagging = RpcMockBuilder::new().await;
    lagging.mock_blockchain_info(98).expect_proposals(&json!("bad-prevblk"), 0);

    let runtime = quiet_runtime(uncached_config(vec![
        preferred.node_config("preferred", ConnectorKind::BitcoinCore),
        lagging.node_config("lagging", ConnectorKind::BitcoinCore),
    ]))
    .await;

    let (status, body) = get_template(runtime.proxy_engine()).await;

    assert_eq!(status, 200);
    assert_eq!(body["result"]["longpollid"], "preferred");
    lagging.verify().await;
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_no_template_reply_shape() {
    let mut node = RpcMockBuilder::new().await;
    node.mock_blockchain_info(100).mock_rpc_error("getblocktemplate", -10, "Bitcoin Core is in initial sync");

    let runtime = quiet_runtime(uncached_config(vec![node.node_config("node", ConnectorKind::BitcoinCore)])).await;

    let (status, body) = get_template(runtime.proxy_engine()).await;

    assert_eq!(status, 500);
    assert_eq!(
        body,
        json!({"id": 1, "code": -2147483648i64, "error": "No valid templates found.", "result": null})
    );
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_light_template_served_from_same_source() {
    let mut node = RpcMockBuilder::new().await;
    node.mock_blockchain_info(100).mock_block_template(&template_json("only", 101));

    let runtime = quiet_runtime(uncached_config(vec![node.node_config("node", ConnectorKind::BitcoinCore)])).await;

    let (status, body) =
        rpc_call(runtime.proxy_engine(), json!({"id": 5, "method": "getblocktemplatelight", "params": []})).await;

    assert_eq!(status, 200);
    assert_eq!(body["id"], 5);
    assert_eq!(body["result"]["longpollid"], "only");
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_cached_template_reused_between_calls() {
    let mut node = RpcMockBuilder::new().await;
    node.mock_blockchain_info(100).mock_block_template(&template_json("cached", 101));

    let mut config = uncached_config(vec![node.node_config("node", ConnectorKind::BitcoinCore)]);
    config.template_cache.refresh_interval_ms = 60_000;
    let runtime = quiet_runtime(config).await;

    // the worker refreshes once at startup
    let cache = runtime.template_cache();
    tokio::time::timeout(Duration::from_secs(5), async {
        while cache.current().is_none() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("cache warmed");
    let warmed = cache.current().unwrap();

    let (status, body) = get_template(runtime.proxy_engine()).await;

    assert_eq!(status, 200);
    assert_eq!(body["result"]["longpollid"], "cached");
    assert!(std::sync::Arc::ptr_eq(&warmed, &cache.current().unwrap()), "served from the slot");
    runtime.shutdown().await;
}
