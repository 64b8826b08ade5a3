//! Integration tests for best-node routing and failover of forwarded methods.
//!
//! Every node is a mockito server driven through a real `BitcoinRpcConnector`,
//! so these cover the full path from request bytes to the node's HTTP reply.

use crate::mock_infrastructure::{quiet_builder, quiet_runtime, rpc_call, uncached_config, RpcMockBuilder};
use balancer_core::{
    config::{NodeConfig, NotificationPorts},
    upstream::ConnectorKind,
};
use serde_json::{json, Value};
use tower::ServiceExt;

fn offline_node(name: &str) -> NodeConfig {
    NodeConfig {
        name: name.to_string(),
        host: "127.0.0.1".to_string(),
        port: 1,
        secure: false,
        rpc_username: None,
        rpc_password: None,
        connector: ConnectorKind::BitcoinCore,
        max_timeout_ms: Some(500),
        notification_ports: NotificationPorts::default(),
    }
}

/// A node that accepts connections and never answers.
async fn silent_node(name: &str) -> NodeConfig {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    NodeConfig { port, max_timeout_ms: Some(400), ..offline_node(name) }
}

#[tokio::test]
async fn test_routes_to_node_with_best_chain() {
    let mut behind = RpcMockBuilder::new().await;
    behind.mock_blockchain_info(100).expect_method("getblockcount", &json!(100), 0);
    let mut ahead = RpcMockBuilder::new().await;
    ahead.mock_blockchain_info(105).expect_method("getblockcount", &json!(105), 1);

    let runtime = quiet_runtime(uncached_config(vec![
        behind.node_config("behind", ConnectorKind::BitcoinCore),
        ahead.node_config("ahead", ConnectorKind::BitcoinCore),
    ]))
    .await;

    let (status, body) = rpc_call(runtime.proxy_engine(), json!({"id": 1, "method": "getblockcount", "params": []})).await;

    assert_eq!(status, 200);
    assert_eq!(body["result"], 105);
    behind.verify().await;
    ahead.verify().await;
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_equal_chains_prefer_config_order() {
    let mut first = RpcMockBuilder::new().await;
    first.mock_blockchain_info(100).expect_method("getbestblockhash", &json!("aa"), 1);
    let mut second = RpcMockBuilder::new().await;
    second.mock_blockchain_info(100).expect_method("getbestblockhash", &json!("bb"), 0);

    let runtime = quiet_runtime(uncached_config(vec![
        first.node_config("first", ConnectorKind::BitcoinCore),
        second.node_config("second", ConnectorKind::BitcoinCore),
    ]))
    .await;

    let (_, body) = rpc_call(runtime.proxy_engine(), json!({"id": 1, "method": "getbestblockhash"})).await;

    assert_eq!(body["result"], "aa");
    first.verify().await;
    second.verify().await;
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_rpc_error_fails_over_to_next_node() {
    let mut failing = RpcMockBuilder::new().await;
    failing.mock_blockchain_info(100).mock_rpc_error("getrawmempool", -28, "Loading block index...");
    let mut healthy = RpcMockBuilder::new().await;
    healthy.mock_blockchain_info(100).expect_method("getrawmempool", &json!(["ab"]), 1);

    let runtime = quiet_runtime(uncached_config(vec![
        failing.node_config("failing", ConnectorKind::BitcoinCore),
        healthy.node_config("healthy", ConnectorKind::BitcoinCore),
    ]))
    .await;

    let (status, body) = rpc_call(runtime.proxy_engine(), json!({"id": 9, "method": "getrawmempool"})).await;

    assert_eq!(status, 200);
    assert_eq!(body["result"], json!(["ab"]));
    assert!(failing.verify_all_called());
    healthy.verify().await;
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_unreachable_node_is_skipped() {
    let mut healthy = RpcMockBuilder::new().await;
    healthy.expect_method("getnetworkinfo", &json!({"version": 270000}), 1);

    // heights stay unknown, so the unreachable node is tried first
    let runtime = quiet_builder(uncached_config(vec![
        offline_node("offline"),
        healthy.node_config("healthy", ConnectorKind::BitcoinCore),
    ]))
    .skip_initial_query()
    .build()
    .await
    .unwrap();

    let (status, body) = rpc_call(runtime.proxy_engine(), json!({"id": 2, "method": "getnetworkinfo"})).await;

    assert_eq!(status, 200);
    assert_eq!(body["result"]["version"], 270000);
    healthy.verify().await;
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_all_failing_returns_first_error_response() {
    let mut first = RpcMockBuilder::new().await;
    first.mock_blockchain_info(100).mock_rpc_error("getrawtransaction", -5, "No such mempool transaction");
    let mut second = RpcMockBuilder::new().await;
    second.mock_blockchain_info(100).mock_rpc_error("getrawtransaction", -5, "second node");

    let runtime = quiet_runtime(uncached_config(vec![
        first.node_config("first", ConnectorKind::BitcoinCore),
        second.node_config("second", ConnectorKind::BitcoinCore),
    ]))
    .await;

    let (status, body) =
        rpc_call(runtime.proxy_engine(), json!({"id": 4, "method": "getrawtransaction", "params": ["00"]})).await;

    assert_eq!(status, 500);
    assert_eq!(body["error"]["code"], -5);
    assert_eq!(body["error"]["message"], "No such mempool transaction");
    assert!(second.verify_all_called(), "second node is still tried");
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_no_viable_node_reply() {
    let runtime = quiet_builder(uncached_config(vec![offline_node("a"), offline_node("b")]))
        .skip_initial_query()
        .build()
        .await
        .unwrap();

    let (status, body) = rpc_call(runtime.proxy_engine(), json!({"id": "x", "method": "getmininginfo"})).await;

    assert_eq!(status, 500);
    assert_eq!(body, json!({"id": "x", "error": "No viable node connection found.", "result": null}));
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_zmq_notifications_answered_locally() {
    let mut node = RpcMockBuilder::new().await;
    node.mock_blockchain_info(100).expect_method("getzmqnotifications", &json!([]), 0);

    let mut config = uncached_config(vec![node.node_config("node", ConnectorKind::BitcoinCore)]);
    config.publish.ports.block_hash = Some(28332);
    let runtime = quiet_runtime(config).await;

    let (status, body) = rpc_call(runtime.proxy_engine(), json!({"id": 1, "method": "GetZmqNotifications"})).await;

    assert_eq!(status, 200);
    let listing: serde_json::Value = serde_json::from_str(body["result"].as_str().unwrap()).unwrap();
    assert_eq!(listing, json!([{"type": "pubhashblock", "address": "tcp://0.0.0.0:28332"}]));
    node.verify().await;
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_every_node_timing_out_over_http() {
    let runtime = quiet_builder(uncached_config(vec![
        silent_node("first").await,
        silent_node("second").await,
        silent_node("third").await,
    ]))
    .skip_initial_query()
    .build()
    .await
    .unwrap();
    let app = server::router::create_app(runtime.components(), &runtime.config().server);

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/")
        .header(axum::http::header::CONTENT_TYPE, "application/json")
        .body(axum::body::Body::from(r#"{"id":6,"method":"getmininginfo","params":[]}"#))
        .unwrap();
    let started = std::time::Instant::now();
    let response = app.oneshot(request).await.unwrap();

    // each node used its full budget before the next was tried
    assert!(started.elapsed() >= std::time::Duration::from_millis(1200));
    assert_eq!(response.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body, json!({"id": 6, "error": "No viable node connection found.", "result": null}));
    runtime.shutdown().await;
}
