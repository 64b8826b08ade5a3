//! Integration tests for notification intake (webhooks and node
//! subscriptions) and re-publication to downstream subscribers.

use crate::mock_infrastructure::{template_json, uncached_config, RpcMockBuilder};
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use balancer_core::{
    config::AppConfig,
    notify::{NotificationSubscriber, ZmqPublisher},
    runtime::BalancerRuntime,
    types::{Notification, NotificationType},
    upstream::ConnectorKind,
};
use bytes::Bytes;
use serde_json::json;
use std::time::Duration;
use tokio::{net::TcpListener, sync::mpsc};
use tower::ServiceExt;

const GENESIS_HEADER: &str = "0100000000000000000000000000000000000000000000000000000000000000000000003ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4a29ab5f49ffff001d1dac2b7c";
const BLOCK_HASH: &str = "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f";
const TX_A: &str = "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b";
const TX_B: &str = "0e3e2357e806b6cdb1f70b54c3a3a17b6714ee1f0e68bebb44a74b1efd512098";

async fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap().port()
}

fn webhook(path: &str, form: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form.to_string()))
        .unwrap()
}

fn app(runtime: &BalancerRuntime) -> Router {
    server::router::create_app(runtime.components(), &runtime.config().server)
}

/// Subscribes to `port` on the balancer and gives the connection time to
/// register its topic before anything is published.
async fn subscribe(runtime: &BalancerRuntime, port: u16, kind: NotificationType) -> mpsc::Receiver<Notification> {
    let (tx, rx) = mpsc::channel(16);
    let _subscriber = NotificationSubscriber::new("127.0.0.1", port, kind).spawn(tx, runtime.shutdown_receiver());
    tokio::time::sleep(Duration::from_millis(300)).await;
    rx
}

#[tokio::test]
async fn test_block_webhook_updates_chain_height() {
    let mut node = RpcMockBuilder::new().await;
    node.mock_blockchain_info(101)
        .mock_block_template(&template_json("real", 102))
        .expect_method("getblockheader", &json!(GENESIS_HEADER), 1);

    let mut config = uncached_config(vec![node.node_config("node", ConnectorKind::BitcoinCore)]);
    config.template_cache.refresh_interval_ms = 60_000;
    let runtime = BalancerRuntime::builder()
        .with_config(config)
        .skip_initial_query()
        .disable_chain_monitor()
        .disable_subscriptions()
        .disable_publishers()
        .build()
        .await
        .unwrap();
    assert!(runtime.selector().best_chain_height().is_unknown());

    let response = app(&runtime)
        .oneshot(webhook("/api/v1/publish/block/hash", &format!("nodeName=node&blockHash={BLOCK_HASH}")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(runtime.selector().best_chain_height().height, 101);
    node.verify().await;

    // placeholder or the refreshed template, both for the next height
    let template = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(template) = runtime.template_cache().current() {
                return template;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(template.height, 102);
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_webhooks_published_once() {
    let first = RpcMockBuilder::new().await;
    let second = RpcMockBuilder::new().await;
    let publish_port = free_port().await;

    let mut config: AppConfig = uncached_config(vec![
        first.node_config("first", ConnectorKind::BitcoinCore),
        second.node_config("second", ConnectorKind::BitcoinCore),
    ]);
    config.publish.bind_host = "127.0.0.1".to_string();
    config.publish.ports.transaction_hash = Some(publish_port);
    let runtime = BalancerRuntime::builder()
        .with_config(config)
        .skip_initial_query()
        .disable_chain_monitor()
        .disable_subscriptions()
        .build()
        .await
        .unwrap();

    let mut received = subscribe(&runtime, publish_port, NotificationType::TransactionHash).await;
    let app = app(&runtime);

    for form in [
        format!("nodeName=first&blockHash={TX_A}"),
        format!("nodeName=second&blockHash={TX_A}"),
        format!("nodeName=first&blockHash={TX_B}"),
    ] {
        let response = app.clone().oneshot(webhook("/api/v1/publish/transaction/hash", &form)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let one = tokio::time::timeout(Duration::from_secs(2), received.recv()).await.unwrap().unwrap();
    assert_eq!(one.payload, Bytes::from(hex::decode(TX_A).unwrap()));
    let two = tokio::time::timeout(Duration::from_secs(2), received.recv()).await.unwrap().unwrap();
    assert_eq!(two.payload, Bytes::from(hex::decode(TX_B).unwrap()));
    assert!(
        tokio::time::timeout(Duration::from_millis(200), received.recv()).await.is_err(),
        "the repeated hash is not published again"
    );
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_node_subscription_relayed_downstream() {
    let node_rpc = RpcMockBuilder::new().await;
    let node_publisher = ZmqPublisher::bind("127.0.0.1", 0, NotificationType::TransactionHash).await.unwrap();
    let node_port = node_publisher.local_addr().unwrap().port();
    let node_feed = node_publisher.sender();
    let (node_shutdown, _) = tokio::sync::broadcast::channel(1);
    let _node = node_publisher.start_with_shutdown(node_shutdown.subscribe());

    let mut node = node_rpc.node_config("node", ConnectorKind::BitcoinCore);
    node.notification_ports.transaction_hash = Some(node_port);
    let publish_port = free_port().await;
    let mut config = uncached_config(vec![node]);
    config.publish.bind_host = "127.0.0.1".to_string();
    config.publish.ports.transaction_hash = Some(publish_port);

    let runtime = BalancerRuntime::builder()
        .with_config(config)
        .skip_initial_query()
        .disable_chain_monitor()
        .build()
        .await
        .unwrap();

    let mut received = subscribe(&runtime, publish_port, NotificationType::TransactionHash).await;

    let payload = Bytes::from(hex::decode(TX_A).unwrap());
    node_feed.send(payload.clone()).unwrap();

    let relayed = tokio::time::timeout(Duration::from_secs(3), received.recv()).await.unwrap().unwrap();
    assert_eq!(relayed.kind, NotificationType::TransactionHash);
    assert_eq!(relayed.payload, payload);

    let _ = node_shutdown.send(());
    runtime.shutdown().await;
}
