//! Integration tests for runtime construction and lifecycle.
//!
//! These cover the contracts the server binary relies on:
//! - builder validation rejects unusable configuration before any I/O
//! - startup queries every node once
//! - the chain monitor keeps unknown and lagging heights current
//! - shutdown reaches every receiver and finishes in bounded time

use crate::mock_infrastructure::{quiet_runtime, uncached_config, RpcMockBuilder};
use balancer_core::{
    chain::ChainHeight,
    config::AppConfig,
    runtime::{BalancerRuntime, RuntimeError, SHUTDOWN_GRACE_PERIOD},
    upstream::ConnectorKind,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tokio::time::{timeout, Duration};

#[tokio::test]
async fn test_builder_missing_config_returns_error() {
    let result = BalancerRuntime::builder().build().await;
    assert!(matches!(result, Err(RuntimeError::ConfigValidation(_))));
}

#[tokio::test]
async fn test_builder_no_nodes_returns_error() {
    let result = BalancerRuntime::builder().with_config(AppConfig::default()).build().await;
    assert!(matches!(result, Err(RuntimeError::NoNodes)));
}

#[tokio::test]
async fn test_builder_rejects_half_credentials() {
    let node = RpcMockBuilder::new().await;
    let mut entry = node.node_config("node", ConnectorKind::BitcoinCore);
    entry.rpc_password = None;

    let result = BalancerRuntime::builder().with_config(uncached_config(vec![entry])).build().await;

    match result {
        Err(RuntimeError::ConfigValidation(message)) => assert!(message.contains("node"), "{message}"),
        other => panic!("expected validation error, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_startup_queries_every_node() {
    let mut first = RpcMockBuilder::new().await;
    first.mock_blockchain_info(200);
    let mut second = RpcMockBuilder::new().await;
    second.mock_blockchain_info(198);

    let runtime = quiet_runtime(uncached_config(vec![
        first.node_config("first", ConnectorKind::BitcoinCore),
        second.node_config("second", ConnectorKind::BitcoinCore),
    ]))
    .await;

    let heights: Vec<u64> = runtime.selector().backends().iter().map(|b| b.chain_height().height).collect();
    assert_eq!(heights, vec![200, 198]);
    assert_eq!(runtime.selector().best().unwrap().name(), "first");
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_chain_monitor_fills_unknown_heights() {
    let mut node = RpcMockBuilder::new().await;
    node.mock_blockchain_info(321);

    let mut config = uncached_config(vec![node.node_config("node", ConnectorKind::BitcoinCore)]);
    config.health_check.interval_seconds = 1;
    let runtime = BalancerRuntime::builder()
        .with_config(config)
        .skip_initial_query()
        .disable_subscriptions()
        .disable_publishers()
        .build()
        .await
        .unwrap();
    assert_eq!(runtime.selector().best_chain_height(), ChainHeight::UNKNOWN);

    timeout(Duration::from_secs(5), async {
        while runtime.selector().best_chain_height().height != 321 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("monitor should query the unknown node");

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_signal_broadcast_to_all_receivers() {
    let mut node = RpcMockBuilder::new().await;
    node.mock_blockchain_info(1);
    let runtime = quiet_runtime(uncached_config(vec![node.node_config("node", ConnectorKind::BitcoinCore)])).await;

    let received = Arc::new(AtomicUsize::new(0));
    let tasks: Vec<_> = (0..3)
        .map(|_| {
            let mut rx = runtime.shutdown_receiver();
            let received = Arc::clone(&received);
            tokio::spawn(async move {
                if rx.recv().await.is_ok() {
                    received.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(50)).await;
    runtime.shutdown().await;

    for task in tasks {
        timeout(Duration::from_secs(2), task).await.expect("task should complete").expect("task should not panic");
    }
    assert_eq!(received.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_shutdown_with_all_tasks_is_bounded() {
    let mut node = RpcMockBuilder::new().await;
    node.mock_blockchain_info(1);
    let mut config = AppConfig { nodes: vec![node.node_config("node", ConnectorKind::BitcoinCore)], ..AppConfig::default() };
    config.publish.bind_host = "127.0.0.1".to_string();
    config.publish.ports.block = Some(tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap().port());

    let runtime = BalancerRuntime::builder().with_config(config).build().await.unwrap();
    // cache timer and worker, chain monitor, one publisher
    assert_eq!(runtime.task_count(), 4);

    timeout(SHUTDOWN_GRACE_PERIOD, runtime.shutdown()).await.expect("every task honours the shutdown signal");
}
