//! RPC mock builder for Bitcoin-style node testing.
//!
//! Wraps mockito to answer the handful of JSON-RPC methods the balancer itself
//! issues, plus arbitrary forwarded methods.

use balancer_core::{
    config::{NodeConfig, NotificationPorts},
    upstream::ConnectorKind,
};
use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::{json, Value};

fn method_matcher(method: &str) -> Matcher {
    Matcher::Regex(format!(r#""method"\s*:\s*"{method}""#))
}

fn result_body(result: &Value) -> String {
    json!({ "result": result, "error": null, "id": 1 }).to_string()
}

/// A mockito server posing as one node's RPC interface.
pub struct RpcMockBuilder {
    server: ServerGuard,
    mocks: Vec<Mock>,
    expectations: Vec<Mock>,
}

impl RpcMockBuilder {
    pub async fn new() -> Self {
        Self { server: Server::new_async().await, mocks: Vec::new(), expectations: Vec::new() }
    }

    #[must_use]
    pub fn url(&self) -> String {
        self.server.url()
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.server
            .host_with_port()
            .rsplit(':')
            .next()
            .and_then(|port| port.parse().ok())
            .expect("mockito listens on a numeric port")
    }

    /// Node entry pointing at this server.
    #[must_use]
    pub fn node_config(&self, name: &str, connector: ConnectorKind) -> NodeConfig {
        NodeConfig {
            name: name.to_string(),
            host: "127.0.0.1".to_string(),
            port: self.port(),
            secure: false,
            rpc_username: Some("miner".to_string()),
            rpc_password: Some("secret".to_string()),
            connector,
            max_timeout_ms: Some(2_000),
            notification_ports: NotificationPorts::default(),
        }
    }

    /// Answers `method` with `result`.
    pub fn mock_method(&mut self, method: &str, result: &Value) -> &mut Self {
        let mock = self
            .server
            .mock("POST", "/")
            .match_body(method_matcher(method))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(result_body(result))
            .create();

        self.mocks.push(mock);
        self
    }

    /// Answers `method` with `result` and expects exactly `hits` calls,
    /// checked by [`Self::verify`].
    pub fn expect_method(&mut self, method: &str, result: &Value, hits: usize) -> &mut Self {
        let mock = self
            .server
            .mock("POST", "/")
            .match_body(method_matcher(method))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(result_body(result))
            .expect(hits)
            .create();

        self.expectations.push(mock);
        self
    }

    pub fn mock_blockchain_info(&mut self, blocks: u64) -> &mut Self {
        self.mock_method(
            "getblockchaininfo",
            &json!({
                "chain": "regtest",
                "blocks": blocks,
                "headers": blocks,
                "bestblockhash": format!("{blocks:064x}"),
            }),
        )
    }

    /// Answers template requests (the `capabilities` form) with `template`.
    pub fn mock_block_template(&mut self, template: &Value) -> &mut Self {
        let mock = self
            .server
            .mock("POST", "/")
            .match_body(Matcher::AllOf(vec![
                method_matcher("getblocktemplate"),
                Matcher::Regex(r#""capabilities""#.to_string()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(result_body(template))
            .create();

        self.mocks.push(mock);
        self
    }

    /// Answers proposal-mode `getblocktemplate` with `verdict` (`null` accepts)
    /// and expects `hits` proposals.
    pub fn expect_proposals(&mut self, verdict: &Value, hits: usize) -> &mut Self {
        let mock = self
            .server
            .mock("POST", "/")
            .match_body(Matcher::AllOf(vec![
                method_matcher("getblocktemplate"),
                Matcher::Regex(r#""mode"\s*:\s*"proposal""#.to_string()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(result_body(verdict))
            .expect(hits)
            .create();

        self.expectations.push(mock);
        self
    }

    /// Answers with an RPC error the way Core does: HTTP 500 and a JSON body.
    pub fn mock_rpc_error(&mut self, method: &str, code: i32, message: &str) -> &mut Self {
        let mock = self
            .server
            .mock("POST", "/")
            .match_body(method_matcher(method))
            .with_status(500)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "result": null,
                    "error": { "code": code, "message": message },
                    "id": 1
                })
                .to_string(),
            )
            .create();

        self.mocks.push(mock);
        self
    }

    pub fn mock_server_error(&mut self) -> &mut Self {
        let mock = self.server.mock("POST", "/").with_status(500).with_body("Internal Server Error").create();

        self.mocks.push(mock);
        self
    }

    /// Asserts the hit counts registered through the `expect_*` helpers.
    pub async fn verify(&self) {
        for mock in &self.expectations {
            mock.assert_async().await;
        }
    }

    /// Returns true if every plain mock was hit at least once.
    #[must_use]
    pub fn verify_all_called(&self) -> bool {
        self.mocks.iter().all(Mock::matched)
    }

    pub fn get_server(&mut self) -> &mut ServerGuard {
        &mut self.server
    }
}
