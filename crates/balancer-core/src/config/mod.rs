//! Application configuration with layered loading.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: `set_default` calls and serde defaults
//! 2. **Config file**: TOML file named by the first CLI argument, else the
//!    `BALANCER_CONFIG` env var, else `config/config.toml`
//! 3. **Environment variables**: `BALANCER__*` env vars override specific fields
//!
//! # Configuration Sections
//!
//! - [`ServerConfig`]: HTTP listener (bind address, concurrency, body limit)
//! - [`NodeConfig`]: backend nodes, in preference order
//! - [`PublishConfig`]: ports the proxy publishes notifications on
//! - [`TemplateCacheConfig`]: background template refresh interval
//! - [`SelectionConfig`]: orphan-depth tolerance for best-node selection
//! - [`HealthCheckConfig`]: chain-height polling interval
//! - [`AsertParams`]: difficulty projection for placeholder templates
//! - [`LoggingConfig`]: log level and format
//!
//! # Example
//!
//! ```toml
//! [server]
//! bind_port = 8332
//!
//! [publish.ports]
//! block_hash = 28332
//!
//! [[nodes]]
//! name = "core-1"
//! host = "10.0.0.5"
//! port = 8332
//! rpc_username = "miner"
//! rpc_password = "secret"
//!
//! [nodes.notification_ports]
//! block_hash = 28332
//!
//! [[nodes]]
//! name = "bchd-1"
//! host = "10.0.0.6"
//! port = 8334
//! secure = true
//! connector = "BCHD"
//! max_timeout_ms = 5000
//! ```

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashSet},
    path::Path,
    time::Duration,
};

use crate::{
    block::asert::AsertParams,
    types::NotificationType,
    upstream::{ConnectorKind, RpcCredentials, RpcEndpoint, DEFAULT_BACKEND_TIMEOUT},
};

/// Config file used when neither a CLI argument nor `BALANCER_CONFIG` names one.
pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

/// Env var naming the config file.
pub const CONFIG_PATH_ENV: &str = "BALANCER_CONFIG";

/// HTTP server configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// IP address to bind the server to. Defaults to `0.0.0.0`.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port number to listen on. Must be greater than 0. Defaults to `8332`.
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,

    /// Maximum number of concurrent RPC requests. Defaults to `256`.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// Request timeout in seconds. Defaults to `60`.
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,

    /// Largest accepted request body. Defaults to 64 MiB, enough for a
    /// hex-encoded 32 MB block.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_bind_port() -> u16 {
    8332
}

fn default_max_concurrent_requests() -> usize {
    256
}

fn default_request_timeout_seconds() -> u64 {
    60
}

fn default_max_body_bytes() -> usize {
    64 * 1024 * 1024
}

/// Port per notification type. Absent or zero entries are not configured.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPorts {
    #[serde(default)]
    pub block: Option<u16>,
    #[serde(default)]
    pub block_hash: Option<u16>,
    #[serde(default)]
    pub transaction: Option<u16>,
    #[serde(default)]
    pub transaction_hash: Option<u16>,
}

impl NotificationPorts {
    #[must_use]
    pub fn get(&self, kind: NotificationType) -> Option<u16> {
        let port = match kind {
            NotificationType::Block => self.block,
            NotificationType::BlockHash => self.block_hash,
            NotificationType::Transaction => self.transaction,
            NotificationType::TransactionHash => self.transaction_hash,
        };
        port.filter(|port| *port > 0)
    }

    /// Configured ports keyed by type.
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<NotificationType, u16> {
        NotificationType::ALL.into_iter().filter_map(|kind| self.get(kind).map(|port| (kind, port))).collect()
    }
}

/// One backend node. Its position in the `nodes` list is its rank.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,

    pub host: String,

    pub port: u16,

    /// Use HTTPS for RPC. Defaults to `false`.
    #[serde(default)]
    pub secure: bool,

    #[serde(default)]
    pub rpc_username: Option<String>,

    #[serde(default)]
    pub rpc_password: Option<String>,

    /// Node software flavor. Defaults to `BITCOIN_CORE`.
    #[serde(default)]
    pub connector: ConnectorKind,

    /// Per-call timeout in milliseconds. Absent or zero uses the default.
    #[serde(default)]
    pub max_timeout_ms: Option<u64>,

    /// ZMQ ports the node publishes on.
    #[serde(default)]
    pub notification_ports: NotificationPorts,
}

impl NodeConfig {
    #[must_use]
    pub fn endpoint(&self) -> RpcEndpoint {
        let credentials = match (&self.rpc_username, &self.rpc_password) {
            (Some(username), Some(password)) => {
                Some(RpcCredentials { username: username.clone(), password: password.clone() })
            }
            _ => None,
        };
        RpcEndpoint { host: self.host.clone(), port: self.port, secure: self.secure, credentials }
    }

    #[must_use]
    pub fn max_timeout(&self) -> Option<Duration> {
        self.max_timeout_ms.filter(|ms| *ms > 0).map(Duration::from_millis)
    }
}

/// Outbound notification publishing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Interface the publish sockets bind to. Defaults to `0.0.0.0`.
    #[serde(default = "default_bind_address")]
    pub bind_host: String,

    #[serde(default)]
    pub ports: NotificationPorts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateCacheConfig {
    /// Background refresh interval in milliseconds. `0` disables caching.
    /// Defaults to `10000`.
    pub refresh_interval_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// Blocks a preferred node may trail the best chain and still be chosen,
    /// when chain work does not prove it behind. Defaults to `0`.
    #[serde(default)]
    pub max_orphan_depth: u64,
}

/// Chain-height polling of backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// Interval between checks in seconds. Must be greater than 0. Defaults to `15`.
    pub interval_seconds: u64,
}

/// Application logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "trace", "debug", "info", "warn", "error"). Defaults to `"info"`.
    pub level: String,

    /// Output format: `"json"` or `"pretty"`. Defaults to `"pretty"`.
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub nodes: Vec<NodeConfig>,

    #[serde(default)]
    pub publish: PublishConfig,

    #[serde(default)]
    pub template_cache: TemplateCacheConfig,

    #[serde(default)]
    pub selection: SelectionConfig,

    #[serde(default)]
    pub health_check: HealthCheckConfig,

    #[serde(default)]
    pub difficulty: AsertParams,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            bind_port: default_bind_port(),
            max_concurrent_requests: default_max_concurrent_requests(),
            request_timeout_seconds: default_request_timeout_seconds(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self { bind_host: default_bind_address(), ports: NotificationPorts::default() }
    }
}

impl Default for TemplateCacheConfig {
    fn default() -> Self {
        Self { refresh_interval_ms: 10_000 }
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self { interval_seconds: 15 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "pretty".to_string() }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            nodes: Vec::new(),
            publish: PublishConfig::default(),
            template_cache: TemplateCacheConfig::default(),
            selection: SelectionConfig::default(),
            health_check: HealthCheckConfig::default(),
            difficulty: AsertParams::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file with environment variable overrides.
    ///
    /// Environment variables with the `BALANCER__` prefix can override any configuration value.
    /// Use `__` as a separator for nested fields (e.g., `BALANCER__SERVER__BIND_PORT=8080`).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, parsed, or deserialized.
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let config_builder = Config::builder()
            .set_default("server.bind_address", default_bind_address())?
            .set_default("server.bind_port", i64::from(default_bind_port()))?
            .set_default("server.max_concurrent_requests", default_max_concurrent_requests() as i64)?
            .set_default("server.request_timeout_seconds", default_request_timeout_seconds())?
            .set_default("publish.bind_host", default_bind_address())?
            .set_default("template_cache.refresh_interval_ms", 10_000)?
            .set_default("selection.max_orphan_depth", 0)?
            .set_default("health_check.interval_seconds", 15)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name(&config_path.as_ref().to_string_lossy()).required(false))
            .add_source(Environment::with_prefix("BALANCER").separator("__"))
            .build()?;

        config_builder.try_deserialize()
    }

    /// Resolves the config path: `cli_arg`, else `BALANCER_CONFIG`, else
    /// [`DEFAULT_CONFIG_PATH`].
    #[must_use]
    pub fn resolve_path(cli_arg: Option<String>) -> String {
        cli_arg
            .filter(|path| !path.trim().is_empty())
            .or_else(|| std::env::var(CONFIG_PATH_ENV).ok())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
    }

    /// Loads configuration from the path named on the command line.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration cannot be loaded or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_file(Self::resolve_path(std::env::args().nth(1)))
    }

    /// Returns the parsed socket address for the HTTP server.
    ///
    /// # Errors
    ///
    /// Returns an error string if the address cannot be parsed into a valid [`SocketAddr`].
    ///
    /// [`SocketAddr`]: std::net::SocketAddr
    pub fn socket_addr(&self) -> Result<std::net::SocketAddr, String> {
        format!("{}:{}", self.server.bind_address, self.server.bind_port).parse().map_err(|_| {
            format!("Invalid socket address: {}:{}", self.server.bind_address, self.server.bind_port)
        })
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_seconds)
    }

    #[must_use]
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check.interval_seconds)
    }

    /// Zero means caching is disabled.
    #[must_use]
    pub fn template_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.template_cache.refresh_interval_ms)
    }

    /// Validates the configuration for correctness and consistency.
    ///
    /// Checks include:
    /// - At least one node is configured
    /// - Every node has a name, a host and a non-zero port
    /// - Publish ports are distinct
    /// - The request timeout is non-zero and covers every node's own timeout
    /// - Difficulty parameters decode
    /// - Logging format is either `"json"` or `"pretty"`
    ///
    /// # Errors
    ///
    /// Returns a descriptive error string if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("No nodes configured".to_string());
        }

        for (rank, node) in self.nodes.iter().enumerate() {
            if node.name.trim().is_empty() {
                return Err(format!("Node #{rank} has no name"));
            }
            if node.host.trim().is_empty() {
                return Err(format!("Empty host for node: {}", node.name));
            }
            if node.port == 0 {
                return Err(format!("Port must be greater than 0 for node: {}", node.name));
            }
            if node.rpc_username.is_some() != node.rpc_password.is_some() {
                return Err(format!(
                    "Node {} must set both rpc_username and rpc_password, or neither",
                    node.name
                ));
            }
        }

        let mut seen = HashSet::new();
        for (kind, port) in self.publish.ports.to_map() {
            if !seen.insert(port) {
                return Err(format!("Publish port {port} is used by more than one type ({kind})"));
            }
        }
        if seen.contains(&self.server.bind_port) {
            return Err(format!("Publish port {} collides with the RPC port", self.server.bind_port));
        }

        if self.health_check.interval_seconds == 0 {
            return Err("Health check interval must be greater than 0".to_string());
        }

        if self.server.request_timeout_seconds == 0 {
            return Err("Request timeout must be greater than 0".to_string());
        }
        let request_timeout = self.request_timeout();
        for node in &self.nodes {
            let node_timeout = node.max_timeout().unwrap_or(DEFAULT_BACKEND_TIMEOUT);
            if node_timeout > request_timeout {
                return Err(format!(
                    "Node {} timeout of {}ms exceeds the {}s request timeout",
                    node.name,
                    node_timeout.as_millis(),
                    self.server.request_timeout_seconds
                ));
            }
        }

        self.difficulty.validate()?;

        if self.server.max_concurrent_requests == 0 {
            return Err("Max concurrent requests must be greater than 0".to_string());
        }

        if self.server.bind_port == 0 {
            return Err("Bind port must be greater than 0".to_string());
        }

        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err("Logging format must be 'json' or 'pretty'".to_string());
        }

        Ok(())
    }
}
