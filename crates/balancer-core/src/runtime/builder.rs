//! Builder for initializing the balancer runtime from configuration.

use std::sync::Arc;
use thiserror::Error;
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tracing::{debug, info};

use super::{lifecycle::BalancerRuntime, BalancerComponents};
use crate::{
    config::AppConfig,
    notify::{NotificationRelay, PublishHub, ZmqPublisher},
    proxy::ProxyEngine,
    template::{TemplateCache, TemplateConsensus},
    types::NotificationType,
    upstream::{
        query_all, Backend, BitcoinRpcConnector, ChainHeightMonitor, HttpClient, HttpClientConfig,
        NodeSelector, UpstreamError,
    },
};

/// Notifications buffered per backend before its subscribers wait on the relay.
const NOTIFICATION_BUFFER: usize = 256;

/// Errors that can occur during runtime initialization.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RuntimeError {
    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    #[error("No nodes configured")]
    NoNodes,

    #[error("Failed to create HTTP client: {0}")]
    HttpClient(#[from] UpstreamError),

    #[error("Failed to bind {kind} publisher on port {port}: {source}")]
    PublisherBind {
        kind: NotificationType,
        port: u16,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Clone)]
struct RuntimeOptions {
    enable_chain_monitor: bool,
    enable_subscriptions: bool,
    enable_publishers: bool,
    query_on_start: bool,
    shutdown_channel_capacity: usize,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            enable_chain_monitor: true,
            enable_subscriptions: true,
            enable_publishers: true,
            query_on_start: true,
            shutdown_channel_capacity: 16,
        }
    }
}

/// Builder for constructing a [`BalancerRuntime`].
///
/// # Examples
///
/// ```no_run
/// # use balancer_core::{config::AppConfig, runtime::BalancerRuntimeBuilder};
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = AppConfig::load()?;
///
/// let runtime = BalancerRuntimeBuilder::new().with_config(config).build().await?;
/// let engine = runtime.proxy_engine();
/// # Ok(())
/// # }
/// ```
pub struct BalancerRuntimeBuilder {
    config: Option<AppConfig>,
    options: RuntimeOptions,
}

impl Default for BalancerRuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BalancerRuntimeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self { config: None, options: RuntimeOptions::default() }
    }

    #[must_use]
    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Skips the periodic chain-height monitor.
    #[must_use]
    pub fn disable_chain_monitor(mut self) -> Self {
        self.options.enable_chain_monitor = false;
        self
    }

    /// Skips ZMQ subscriptions to backend nodes.
    #[must_use]
    pub fn disable_subscriptions(mut self) -> Self {
        self.options.enable_subscriptions = false;
        self
    }

    /// Skips binding the outbound publish ports.
    #[must_use]
    pub fn disable_publishers(mut self) -> Self {
        self.options.enable_publishers = false;
        self
    }

    /// Skips querying every backend's chain height before returning.
    #[must_use]
    pub fn skip_initial_query(mut self) -> Self {
        self.options.query_on_start = false;
        self
    }

    #[must_use]
    pub fn with_shutdown_channel_capacity(mut self, capacity: usize) -> Self {
        self.options.shutdown_channel_capacity = capacity;
        self
    }

    /// Builds the components, queries every backend once and starts the
    /// background tasks.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError` if configuration is missing or invalid, the HTTP
    /// client cannot be built, or a publish port cannot be bound.
    pub async fn build(self) -> Result<BalancerRuntime, RuntimeError> {
        let config = self
            .config
            .ok_or_else(|| RuntimeError::ConfigValidation("No configuration provided".to_string()))?;

        if config.nodes.is_empty() {
            return Err(RuntimeError::NoNodes);
        }
        config.validate().map_err(RuntimeError::ConfigValidation)?;

        info!(
            nodes = config.nodes.len(),
            template_refresh_ms = config.template_cache.refresh_interval_ms,
            max_orphan_depth = config.selection.max_orphan_depth,
            "Initializing balancer runtime"
        );

        let (shutdown_tx, _) = broadcast::channel::<()>(self.options.shutdown_channel_capacity);
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        let client = Arc::new(HttpClient::with_config(HttpClientConfig {
            concurrent_limit: config.server.max_concurrent_requests.saturating_mul(config.nodes.len()),
            ..HttpClientConfig::default()
        })?);

        let backends = config
            .nodes
            .iter()
            .enumerate()
            .map(|(rank, node)| {
                let connector = BitcoinRpcConnector::new(node.endpoint(), node.connector, Arc::clone(&client))
                    .with_notification_ports(node.notification_ports.to_map());
                debug!(backend = %node.name, rank, connector = node.connector.as_str(), "backend registered");
                Arc::new(Backend::new(node.name.clone(), rank, node.max_timeout(), Arc::new(connector)))
            })
            .collect();
        let selector = Arc::new(NodeSelector::new(backends, config.selection.max_orphan_depth));

        if self.options.query_on_start {
            query_all(&selector).await;
            info!(best = %selector.best_chain_height(), "initial chain heights queried");
        }

        let cache = Arc::new(TemplateCache::new(
            TemplateConsensus::new(Arc::clone(&selector)),
            config.template_refresh_interval(),
            config.difficulty,
        ));
        tasks.extend(cache.start_with_shutdown(&shutdown_tx));
        debug!(enabled = cache.is_enabled(), "template cache started");

        let publish_ports = config.publish.ports.to_map();
        let mut hub = PublishHub::new();
        if self.options.enable_publishers {
            for (&kind, &port) in &publish_ports {
                let publisher = ZmqPublisher::bind(&config.publish.bind_host, port, kind)
                    .await
                    .map_err(|source| RuntimeError::PublisherBind { kind, port, source })?;
                hub.register(kind, publisher.sender());
                tasks.push(publisher.start_with_shutdown(shutdown_tx.subscribe()));
            }
        }

        let relay = Arc::new(NotificationRelay::new(Arc::clone(&selector), Arc::clone(&cache), Arc::new(hub)));

        if self.options.enable_subscriptions {
            for backend in selector.backends() {
                let (sink, notifications) = mpsc::channel(NOTIFICATION_BUFFER);
                let subscriptions = backend.connector().subscribe(sink, &shutdown_tx);
                if subscriptions.is_empty() {
                    continue;
                }
                debug!(backend = %backend.name(), channels = subscriptions.len(), "subscribed to node notifications");
                tasks.extend(subscriptions);
                tasks.push(relay.listen(Arc::clone(backend), notifications, shutdown_tx.subscribe()));
            }
        }

        if self.options.enable_chain_monitor {
            let refresh_target = Arc::clone(&cache);
            let monitor = ChainHeightMonitor::new(Arc::clone(&selector), config.health_check_interval())
                .with_on_advance(move || refresh_target.request_refresh());
            tasks.push(monitor.start_with_shutdown(shutdown_tx.subscribe()));
            debug!(interval_secs = config.health_check.interval_seconds, "chain monitor started");
        }

        let proxy_engine = Arc::new(ProxyEngine::new(Arc::clone(&selector), Arc::clone(&cache), publish_ports));
        let components = BalancerComponents::new(selector, cache, relay, proxy_engine);

        info!(background_tasks = tasks.len(), "Balancer runtime initialized");
        Ok(BalancerRuntime::new(components, shutdown_tx, config, tasks))
    }
}
