//! Core component container for the balancer runtime.

use std::sync::Arc;

use crate::{notify::NotificationRelay, proxy::ProxyEngine, template::TemplateCache, upstream::NodeSelector};

/// Container for the shared components built at startup.
///
/// Everything is behind `Arc`; the container is cheap to clone into request
/// handlers.
#[derive(Clone)]
pub struct BalancerComponents {
    selector: Arc<NodeSelector>,
    cache: Arc<TemplateCache>,
    relay: Arc<NotificationRelay>,
    proxy_engine: Arc<ProxyEngine>,
}

impl BalancerComponents {
    #[must_use]
    pub fn new(
        selector: Arc<NodeSelector>,
        cache: Arc<TemplateCache>,
        relay: Arc<NotificationRelay>,
        proxy_engine: Arc<ProxyEngine>,
    ) -> Self {
        Self { selector, cache, relay, proxy_engine }
    }

    /// Backend registry in rank order.
    #[must_use]
    pub fn selector(&self) -> &Arc<NodeSelector> {
        &self.selector
    }

    #[must_use]
    pub fn template_cache(&self) -> &Arc<TemplateCache> {
        &self.cache
    }

    /// Entry point for webhook notifications.
    #[must_use]
    pub fn relay(&self) -> &Arc<NotificationRelay> {
        &self.relay
    }

    #[must_use]
    pub fn proxy_engine(&self) -> &Arc<ProxyEngine> {
        &self.proxy_engine
    }
}
