use futures::future::join_all;
use std::{sync::Arc, time::Duration};
use tokio::{sync::broadcast, time::interval};
use tracing::{debug, info, warn};

use crate::chain::ChainHeight;

use super::{endpoint::Backend, selector::NodeSelector};

type AdvanceCallback = Arc<dyn Fn() + Send + Sync>;

/// Queries each backend in `targets` concurrently and stores improvements.
///
/// Returns how many backends advanced.
async fn refresh_backends(targets: Vec<&Arc<Backend>>) -> usize {
    let results = join_all(targets.into_iter().map(|backend| async move {
        let before = backend.chain_height();
        match backend.refresh_chain_height().await {
            Ok(_) => backend.chain_height() != before,
            Err(e) => {
                warn!(backend = %backend.name(), error = %e, "chain height query failed");
                false
            }
        }
    }))
    .await;

    results.into_iter().filter(|advanced| *advanced).count()
}

/// Queries every backend once. Used at startup before serving.
pub async fn query_all(selector: &NodeSelector) -> usize {
    refresh_backends(selector.backends().iter().collect()).await
}

/// Re-queries every backend whose recorded height is behind `reference` or
/// still unknown.
pub async fn refresh_lagging(selector: &NodeSelector, reference: ChainHeight) -> usize {
    let lagging: Vec<_> = selector
        .backends()
        .iter()
        .filter(|backend| {
            let height = backend.chain_height();
            height.is_unknown() || height.is_behind(&reference)
        })
        .collect();

    if lagging.is_empty() {
        return 0;
    }

    debug!(count = lagging.len(), reference = %reference, "refreshing lagging backends");
    refresh_backends(lagging).await
}

/// Periodically re-queries backends that trail the best known chain.
///
/// Notifications normally keep heights current; this loop covers nodes that
/// publish nothing and nodes that were offline when a block arrived.
pub struct ChainHeightMonitor {
    selector: Arc<NodeSelector>,
    check_interval: Duration,
    on_advance: Option<AdvanceCallback>,
}

impl ChainHeightMonitor {
    #[must_use]
    pub fn new(selector: Arc<NodeSelector>, check_interval: Duration) -> Self {
        Self { selector, check_interval, on_advance: None }
    }

    /// Called after a pass in which at least one backend advanced.
    #[must_use]
    pub fn with_on_advance(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_advance = Some(Arc::new(callback));
        self
    }

    /// Runs one pass and returns how many backends advanced.
    pub async fn check_once(&self) -> usize {
        Self::check_lagging(&self.selector, self.on_advance.as_ref()).await
    }

    async fn check_lagging(selector: &NodeSelector, on_advance: Option<&AdvanceCallback>) -> usize {
        let best = selector.best_chain_height();
        let advanced = refresh_lagging(selector, best).await;
        if advanced > 0 {
            info!(advanced, best = %selector.best_chain_height(), "chain monitor updated backends");
            if let Some(callback) = on_advance {
                callback();
            }
        }
        advanced
    }

    #[must_use]
    pub fn start_with_shutdown(
        &self,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        let selector = Arc::clone(&self.selector);
        let on_advance = self.on_advance.clone();
        let check_interval = self.check_interval;

        tokio::spawn(async move {
            let mut interval = interval(check_interval);
            // the first tick completes immediately; startup already queried everyone
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        Self::check_lagging(&selector, on_advance.as_ref()).await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("chain height monitor shutting down");
                        break;
                    }
                }
            }
        })
    }
}
