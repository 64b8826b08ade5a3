//! Runtime lifecycle management including background tasks and graceful shutdown.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, error, info, warn};

use super::{builder::BalancerRuntimeBuilder, BalancerComponents};
use crate::{
    config::AppConfig,
    notify::NotificationRelay,
    proxy::ProxyEngine,
    template::TemplateCache,
    upstream::NodeSelector,
};

/// How long `shutdown` waits for each background task.
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Owns the shared components and every long-lived task: the template cache
/// timer and worker, the chain monitor, node subscriptions and publishers.
///
/// `shutdown()` broadcasts on a single channel every task listens to, then
/// joins each one with a bounded wait.
pub struct BalancerRuntime {
    components: BalancerComponents,
    shutdown_tx: broadcast::Sender<()>,
    config: AppConfig,
    tasks: Vec<JoinHandle<()>>,
    shutdown_initiated: Arc<AtomicBool>,
}

impl BalancerRuntime {
    #[must_use]
    pub fn builder() -> BalancerRuntimeBuilder {
        BalancerRuntimeBuilder::new()
    }

    pub(super) fn new(
        components: BalancerComponents,
        shutdown_tx: broadcast::Sender<()>,
        config: AppConfig,
        tasks: Vec<JoinHandle<()>>,
    ) -> Self {
        Self { components, shutdown_tx, config, tasks, shutdown_initiated: Arc::new(AtomicBool::new(false)) }
    }

    #[must_use]
    pub fn components(&self) -> &BalancerComponents {
        &self.components
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    #[must_use]
    pub fn proxy_engine(&self) -> &Arc<ProxyEngine> {
        self.components.proxy_engine()
    }

    #[must_use]
    pub fn selector(&self) -> &Arc<NodeSelector> {
        self.components.selector()
    }

    #[must_use]
    pub fn template_cache(&self) -> &Arc<TemplateCache> {
        self.components.template_cache()
    }

    #[must_use]
    pub fn relay(&self) -> &Arc<NotificationRelay> {
        self.components.relay()
    }

    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Creates a new shutdown receiver for external shutdown coordination.
    #[must_use]
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Signals every background task and waits for each up to
    /// [`SHUTDOWN_GRACE_PERIOD`]. Tasks that overrun are aborted and logged.
    pub async fn shutdown(self) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Shutdown already initiated, ignoring duplicate call");
            return;
        }

        info!(tasks = self.tasks.len(), "Initiating balancer runtime shutdown");
        if let Err(e) = self.shutdown_tx.send(()) {
            warn!(error = %e, "Failed to send shutdown signal (no receivers)");
        }

        for (index, mut task) in self.tasks.into_iter().enumerate() {
            match tokio::time::timeout(SHUTDOWN_GRACE_PERIOD, &mut task).await {
                Ok(Ok(())) => debug!(task = index, "background task stopped"),
                Ok(Err(e)) if e.is_cancelled() => debug!(task = index, "background task cancelled"),
                Ok(Err(e)) => error!(task = index, error = %e, "background task failed"),
                Err(_) => {
                    warn!(
                        task = index,
                        grace_secs = SHUTDOWN_GRACE_PERIOD.as_secs(),
                        "background task did not stop in time, aborting"
                    );
                    task.abort();
                }
            }
        }

        info!("Balancer runtime shutdown complete");
    }
}

const _: () = {
    const fn assert_send<T: Send>() {}
    const fn assert_sync<T: Sync>() {}
    let _ = assert_send::<BalancerRuntime>;
    let _ = assert_sync::<BalancerRuntime>;
};
