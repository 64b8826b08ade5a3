use std::sync::Arc;
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tracing::{debug, info, trace, warn};

use super::{dedup::DedupWindow, publisher::NotificationSink};
use crate::{
    block::BlockHeader,
    template::TemplateCache,
    types::{Hash32, Notification, NotificationType},
    upstream::{refresh_lagging, Backend, NodeSelector},
};

/// Turns backend events into chain-height updates, template refreshes and
/// deduplicated fan-out.
///
/// Relay is unconditional: whichever backend reports an event first gets it
/// published, regardless of whether that backend is currently the best.
pub struct NotificationRelay {
    selector: Arc<NodeSelector>,
    cache: Arc<TemplateCache>,
    dedup: DedupWindow,
    sink: Arc<dyn NotificationSink>,
}

impl NotificationRelay {
    #[must_use]
    pub fn new(
        selector: Arc<NodeSelector>,
        cache: Arc<TemplateCache>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self { selector, cache, dedup: DedupWindow::default(), sink }
    }

    /// Handles a notification received over `origin`'s subscription.
    ///
    /// The notification is published before any chain-height work so
    /// subscribers never wait on backend round trips.
    ///
    /// Backends that publish block hashes only trigger on `BlockHash`; the
    /// others trigger on raw `Block` and the header comes from its first 80
    /// bytes.
    pub async fn on_notification(&self, origin: &Backend, notification: Notification) {
        trace!(backend = %origin.name(), kind = %notification.kind, "notification received");
        self.relay(notification.clone());

        if Self::triggers_chain_update(origin, notification.kind) {
            let header = self.tip_header(origin, &notification).await;
            self.on_block(origin, header).await;
        }
    }

    /// Handles a notification posted to a webhook on `origin`'s behalf.
    pub async fn on_webhook(&self, origin: &Backend, notification: Notification) {
        debug!(backend = %origin.name(), kind = %notification.kind, "webhook notification received");
        self.relay(notification.clone());
        self.cache.request_refresh();

        if notification.kind.is_block() {
            let header = self.tip_header(origin, &notification).await;
            self.on_block(origin, header).await;
        }
    }

    /// Publishes `notification` unless it was seen recently. Returns whether
    /// it was published.
    pub fn relay(&self, notification: Notification) -> bool {
        if !self.dedup.insert_if_new(&notification) {
            trace!(kind = %notification.kind, "duplicate notification dropped");
            return false;
        }

        self.sink.publish(&notification);
        true
    }

    fn triggers_chain_update(origin: &Backend, kind: NotificationType) -> bool {
        if origin.supports_notification(NotificationType::BlockHash) {
            kind == NotificationType::BlockHash
        } else {
            origin.supports_notification(NotificationType::Block) && kind == NotificationType::Block
        }
    }

    /// Header of the block a notification announces, when it can be had.
    async fn tip_header(&self, origin: &Backend, notification: &Notification) -> Option<BlockHeader> {
        match notification.kind {
            NotificationType::Block => match BlockHeader::from_prefix(&notification.payload) {
                Ok(header) => Some(header),
                Err(e) => {
                    warn!(backend = %origin.name(), error = %e, "raw block notification has no valid header");
                    None
                }
            },
            NotificationType::BlockHash => {
                let hash = Hash32::from_display_slice(&notification.payload).ok()?;
                match origin.block_header(&hash).await {
                    Ok(header) => Some(header),
                    Err(e) => {
                        debug!(backend = %origin.name(), block = %hash, error = %e, "header lookup failed");
                        None
                    }
                }
            }
            _ => None,
        }
    }

    /// Re-queries `origin` and, if it now leads, installs a placeholder and
    /// refreshes every backend left behind.
    async fn on_block(&self, origin: &Backend, header: Option<BlockHeader>) {
        let previous_best = self.selector.best_chain_height();
        let reported = match origin.refresh_chain_height().await {
            Ok(reported) => reported,
            Err(e) => {
                debug!(backend = %origin.name(), error = %e, "chain height query after block notification failed");
                return;
            }
        };

        if !reported.is_better_than(&previous_best) {
            return;
        }

        info!(backend = %origin.name(), chain_height = %reported, "new best block");
        self.cache.on_new_block(header.as_ref(), reported);

        if refresh_lagging(&self.selector, reported).await > 0 {
            self.cache.request_refresh();
        }
    }

    /// Consumes `origin`'s subscription channel until shutdown.
    #[must_use]
    pub fn listen(
        self: &Arc<Self>,
        origin: Arc<Backend>,
        mut notifications: mpsc::Receiver<Notification>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let relay = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = notifications.recv() => match received {
                        Some(notification) => relay.on_notification(&origin, notification).await,
                        None => break,
                    },
                    _ = shutdown_rx.recv() => break,
                }
            }
            debug!(backend = %origin.name(), "notification listener stopped");
        })
    }
}
