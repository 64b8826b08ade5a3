use std::{collections::HashSet, sync::Arc};

use crate::{chain::ChainHeight, types::NotificationType};

use super::endpoint::{Backend, BackendKey};

/// Registry of configured backends and the best-node selection rule.
///
/// Holds no cached leader: every call re-reads each backend's chain height, so
/// an update made by the chain monitor or a notification is visible to the
/// very next selection.
#[derive(Debug)]
pub struct NodeSelector {
    backends: Vec<Arc<Backend>>,
    max_orphan_depth: u64,
}

impl NodeSelector {
    /// Backends are kept in ascending rank order.
    #[must_use]
    pub fn new(mut backends: Vec<Arc<Backend>>, max_orphan_depth: u64) -> Self {
        backends.sort_by_key(|backend| backend.rank());
        Self { backends, max_orphan_depth }
    }

    #[must_use]
    pub fn backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    #[must_use]
    pub fn max_orphan_depth(&self) -> u64 {
        self.max_orphan_depth
    }

    /// Best eligible backend, or `None` when nothing survives filtering.
    ///
    /// A candidate displaces the running best when its chain height is better
    /// under the orphan-tolerant comparison, or equal with a rank no worse.
    #[must_use]
    pub fn select_best(
        &self,
        excluded: &HashSet<BackendKey>,
        required: Option<NotificationType>,
    ) -> Option<Arc<Backend>> {
        let mut best: Option<(&Arc<Backend>, ChainHeight)> = None;

        for backend in &self.backends {
            if let Some(kind) = required {
                if !backend.supports_notification(kind) {
                    continue;
                }
            }
            if !excluded.is_empty() && excluded.contains(&backend.key()) {
                continue;
            }

            let height = backend.chain_height();
            let replace = match &best {
                None => true,
                Some((current, current_height)) => {
                    height.is_better_than_by(current_height, self.max_orphan_depth) ||
                        (height == *current_height && backend.rank() <= current.rank())
                }
            };
            if replace {
                best = Some((backend, height));
            }
        }

        best.map(|(backend, _)| Arc::clone(backend))
    }

    /// Shorthand for an unfiltered [`Self::select_best`].
    #[must_use]
    pub fn best(&self) -> Option<Arc<Backend>> {
        self.select_best(&HashSet::new(), None)
    }

    /// Highest chain height across all backends, with no orphan tolerance.
    #[must_use]
    pub fn best_chain_height(&self) -> ChainHeight {
        self.backends.iter().map(|backend| backend.chain_height()).max().unwrap_or(ChainHeight::UNKNOWN)
    }

    /// Looks a backend up by host when `host` is non-empty, else by name.
    #[must_use]
    pub fn find(&self, host: &str, name: &str) -> Option<Arc<Backend>> {
        let host = host.trim();
        let name = name.trim();
        self.backends
            .iter()
            .find(|backend| {
                if host.is_empty() {
                    !name.is_empty() && backend.name() == name
                } else {
                    backend.host() == host
                }
            })
            .cloned()
    }
}
