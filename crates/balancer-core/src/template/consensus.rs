use futures::future::join_all;
use std::{sync::Arc, time::Instant};
use tracing::{debug, info, warn};

use crate::{
    block::BlockTemplate,
    chain::ChainHeight,
    upstream::{Backend, NodeSelector, UpstreamError},
};

/// Fetch-and-vote engine producing templates other backends agree on.
///
/// The common case costs one fetch plus one validation per peer. Only when the
/// preferred backend fails or is vetoed does the engine pay for the full
/// quorum round: every backend fetches, every peer validates every candidate.
#[derive(Debug, Clone)]
pub struct TemplateConsensus {
    selector: Arc<NodeSelector>,
}

impl TemplateConsensus {
    #[must_use]
    pub fn new(selector: Arc<NodeSelector>) -> Self {
        Self { selector }
    }

    #[must_use]
    pub fn selector(&self) -> &Arc<NodeSelector> {
        &self.selector
    }

    /// Returns a template no eligible peer rejected, falling back to a full
    /// quorum vote when the preferred backend's template is unavailable or
    /// vetoed.
    ///
    /// # Errors
    ///
    /// [`UpstreamError::NoViableBackend`] when the registry is empty and
    /// [`UpstreamError::ConsensusFailure`] when no candidate gathered a vote.
    pub async fn get_template(&self) -> Result<BlockTemplate, UpstreamError> {
        let preferred = self.selector.best().ok_or(UpstreamError::NoViableBackend)?;

        let started = Instant::now();
        match preferred.fetch_template().await {
            Ok(template) => {
                debug!(
                    backend = %preferred.name(),
                    height = template.height,
                    elapsed_ms = started.elapsed().as_millis(),
                    "template fetched from preferred backend"
                );
                let rejections = self.count_rejections(&preferred, &template).await;
                if rejections == 0 {
                    info!(height = template.height, backend = %preferred.name(), "template accepted by all peers");
                    return Ok(template);
                }
                warn!(
                    height = template.height,
                    backend = %preferred.name(),
                    rejections,
                    "template rejected by peers, running quorum vote"
                );
            }
            Err(e) => {
                warn!(backend = %preferred.name(), error = %e, "preferred backend failed to produce a template");
            }
        }

        self.quorum_template().await
    }

    /// Peers of `origin` that are not behind `reference`.
    fn validators<'a>(
        &'a self,
        origin: &'a Backend,
        reference: &'a ChainHeight,
    ) -> impl Iterator<Item = &'a Arc<Backend>> {
        self.selector.backends().iter().filter(move |backend| {
            if std::ptr::eq(Arc::as_ptr(*backend), origin) {
                return false;
            }
            let height = backend.chain_height();
            if height.is_behind(reference) {
                debug!(backend = %backend.name(), chain_height = %height, "skipping validation, backend is behind");
                return false;
            }
            true
        })
    }

    /// Number of eligible peers that explicitly reject `template`.
    ///
    /// No opinion and failed validation calls are not vetoes.
    async fn count_rejections(&self, origin: &Backend, template: &BlockTemplate) -> usize {
        let reference = self.selector.best_chain_height();
        let verdicts = join_all(self.validators(origin, &reference).map(|validator| async move {
            match validator.validate_template(template).await {
                Ok(verdict) => verdict,
                Err(e) => {
                    debug!(backend = %validator.name(), error = %e, "template validation failed");
                    None
                }
            }
        }))
        .await;

        verdicts.into_iter().filter(|verdict| *verdict == Some(false)).count()
    }

    /// Number of eligible peers that approve `template`; no opinion counts as
    /// approval, a failed validation call does not.
    async fn count_approvals(
        &self,
        origin: &Backend,
        template: &BlockTemplate,
        reference: &ChainHeight,
    ) -> usize {
        let approvals = join_all(self.validators(origin, reference).map(|validator| async move {
            match validator.validate_template(template).await {
                Ok(verdict) => verdict.unwrap_or(true),
                Err(e) => {
                    debug!(backend = %validator.name(), error = %e, "template validation failed");
                    false
                }
            }
        }))
        .await;

        approvals.into_iter().filter(|approved| *approved).count()
    }

    /// Fetches a candidate from every backend and returns the one with the most
    /// approvals. Ties go to the candidate from the lowest-ranked backend.
    async fn quorum_template(&self) -> Result<BlockTemplate, UpstreamError> {
        let backends = self.selector.backends();
        let reference = self.selector.best_chain_height();

        let fetched = join_all(backends.iter().map(|backend| async move {
            let started = Instant::now();
            match backend.fetch_template().await {
                Ok(template) => {
                    info!(
                        backend = %backend.name(),
                        height = template.height,
                        elapsed_ms = started.elapsed().as_millis(),
                        "obtained candidate template"
                    );
                    Some((backend, template))
                }
                Err(e) => {
                    debug!(backend = %backend.name(), error = %e, "failed to obtain candidate template");
                    None
                }
            }
        }))
        .await;

        let candidates: Vec<_> = fetched.into_iter().flatten().collect();
        let tallies = join_all(
            candidates
                .iter()
                .map(|(origin, template)| self.count_approvals(origin, template, &reference)),
        )
        .await;

        let mut winner: Option<usize> = None;
        let mut best_count = 0;
        for (index, count) in tallies.into_iter().enumerate() {
            if count > best_count {
                winner = Some(index);
                best_count = count;
            }
        }

        let Some(index) = winner else {
            warn!(candidates = candidates.len(), "no valid templates found");
            return Err(UpstreamError::ConsensusFailure(format!(
                "no approving vote across {} candidates",
                candidates.len()
            )));
        };

        let (origin, template) = candidates
            .into_iter()
            .nth(index)
            .ok_or_else(|| UpstreamError::ConsensusFailure("winning candidate missing".to_string()))?;
        info!(backend = %origin.name(), approvals = best_count, height = template.height, "quorum selected template");
        Ok(template)
    }
}
