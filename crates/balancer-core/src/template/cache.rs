use arc_swap::ArcSwapOption;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{broadcast, Mutex, Notify},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use super::{consensus::TemplateConsensus, placeholder::placeholder_template};
use crate::{
    block::{asert::AsertParams, BlockHeader, BlockTemplate},
    chain::ChainHeight,
    upstream::UpstreamError,
};

/// Single-slot template cache kept warm by a timer task and a worker task.
///
/// The timer raises the refresh signal every `refresh_interval`; new-block
/// handling raises it out of band. The signal holds at most one pending
/// permit, so bursts of triggers while the worker is busy collapse into a
/// single follow-up refresh.
///
/// The slot is swapped wholesale. Readers see either the previous template
/// or the next one, never a partial update. Every new tip bumps a generation
/// counter, and a fetch that started under an older generation is discarded
/// instead of overwriting the newer placeholder.
pub struct TemplateCache {
    consensus: TemplateConsensus,
    difficulty: AsertParams,
    refresh_interval: Duration,
    current: ArcSwapOption<BlockTemplate>,
    generation: parking_lot::Mutex<u64>,
    refresh_signal: Notify,
    cold_fetch: Mutex<()>,
}

impl TemplateCache {
    /// A zero `refresh_interval` disables caching: every call runs consensus.
    #[must_use]
    pub fn new(consensus: TemplateConsensus, refresh_interval: Duration, difficulty: AsertParams) -> Self {
        Self {
            consensus,
            difficulty,
            refresh_interval,
            current: ArcSwapOption::empty(),
            generation: parking_lot::Mutex::new(0),
            refresh_signal: Notify::new(),
            cold_fetch: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.refresh_interval.is_zero()
    }

    #[must_use]
    pub fn consensus(&self) -> &TemplateConsensus {
        &self.consensus
    }

    /// The cached template, if any.
    #[must_use]
    pub fn current(&self) -> Option<Arc<BlockTemplate>> {
        self.current.load_full()
    }

    /// Returns the cached template, or fetches one synchronously on a cold
    /// cache while also waking the worker.
    ///
    /// # Errors
    ///
    /// Propagates the consensus failure when nothing is cached and the
    /// synchronous fetch fails.
    pub async fn get_template(&self) -> Result<Arc<BlockTemplate>, UpstreamError> {
        if !self.is_enabled() {
            return self.consensus.get_template().await.map(Arc::new);
        }

        if let Some(template) = self.current.load_full() {
            return Ok(template);
        }

        self.request_refresh();

        let _guard = self.cold_fetch.lock().await;
        if let Some(template) = self.current.load_full() {
            return Ok(template);
        }

        debug!("template cache cold, fetching synchronously");
        let started = self.generation();
        let template = Arc::new(self.consensus.get_template().await?);
        if !self.install_if_current(started, Some(Arc::clone(&template))) {
            if let Some(newer) = self.current.load_full() {
                return Ok(newer);
            }
        }
        Ok(template)
    }

    /// Wakes the worker. Signals raised while a refresh is running collapse
    /// into one.
    pub fn request_refresh(&self) {
        self.refresh_signal.notify_one();
    }

    pub fn invalidate(&self) {
        self.replace_for_new_tip(None);
    }

    /// Runs consensus now and installs the outcome. A failure empties the slot
    /// so the next caller fetches synchronously. Either outcome is dropped if
    /// a new tip arrived while consensus was running.
    pub async fn refresh(&self) -> Result<(), UpstreamError> {
        let started = self.generation();
        match self.consensus.get_template().await {
            Ok(template) => {
                let (height, transactions) = (template.height, template.transaction_count());
                if self.install_if_current(started, Some(Arc::new(template))) {
                    debug!(height, transactions, "template cache refreshed");
                }
                Ok(())
            }
            Err(e) => {
                self.install_if_current(started, None);
                Err(e)
            }
        }
    }

    fn generation(&self) -> u64 {
        *self.generation.lock()
    }

    fn replace_for_new_tip(&self, template: Option<Arc<BlockTemplate>>) {
        let mut generation = self.generation.lock();
        *generation = generation.wrapping_add(1);
        self.current.store(template);
    }

    fn install_if_current(&self, started: u64, template: Option<Arc<BlockTemplate>>) -> bool {
        let generation = self.generation.lock();
        if *generation != started {
            debug!("discarding template fetched for a superseded tip");
            return false;
        }
        self.current.store(template);
        true
    }

    /// Reacts to a new best tip.
    ///
    /// With the tip's header an empty-block placeholder for the next height is
    /// installed immediately; without one the slot is emptied. Either way the
    /// worker is woken to build the real template.
    pub fn on_new_block(&self, header: Option<&BlockHeader>, tip: ChainHeight) {
        match header {
            Some(header) => {
                let now = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default();
                match placeholder_template(&self.difficulty, header, tip.height, now) {
                    Ok(template) => {
                        info!(height = template.height, prev = %template.previous_block_hash, "installed placeholder template");
                        self.replace_for_new_tip(Some(Arc::new(template)));
                    }
                    Err(e) => {
                        warn!(error = %e, "cannot build placeholder template, invalidating cache");
                        self.invalidate();
                    }
                }
            }
            None => {
                debug!(height = tip.height, "new block without header, invalidating cache");
                self.invalidate();
            }
        }

        self.request_refresh();
    }

    /// Starts the timer and worker tasks. Returns no handles when caching is
    /// disabled.
    #[must_use]
    pub fn start_with_shutdown(self: &Arc<Self>, shutdown_tx: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        if !self.is_enabled() {
            info!("template caching disabled");
            return Vec::new();
        }

        vec![self.spawn_timer(shutdown_tx.subscribe()), self.spawn_worker(shutdown_tx.subscribe())]
    }

    fn spawn_timer(self: &Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(cache.refresh_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => cache.request_refresh(),
                    _ = shutdown_rx.recv() => {
                        debug!("template refresh timer shutting down");
                        break;
                    }
                }
            }
        })
    }

    fn spawn_worker(self: &Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = shutdown_rx.recv() => break,
                    () = cache.refresh_signal.notified() => {
                        tokio::select! {
                            result = cache.refresh() => {
                                if let Err(e) = result {
                                    warn!(error = %e, "background template refresh failed");
                                }
                            }
                            _ = shutdown_rx.recv() => break,
                        }
                    }
                }
            }
            debug!("template cache worker shutting down");
        })
    }
}
