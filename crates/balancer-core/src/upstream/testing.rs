//! Scripted connector for unit tests.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::json;
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use crate::{
    block::{BlockHeader, BlockTemplate},
    chain::ChainHeight,
    types::{Hash32, NotificationType},
    upstream::{
        connector::{ConnectorKind, NodeConnector},
        http_client::HttpResponse,
        UpstreamError,
    },
};

type Verdict = Arc<dyn Fn(&BlockTemplate) -> Result<Option<bool>, UpstreamError> + Send + Sync>;

/// Builds a minimal template whose `longpollid` carries `tag`, so tests can
/// tell candidates apart.
pub(crate) fn template(tag: &str) -> BlockTemplate {
    let mut template: BlockTemplate = serde_json::from_value(json!({
        "version": 536870912,
        "previousblockhash": "0000000000000000000000000000000000000000000000000000000000000000",
        "coinbasevalue": 625000000,
        "target": "00000000ffff0000000000000000000000000000000000000000000000000000",
        "mintime": 1,
        "curtime": 2,
        "bits": "1d00ffff",
        "height": 1
    }))
    .expect("static template");
    template.long_poll_id = Some(tag.to_string());
    template
}

pub(crate) fn tag_of(template: &BlockTemplate) -> &str {
    template.long_poll_id.as_deref().unwrap_or_default()
}

#[derive(Default)]
pub(crate) struct Calls {
    pub fetch_template: AtomicUsize,
    pub validate: AtomicUsize,
    pub submit: AtomicUsize,
    pub chain_height: AtomicUsize,
    pub block_header: AtomicUsize,
    pub request: AtomicUsize,
}

impl Calls {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub(crate) struct MockConnector {
    host: String,
    port: u16,
    chain_height: Mutex<Option<ChainHeight>>,
    template: Mutex<Option<BlockTemplate>>,
    verdict: Mutex<Verdict>,
    submit: Mutex<Option<bool>>,
    header: Mutex<Option<BlockHeader>>,
    response: Mutex<Option<HttpResponse>>,
    notifications: HashSet<NotificationType>,
    fetch_delay: Mutex<Duration>,
    query_delay: Mutex<Duration>,
    pub calls: Calls,
}

impl MockConnector {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            port: 8332,
            chain_height: Mutex::new(None),
            template: Mutex::new(None),
            verdict: Mutex::new(Arc::new(|_| Ok(None))),
            submit: Mutex::new(None),
            header: Mutex::new(None),
            response: Mutex::new(None),
            notifications: HashSet::new(),
            fetch_delay: Mutex::new(Duration::ZERO),
            query_delay: Mutex::new(Duration::ZERO),
            calls: Calls::default(),
        }
    }

    pub fn into_dyn(self) -> Arc<dyn NodeConnector> {
        Arc::new(self)
    }

    pub fn with_chain_height(self, height: ChainHeight) -> Self {
        *self.chain_height.lock() = Some(height);
        self
    }

    pub fn with_template(self, template: BlockTemplate) -> Self {
        *self.template.lock() = Some(template);
        self
    }

    /// Approves or rejects by template tag; unknown tags get no opinion.
    pub fn with_verdict(
        self,
        verdict: impl Fn(&str) -> Option<bool> + Send + Sync + 'static,
    ) -> Self {
        *self.verdict.lock() = Arc::new(move |template| Ok(verdict(tag_of(template))));
        self
    }

    pub fn failing_validation(self) -> Self {
        *self.verdict.lock() = Arc::new(|_| Err(UpstreamError::Timeout));
        self
    }

    pub fn with_submit(self, accepted: bool) -> Self {
        *self.submit.lock() = Some(accepted);
        self
    }

    pub fn with_header(self, header: BlockHeader) -> Self {
        *self.header.lock() = Some(header);
        self
    }

    pub fn with_response(self, status: u16, body: &str) -> Self {
        *self.response.lock() = Some(HttpResponse { status, body: Bytes::from(body.to_string()) });
        self
    }

    pub fn with_notifications(mut self, kinds: &[NotificationType]) -> Self {
        self.notifications.extend(kinds.iter().copied());
        self
    }

    pub fn with_fetch_delay(self, delay: Duration) -> Self {
        *self.fetch_delay.lock() = delay;
        self
    }

    /// Delays chain height and header lookups.
    pub fn with_query_delay(self, delay: Duration) -> Self {
        *self.query_delay.lock() = delay;
        self
    }

    async fn query_pause(&self) {
        let delay = *self.query_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    pub fn set_chain_height(&self, height: ChainHeight) {
        *self.chain_height.lock() = Some(height);
    }

    pub fn set_template(&self, template: Option<BlockTemplate>) {
        *self.template.lock() = template;
    }
}

#[async_trait]
impl NodeConnector for MockConnector {
    fn host(&self) -> &str {
        &self.host
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn kind(&self) -> ConnectorKind {
        ConnectorKind::BitcoinCore
    }

    async fn fetch_template(&self, _timeout: Duration) -> Result<BlockTemplate, UpstreamError> {
        self.calls.fetch_template.fetch_add(1, Ordering::SeqCst);
        let delay = *self.fetch_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let template = self.template.lock().clone();
        template.ok_or(UpstreamError::Timeout)
    }

    async fn validate_template(
        &self,
        template: &BlockTemplate,
        _timeout: Duration,
    ) -> Result<Option<bool>, UpstreamError> {
        self.calls.validate.fetch_add(1, Ordering::SeqCst);
        let verdict = Arc::clone(&*self.verdict.lock());
        verdict(template)
    }

    async fn submit_block(&self, _block_hex: &str, _timeout: Duration) -> Result<bool, UpstreamError> {
        self.calls.submit.fetch_add(1, Ordering::SeqCst);
        let submit = *self.submit.lock();
        submit.ok_or(UpstreamError::Timeout)
    }

    async fn chain_height(&self, _timeout: Duration) -> Result<ChainHeight, UpstreamError> {
        self.calls.chain_height.fetch_add(1, Ordering::SeqCst);
        self.query_pause().await;
        let height = *self.chain_height.lock();
        height.ok_or_else(|| UpstreamError::ConnectionFailed("offline".to_string()))
    }

    async fn block_header(
        &self,
        _hash: &Hash32,
        _timeout: Duration,
    ) -> Result<BlockHeader, UpstreamError> {
        self.calls.block_header.fetch_add(1, Ordering::SeqCst);
        self.query_pause().await;
        let header = *self.header.lock();
        header.ok_or_else(|| UpstreamError::RpcError(-5, "Block not found".to_string()))
    }

    async fn handle_request(
        &self,
        _body: Bytes,
        _timeout: Duration,
    ) -> Result<HttpResponse, UpstreamError> {
        self.calls.request.fetch_add(1, Ordering::SeqCst);
        let response = self.response.lock().clone();
        response.ok_or(UpstreamError::Timeout)
    }

    fn supports_notification(&self, kind: NotificationType) -> bool {
        self.notifications.contains(&kind)
    }
}
