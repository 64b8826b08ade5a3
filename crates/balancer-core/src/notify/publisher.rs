use bytes::Bytes;
use std::{collections::BTreeMap, io, net::SocketAddr};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::broadcast,
    task::JoinHandle,
};
use tracing::{debug, info, trace, warn};

use super::zmtp::{self, Incoming, SocketType, ZmtpError};
use crate::types::{Notification, NotificationType};

/// Relayed notifications buffered per subscriber before it starts lagging.
const SUBSCRIBER_BUFFER: usize = 1024;

/// Destination for deduplicated notifications.
pub trait NotificationSink: Send + Sync {
    fn publish(&self, notification: &Notification);
}

/// ZMTP PUB listener for one notification type.
///
/// Every accepted subscriber gets its own task; relayed payloads reach those
/// tasks through a broadcast channel and go out as `[topic, payload]`.
pub struct ZmqPublisher {
    kind: NotificationType,
    listener: TcpListener,
    sender: broadcast::Sender<Bytes>,
}

impl ZmqPublisher {
    pub async fn bind(host: &str, port: u16, kind: NotificationType) -> io::Result<Self> {
        let listener = TcpListener::bind((host, port)).await?;
        let (sender, _) = broadcast::channel(SUBSCRIBER_BUFFER);
        info!(kind = %kind, address = %listener.local_addr()?, "notification publisher listening");
        Ok(Self { kind, listener, sender })
    }

    #[must_use]
    pub fn kind(&self) -> NotificationType {
        self.kind
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    #[must_use]
    pub fn sender(&self) -> broadcast::Sender<Bytes> {
        self.sender.clone()
    }

    #[must_use]
    pub fn start_with_shutdown(self, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = self.listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            debug!(kind = %self.kind, %peer, "subscriber connected");
                            let payloads = self.sender.subscribe();
                            let shutdown = shutdown_rx.resubscribe();
                            let kind = self.kind;
                            tokio::spawn(async move {
                                if let Err(e) = serve_subscriber(stream, kind, payloads, shutdown).await {
                                    debug!(kind = %kind, %peer, error = %e, "subscriber disconnected");
                                }
                            });
                        }
                        Err(e) => warn!(kind = %self.kind, error = %e, "failed to accept subscriber"),
                    },
                    _ = shutdown_rx.recv() => {
                        info!(kind = %self.kind, "notification publisher shutting down");
                        break;
                    }
                }
            }
        })
    }
}

fn apply_subscription(prefixes: &mut Vec<Bytes>, prefix: Bytes, subscribe: bool) {
    if subscribe {
        prefixes.push(prefix);
    } else if let Some(index) = prefixes.iter().position(|existing| *existing == prefix) {
        prefixes.remove(index);
    }
}

async fn serve_subscriber(
    stream: TcpStream,
    kind: NotificationType,
    mut payloads: broadcast::Receiver<Bytes>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), ZmtpError> {
    let mut framed = zmtp::handshake(stream, SocketType::Pub, true).await?;
    let topic = Bytes::from_static(kind.topic().as_bytes());
    let mut prefixes: Vec<Bytes> = Vec::new();

    loop {
        tokio::select! {
            incoming = zmtp::read_next(&mut framed) => match incoming? {
                Some(Incoming::Message(parts)) => {
                    let Some(body) = parts.first() else { continue };
                    match body.first() {
                        Some(0x01) => apply_subscription(&mut prefixes, body.slice(1..), true),
                        Some(0x00) => apply_subscription(&mut prefixes, body.slice(1..), false),
                        _ => trace!(kind = %kind, "ignoring message from subscriber"),
                    }
                }
                Some(Incoming::Command(frame)) => match frame.command_name() {
                    Some(b"SUBSCRIBE") => {
                        apply_subscription(&mut prefixes, Bytes::copy_from_slice(frame.command_data()), true);
                    }
                    Some(b"CANCEL") => {
                        apply_subscription(&mut prefixes, Bytes::copy_from_slice(frame.command_data()), false);
                    }
                    _ => trace!(kind = %kind, "ignoring command from subscriber"),
                },
                None => return Ok(()),
            },
            payload = payloads.recv() => match payload {
                Ok(payload) => {
                    if prefixes.iter().any(|prefix| topic.starts_with(prefix)) {
                        zmtp::write_message(&mut framed, &[topic.clone(), payload]).await?;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(kind = %kind, skipped, "slow subscriber missed notifications");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            },
            _ = shutdown_rx.recv() => return Ok(()),
        }
    }
}

/// Routes relayed notifications to the publisher of their type.
#[derive(Debug, Clone, Default)]
pub struct PublishHub {
    senders: BTreeMap<NotificationType, broadcast::Sender<Bytes>>,
}

impl PublishHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: NotificationType, sender: broadcast::Sender<Bytes>) {
        self.senders.insert(kind, sender);
    }

    #[must_use]
    pub fn kinds(&self) -> Vec<NotificationType> {
        self.senders.keys().copied().collect()
    }
}

impl NotificationSink for PublishHub {
    fn publish(&self, notification: &Notification) {
        let Some(sender) = self.senders.get(&notification.kind) else {
            trace!(kind = %notification.kind, "no publisher configured for notification type");
            return;
        };
        // an error only means nobody is subscribed right now
        let receivers = sender.send(notification.payload.clone()).unwrap_or(0);
        trace!(kind = %notification.kind, receivers, "published notification");
    }
}
