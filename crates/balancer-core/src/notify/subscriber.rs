use futures::SinkExt;
use std::time::Duration;
use tokio::{
    net::TcpStream,
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use super::zmtp::{self, Incoming, SocketType, ZmtpError, ZmtpFrame};
use crate::types::{Notification, NotificationType};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// ZMTP SUB connection to one notification port of a backend node.
///
/// Reconnects with exponential backoff until shutdown. The backoff resets once
/// a handshake succeeds.
#[derive(Debug, Clone)]
pub struct NotificationSubscriber {
    host: String,
    port: u16,
    kind: NotificationType,
}

enum SessionEnd {
    /// The consumer went away; stop for good.
    SinkClosed,
    Disconnected,
}

impl NotificationSubscriber {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, kind: NotificationType) -> Self {
        Self { host: host.into(), port, kind }
    }

    #[must_use]
    pub fn spawn(
        self,
        sink: mpsc::Sender<Notification>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut backoff = INITIAL_BACKOFF;
            loop {
                tokio::select! {
                    result = self.run_session(&sink, &mut backoff) => match result {
                        Ok(SessionEnd::SinkClosed) => break,
                        Ok(SessionEnd::Disconnected) => {
                            info!(host = %self.host, port = self.port, kind = %self.kind, "notification stream closed");
                        }
                        Err(e) => {
                            warn!(host = %self.host, port = self.port, kind = %self.kind, error = %e, "notification subscription failed");
                        }
                    },
                    _ = shutdown_rx.recv() => break,
                }

                debug!(host = %self.host, kind = %self.kind, delay_secs = backoff.as_secs(), "reconnecting");
                tokio::select! {
                    () = tokio::time::sleep(backoff) => {}
                    _ = shutdown_rx.recv() => break,
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
            debug!(host = %self.host, kind = %self.kind, "notification subscriber stopped");
        })
    }

    async fn run_session(
        &self,
        sink: &mpsc::Sender<Notification>,
        backoff: &mut Duration,
    ) -> Result<SessionEnd, ZmtpError> {
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect((self.host.as_str(), self.port)))
            .await
            .map_err(|_| ZmtpError::Io(std::io::ErrorKind::TimedOut.into()))??;

        let mut framed = zmtp::handshake(stream, SocketType::Sub, false).await?;
        framed.send(ZmtpFrame::subscription(self.kind.topic().as_bytes(), true)).await?;
        *backoff = INITIAL_BACKOFF;
        info!(host = %self.host, port = self.port, kind = %self.kind, "subscribed to node notifications");

        while let Some(incoming) = zmtp::read_next(&mut framed).await? {
            let Incoming::Message(parts) = incoming else { continue };
            // [topic, body, sequence]; the sequence number is not used
            let (Some(topic), Some(body)) = (parts.first(), parts.get(1)) else { continue };
            if NotificationType::from_topic(topic) != Some(self.kind) {
                continue;
            }

            if sink.send(Notification::new(self.kind, body.clone())).await.is_err() {
                return Ok(SessionEnd::SinkClosed);
            }
        }

        Ok(SessionEnd::Disconnected)
    }
}
