//! Notification intake, deduplication and re-publication.
//!
//! Backends push events over ZMQ subscriptions ([`NotificationSubscriber`]) or
//! webhooks; the [`NotificationRelay`] updates chain heights on new blocks and
//! forwards each distinct event once to the proxy's own ZMQ publishers
//! ([`ZmqPublisher`]). The wire protocol is a minimal ZMTP 3.0 in [`zmtp`].

pub mod dedup;
pub mod publisher;
pub mod relay;
pub mod subscriber;
pub mod zmtp;

pub use dedup::{DedupWindow, DEDUP_WINDOW_CAPACITY};
pub use publisher::{NotificationSink, PublishHub, ZmqPublisher};
pub use relay::NotificationRelay;
pub use subscriber::NotificationSubscriber;
pub use zmtp::ZmtpError;
