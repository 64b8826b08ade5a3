use thiserror::Error;

use crate::block::{BlockDecodeError, TemplateError};

/// Errors that can occur when talking to a backend node.
///
/// Transport failures (timeouts, refused connections) and protocol failures
/// (HTTP error status, JSON-RPC `error` member) are distinct variants but are
/// treated alike for routing: either one excludes the node for the current
/// request and the router moves on to the next best node.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum UpstreamError {
    /// Request exceeded the node's configured timeout.
    #[error("Request timeout")]
    Timeout,

    /// Failed to establish a connection to the node.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Non-2xx HTTP status without a JSON-RPC error body.
    ///
    /// First field is the HTTP status code, second is the (truncated) body.
    #[error("HTTP error: {0}")]
    HttpError(u16, String),

    /// JSON-RPC error returned by the node.
    ///
    /// First field is the RPC error code, second is the error message.
    #[error("RPC error {0}: {1}")]
    RpcError(i32, String),

    /// Network-level error from the underlying HTTP client.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Response could not be parsed or was missing expected members.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// A header or block returned by the node failed to decode.
    #[error("Decode error: {0}")]
    Decode(#[from] BlockDecodeError),

    /// A template could not be turned into a proposal block.
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    /// Maximum concurrent outbound requests reached.
    #[error("Concurrency limit reached: {0}")]
    ConcurrencyLimit(String),

    /// Every configured node was excluded or unreachable.
    #[error("No viable node connection found")]
    NoViableBackend,

    /// No template gathered a single approving vote.
    #[error("Consensus failure: {0}")]
    ConsensusFailure(String),
}

impl UpstreamError {
    /// Returns `true` if the node never produced a response.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::ConnectionFailed(_) | Self::Network(_) | Self::ConcurrencyLimit(_)
        )
    }

    /// Returns a static string representation for log fields.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ConnectionFailed(_) => "connection_failed",
            Self::HttpError(..) => "http_error",
            Self::RpcError(..) => "rpc_error",
            Self::Network(_) => "network",
            Self::InvalidResponse(_) => "invalid_response",
            Self::Decode(_) => "decode",
            Self::Template(_) => "template",
            Self::ConcurrencyLimit(_) => "concurrency_limit",
            Self::NoViableBackend => "no_viable_backend",
            Self::ConsensusFailure(_) => "consensus_failure",
        }
    }
}
