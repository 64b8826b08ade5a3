use crate::{block::BlockDecodeError, upstream::errors::UpstreamError};

/// Failures the router turns into a client-facing reply.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ProxyError {
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The submitted block did not decode; no backend was contacted.
    #[error("Block decode failed: {0}")]
    BlockDecode(#[from] BlockDecodeError),

    /// Preserves concrete `UpstreamError` type for the reply shape.
    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),
}

impl ProxyError {
    /// JSON-RPC error code reported for client-side failures.
    #[must_use]
    pub fn rpc_code(&self) -> i32 {
        match self {
            Self::Parse(_) => -32700,
            Self::InvalidRequest(_) => -32600,
            Self::BlockDecode(_) => -22,
            Self::Upstream(UpstreamError::RpcError(code, _)) => *code,
            Self::Upstream(_) => -32603,
        }
    }
}
