//! Shared wire types: JSON-RPC envelopes, block hashes and notifications.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

/// Method names answered by the proxy itself instead of being forwarded.
pub mod methods {
    pub const GET_BLOCK_TEMPLATE: &str = "getblocktemplate";
    pub const GET_BLOCK_TEMPLATE_LIGHT: &str = "getblocktemplatelight";
    pub const SUBMIT_BLOCK: &str = "submitblock";
    pub const GET_ZMQ_NOTIFICATIONS: &str = "getzmqnotifications";
    pub const GET_BLOCKCHAIN_INFO: &str = "getblockchaininfo";
    pub const GET_BLOCK_HEADER: &str = "getblockheader";
}

/// JSON-RPC request as sent by mining software and forwarded to nodes.
///
/// Bitcoin nodes accept both the 1.0 envelope (no `jsonrpc` member) and 2.0,
/// so the version member is optional and echoed only when present.
///
/// # Example
///
/// ```
/// use balancer_core::types::JsonRpcRequest;
/// use serde_json::json;
///
/// let request = JsonRpcRequest::new("getblockchaininfo", Some(json!([])), json!(1));
/// assert_eq!(request.method, "getblockchaininfo");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonrpc: Option<String>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    #[serde(default = "null_id")]
    pub id: Arc<serde_json::Value>,
}

fn null_id() -> Arc<serde_json::Value> {
    Arc::new(serde_json::Value::Null)
}

impl JsonRpcRequest {
    #[must_use]
    pub fn new(
        method: impl Into<String>,
        params: Option<serde_json::Value>,
        id: serde_json::Value,
    ) -> Self {
        Self { jsonrpc: None, method: method.into(), params, id: Arc::new(id) }
    }

    /// Lower-cased method name used for dispatch.
    #[must_use]
    pub fn normalized_method(&self) -> String {
        self.method.to_ascii_lowercase()
    }

    /// Returns the positional parameter at `index`, if params is an array.
    #[must_use]
    pub fn param(&self, index: usize) -> Option<&serde_json::Value> {
        self.params.as_ref().and_then(|params| params.as_array()).and_then(|list| list.get(index))
    }

    /// Serializes the request for forwarding.
    ///
    /// # Errors
    ///
    /// Returns an error if the params value cannot be serialized.
    pub fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}

/// JSON-RPC response in the shape Bitcoin nodes produce: `result` and `error`
/// are both always present, one of them null.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub result: serde_json::Value,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
    #[serde(default = "null_id")]
    pub id: Arc<serde_json::Value>,
}

impl JsonRpcResponse {
    #[must_use]
    pub fn success(result: serde_json::Value, id: Arc<serde_json::Value>) -> Self {
        Self { result, error: None, id }
    }

    #[must_use]
    pub fn error(code: i32, message: impl Into<String>, id: Arc<serde_json::Value>) -> Self {
        Self {
            result: serde_json::Value::Null,
            error: Some(JsonRpcError { code, message: message.into() }),
            id,
        }
    }
}

/// Error object returned by Bitcoin nodes.
///
/// Standard codes used here:
///
/// - `-32700`: Parse error
/// - `-32600`: Invalid request
/// - `-32601`: Method not found
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

/// Error type for hash parsing
#[derive(Debug, Clone, thiserror::Error)]
pub enum HashParseError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),
    #[error("invalid length: expected 32 bytes, got {0}")]
    InvalidLength(usize),
}

/// 32-byte double-SHA256 digest in internal (little-endian) byte order.
///
/// Nodes display hashes byte-reversed; `Display` and `FromStr` use that
/// display order so values round-trip through RPC unchanged.
///
/// # Example
/// ```
/// use balancer_core::types::Hash32;
///
/// let genesis: Hash32 = "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"
///     .parse()
///     .unwrap();
/// assert_eq!(genesis.as_bytes()[31], 0x00);
/// assert_eq!(genesis.as_bytes()[0], 0x6f);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash32(pub [u8; 32]);

impl Hash32 {
    pub const ZERO: Hash32 = Hash32([0u8; 32]);

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    #[must_use]
    pub fn into_bytes(self) -> [u8; 32] {
        self.0
    }

    /// Builds a hash from bytes already in internal order.
    ///
    /// # Errors
    ///
    /// Returns an error unless `bytes` is exactly 32 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, HashParseError> {
        let arr: [u8; 32] =
            bytes.try_into().map_err(|_| HashParseError::InvalidLength(bytes.len()))?;
        Ok(Self(arr))
    }

    /// Builds a hash from bytes in display order, the form `hashblock`
    /// notifications carry.
    pub fn from_display_slice(bytes: &[u8]) -> Result<Self, HashParseError> {
        let mut hash = Self::from_slice(bytes)?;
        hash.0.reverse();
        Ok(hash)
    }

    /// Hex in display (byte-reversed) order.
    #[must_use]
    pub fn to_display_hex(&self) -> String {
        let mut reversed = self.0;
        reversed.reverse();
        hex::encode(reversed)
    }
}

impl TryFrom<&str> for Hash32 {
    type Error = HashParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let hex_str = value.strip_prefix("0x").unwrap_or(value);
        let mut bytes =
            hex::decode(hex_str).map_err(|e| HashParseError::InvalidHex(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(HashParseError::InvalidLength(bytes.len()));
        }
        bytes.reverse();
        Self::from_slice(&bytes)
    }
}

impl From<[u8; 32]> for Hash32 {
    fn from(arr: [u8; 32]) -> Self {
        Hash32(arr)
    }
}

impl AsRef<[u8; 32]> for Hash32 {
    fn as_ref(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display_hex())
    }
}

impl std::str::FromStr for Hash32 {
    type Err = HashParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s)
    }
}

impl Serialize for Hash32 {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_display_hex())
    }
}

impl<'de> Deserialize<'de> for Hash32 {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Self::try_from(value.as_str()).map_err(serde::de::Error::custom)
    }
}

/// Kinds of chain events relayed between nodes and subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Block,
    BlockHash,
    Transaction,
    TransactionHash,
}

impl NotificationType {
    pub const ALL: [NotificationType; 4] =
        [Self::Block, Self::BlockHash, Self::Transaction, Self::TransactionHash];

    /// Topic tag used on the publish socket (first frame of every message).
    #[must_use]
    pub fn topic(&self) -> &'static str {
        match self {
            Self::Block => "rawblock",
            Self::BlockHash => "hashblock",
            Self::Transaction => "rawtx",
            Self::TransactionHash => "hashtx",
        }
    }

    /// Name reported by `getzmqnotifications`.
    #[must_use]
    pub fn publisher_name(&self) -> &'static str {
        match self {
            Self::Block => "pubrawblock",
            Self::BlockHash => "pubhashblock",
            Self::Transaction => "pubrawtx",
            Self::TransactionHash => "pubhashtx",
        }
    }

    #[must_use]
    pub fn from_topic(topic: &[u8]) -> Option<Self> {
        match topic {
            b"rawblock" => Some(Self::Block),
            b"hashblock" => Some(Self::BlockHash),
            b"rawtx" => Some(Self::Transaction),
            b"hashtx" => Some(Self::TransactionHash),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_block(&self) -> bool {
        matches!(self, Self::Block | Self::BlockHash)
    }

    /// Hash variants carry exactly one 32-byte digest.
    #[must_use]
    pub fn is_hash(&self) -> bool {
        matches!(self, Self::BlockHash | Self::TransactionHash)
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.topic())
    }
}

/// A chain event. Equality is structural over type and payload bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Notification {
    pub kind: NotificationType,
    pub payload: Bytes,
}

impl Notification {
    #[must_use]
    pub fn new(kind: NotificationType, payload: impl Into<Bytes>) -> Self {
        Self { kind, payload: payload.into() }
    }
}
