//! HTTP middleware for the proxy listener.

pub mod correlation_id;

pub use correlation_id::{request_id, request_id_layers, UuidRequestIdGenerator, X_REQUEST_ID};
