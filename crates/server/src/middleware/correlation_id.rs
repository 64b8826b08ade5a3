//! Request id middleware.
//!
//! Every inbound request gets an `x-request-id` (kept if the caller sent one,
//! otherwise a fresh UUID v4) and the same id is echoed on the response, so a
//! miner's log line can be matched to the proxy's.

use axum::http::{header::HeaderValue, HeaderMap, HeaderName, Request};
use tower_http::request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer};
use uuid::Uuid;

pub static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Generates UUID v4 request ids.
#[derive(Clone, Copy, Default)]
pub struct UuidRequestIdGenerator;

impl MakeRequestId for UuidRequestIdGenerator {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = Uuid::new_v4().to_string();
        Some(RequestId::new(HeaderValue::from_str(&id).ok()?))
    }
}

/// Returns the set and propagate layers. Apply propagate first so it wraps
/// the handler inside set:
///
/// ```ignore
/// let (set, propagate) = request_id_layers();
/// router.layer(propagate).layer(set)
/// ```
#[must_use]
pub fn request_id_layers() -> (SetRequestIdLayer<UuidRequestIdGenerator>, PropagateRequestIdLayer) {
    (
        SetRequestIdLayer::new(X_REQUEST_ID.clone(), UuidRequestIdGenerator),
        PropagateRequestIdLayer::new(X_REQUEST_ID.clone()),
    )
}

/// Request id carried by `headers`, or `"-"` when absent.
#[must_use]
pub fn request_id(headers: &HeaderMap) -> &str {
    headers.get(&X_REQUEST_ID).and_then(|value| value.to_str().ok()).unwrap_or("-")
}
