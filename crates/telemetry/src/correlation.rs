use axum::http::{HeaderMap, HeaderValue, Request};
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::Span;
use uuid::Uuid;

/// HTTP header name for correlation ID
pub const X_CORRELATION_ID: &str = "x-correlation-id";

/// HTTP header name for request ID (accepted as a correlation ID)
pub const X_REQUEST_ID: &str = "x-request-id";

pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Extract correlation ID from HTTP headers or generate a new one
pub fn extract_or_generate_correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(X_CORRELATION_ID)
        .or_else(|| headers.get(X_REQUEST_ID))
        .and_then(|h| h.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(generate_correlation_id)
}

/// Tower layer that tags every request with a [`CorrelationId`].
///
/// The id is stored in the request extensions and mirrored into the
/// `x-correlation-id` header so handlers and downstream layers see the same
/// value. Install it outside the trace layer so [`make_request_span`] can
/// read it.
#[derive(Clone, Default)]
pub struct CorrelationIdLayer;

impl CorrelationIdLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for CorrelationIdLayer {
    type Service = CorrelationIdService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CorrelationIdService { inner }
    }
}

#[derive(Clone)]
pub struct CorrelationIdService<S> {
    inner: S,
}

impl<S, ReqBody> Service<Request<ReqBody>> for CorrelationIdService<S>
where
    S: Service<Request<ReqBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let correlation_id = extract_or_generate_correlation_id(req.headers());

        if let Ok(value) = HeaderValue::from_str(&correlation_id) {
            req.headers_mut().insert(X_CORRELATION_ID, value);
        }
        req.extensions_mut().insert(CorrelationId(correlation_id));

        self.inner.call(req)
    }
}

/// Span factory for `tower_http::trace::TraceLayer::make_span_with`
pub fn make_request_span<B>(req: &Request<B>) -> Span {
    let correlation_id = req
        .extensions()
        .get::<CorrelationId>()
        .map(|id| id.as_str().to_string())
        .unwrap_or_default();

    tracing::info_span!(
        "http_request",
        method = %req.method(),
        uri = %req.uri(),
        correlation_id = %correlation_id,
    )
}

/// Correlation ID wrapper for use in request extensions
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
