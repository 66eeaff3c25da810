//! The echo handler and the `Handler` seam the transport dispatches through.

use super::body::Body;
use async_trait::async_trait;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Request, Response};
use std::sync::Arc;

/// A parsed request whose body, if it has one, is still on the wire.
///
/// The body is `None` when the request carried no body framing at all.
pub type InboundRequest<'a> = Request<Option<Body<'a>>>;

/// A fully buffered response.
pub type OutboundResponse = Response<Bytes>;

/// Turns one inbound request into exactly one response.
///
/// Implementations must be stateless or internally synchronized: the server
/// invokes the same handler from every connection task concurrently.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, request: InboundRequest<'_>) -> OutboundResponse;
}

#[async_trait]
impl<H: Handler + ?Sized> Handler for Arc<H> {
    async fn handle(&self, request: InboundRequest<'_>) -> OutboundResponse {
        (**self).handle(request).await
    }
}

/// Mirrors the request back: status 200, the request's `content-type`
/// (empty when absent) and the request body byte for byte.
///
/// A body that fails mid-read is not reported to the client. Whatever arrived
/// before the failure is echoed, which may be nothing.
pub async fn echo(request: InboundRequest<'_>) -> OutboundResponse {
    let (parts, body) = request.into_parts();

    let content_type = parts
        .headers
        .get(CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static(""));

    let mut bytes = Vec::new();
    if let Some(mut body) = body {
        // Partial bytes are already in `bytes` when this fails.
        let _ = body.read_to_end(&mut bytes).await;
    }

    let mut response = Response::new(Bytes::from(bytes));
    response.headers_mut().insert(CONTENT_TYPE, content_type);
    response
}

/// [`Handler`] wrapper around [`echo`]
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoHandler;

#[async_trait]
impl Handler for EchoHandler {
    async fn handle(&self, request: InboundRequest<'_>) -> OutboundResponse {
        echo(request).await
    }
}
