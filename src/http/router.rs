use super::handler::{EchoHandler, Handler, InboundRequest, OutboundResponse};
use super::protocol::error_response;
use async_trait::async_trait;
use http::header::ALLOW;
use http::{HeaderValue, Method, StatusCode};
use std::sync::Arc;

/// Path the echo handler is mounted on
pub const ECHO_PATH: &str = "/api/echo";

struct Route {
    path: String,
    methods: Vec<Method>,
    handler: Arc<dyn Handler>,
}

/// Exact-path request router
///
/// Routes are matched on the request path alone; query strings are ignored.
/// A path that matches with the wrong method yields `405` with an `allow`
/// header listing every method registered for that path. No match at all
/// yields `404`.
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.routes.iter().map(|r| (&r.path, &r.methods)))
            .finish()
    }
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `methods` on `path`
    pub fn route<H: Handler>(mut self, path: impl Into<String>, methods: &[Method], handler: H) -> Self {
        self.routes.push(Route {
            path: path.into(),
            methods: methods.to_vec(),
            handler: Arc::new(handler),
        });
        self
    }
}

#[async_trait]
impl Handler for Router {
    async fn handle(&self, request: InboundRequest<'_>) -> OutboundResponse {
        let mut allowed: Vec<&Method> = Vec::new();
        let mut matched = None;

        for route in self.routes.iter().filter(|r| r.path == request.uri().path()) {
            if route.methods.contains(request.method()) {
                matched = Some(route);
                break;
            }
            allowed.extend(route.methods.iter());
        }

        if let Some(route) = matched {
            return route.handler.handle(request).await;
        }

        if allowed.is_empty() {
            return error_response(StatusCode::NOT_FOUND);
        }

        let mut response = error_response(StatusCode::METHOD_NOT_ALLOWED);
        let allow = allowed.iter().map(|m| m.as_str()).collect::<Vec<_>>().join(", ");
        if let Ok(value) = HeaderValue::from_str(&allow) {
            response.headers_mut().insert(ALLOW, value);
        }
        response
    }
}

/// The standard routing table: `GET` and `POST` on `/api/echo` both echo.
pub fn echo_router() -> Router {
    Router::new().route(ECHO_PATH, &[Method::GET, Method::POST], EchoHandler)
}
