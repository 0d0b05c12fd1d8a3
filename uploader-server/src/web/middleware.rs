use std::any::Any;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tokio::time::Instant;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::endpoints::GRAPHQL_PATH;

/// The value for the `Server` HTTP header.
const SERVER: &str = concat!("uploader/", env!("CARGO_PKG_VERSION"));

/// What a request is doing, used to tag spans and metrics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestKind {
    /// A multipart GraphQL request carrying files.
    Upload,
    /// Any other GraphQL request, including GraphiQL.
    Graphql,
    /// Health and readiness probes, and unknown routes.
    Other,
}

impl RequestKind {
    /// Classifies a request by its path and content type.
    pub fn of(request: &Request) -> Self {
        if request.uri().path() != GRAPHQL_PATH {
            return Self::Other;
        }

        let is_multipart = request
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("multipart/form-data"));

        if is_multipart {
            Self::Upload
        } else {
            Self::Graphql
        }
    }

    /// The tag value of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Graphql => "graphql",
            Self::Other => "other",
        }
    }
}

/// Sets the `Server` header on every response.
pub fn set_server_header() -> SetResponseHeaderLayer<HeaderValue> {
    SetResponseHeaderLayer::overriding(header::SERVER, HeaderValue::from_static(SERVER))
}

/// Creates the tracing span for a request.
///
/// The span carries the request kind and the client IP address. GraphQL handlers fill in the
/// `operation` field once the request body has been parsed.
pub fn make_http_span(request: &Request) -> tracing::Span {
    let span = tracing::debug_span!(
        "request",
        kind = RequestKind::of(request).as_str(),
        method = %request.method(),
        uri = %request.uri(),
        operation = tracing::field::Empty,
        client_addr = tracing::field::Empty,
    );

    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        span.record("client_addr", tracing::field::display(addr.ip()));
    }

    span
}

/// Turns a panic in a handler into a 500 response.
pub fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("no error details")
        .to_owned();

    tracing::error!("panic in web handler: {detail}");
    (StatusCode::INTERNAL_SERVER_ERROR, detail).into_response()
}

/// Emits request counts and durations, tagged by [`RequestKind`].
///
/// Use this with [`from_fn`](axum::middleware::from_fn).
pub async fn emit_request_metrics(request: Request, next: Next) -> Response {
    let timer = RequestTimer::start(RequestKind::of(&request), request.method());
    let response = next.run(request).await;
    timer.finish(response.status());
    response
}

/// Records the duration of a request when dropped.
///
/// A timer dropped without [`finish`](Self::finish) belongs to a request whose client went away
/// mid-upload, which is reported as status `499`.
struct RequestTimer {
    kind: RequestKind,
    method: Method,
    start: Instant,
    status: Option<StatusCode>,
}

impl RequestTimer {
    fn start(kind: RequestKind, method: &Method) -> Self {
        merni::counter!(
            "server.requests": 1,
            "kind" => kind.as_str(),
            "method" => method.as_str()
        );

        Self {
            kind,
            method: method.clone(),
            start: Instant::now(),
            status: None,
        }
    }

    fn finish(mut self, status: StatusCode) {
        self.status = Some(status);
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        let status = self.status.map_or(499, |status| status.as_u16());
        merni::distribution!(
            "server.requests.duration"@s: self.start.elapsed(),
            "kind" => self.kind.as_str(),
            "method" => self.method.as_str(),
            "status" => status
        );
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;

    use super::*;

    fn request(path: &str, content_type: Option<&str>) -> Request {
        let mut builder = axum::http::Request::post(path);
        if let Some(content_type) = content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn classifies_requests() {
        let upload = request("/graphql", Some("multipart/form-data; boundary=xyz"));
        assert_eq!(RequestKind::of(&upload), RequestKind::Upload);

        let query = request("/graphql", Some("application/json"));
        assert_eq!(RequestKind::of(&query), RequestKind::Graphql);

        let health = request("/health", None);
        assert_eq!(RequestKind::of(&health), RequestKind::Other);
    }

    #[test]
    fn panics_become_server_errors() {
        let response = handle_panic(Box::new("storage exploded"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = handle_panic(Box::new(42));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
