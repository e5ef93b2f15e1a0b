//! Request correlation ids.
//!
//! Every response carries `x-request-id`: the client's own value when it sent
//! a usable one, otherwise a fresh UUID. Handlers read it through the
//! [`RequestId`] extractor, and everything logged while the request runs is
//! inside a `request` span carrying the id.

use std::time::Instant;

use axum::{
    extract::{FromRequestParts, Request},
    http::{HeaderMap, HeaderValue, StatusCode, request::Parts},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_REQUEST_ID_LEN: usize = 128;

/// Correlation id of the current request
#[derive(Clone, Debug)]
pub struct RequestId(pub String);

impl RequestId {
    /// Client-supplied ids are kept only when short and header-safe
    fn from_headers(headers: &HeaderMap) -> Self {
        let supplied = headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|s| !s.is_empty() && s.len() <= MAX_REQUEST_ID_LEN);

        match supplied {
            Some(id) => Self(id.to_string()),
            None => Self(Uuid::new_v4().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Tag the request with a [`RequestId`] and echo it on the response.
///
/// ```no_run
/// use axum::{Router, routing::get, middleware};
/// use ff_server::api::request_id::request_id_middleware;
///
/// let app: Router = Router::new()
///     .route("/", get(|| async { "ok" }))
///     .layer(middleware::from_fn(request_id_middleware));
/// ```
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = RequestId::from_headers(request.headers());
    request.extensions_mut().insert(request_id.clone());

    let span = tracing::info_span!(
        "request",
        request_id = %request_id.as_str(),
        method = %request.method(),
        path = %request.uri().path(),
    );

    async move {
        let started = Instant::now();
        let mut response = next.run(request).await;

        if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }

        tracing::info!(
            status = response.status().as_u16(),
            latency_ms = started.elapsed().as_millis() as u64,
            "Request completed"
        );
        response
    }
    .instrument(span)
    .await
}

impl<S> FromRequestParts<S> for RequestId
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestId>()
            .cloned()
            .ok_or((StatusCode::INTERNAL_SERVER_ERROR, "Request id middleware not installed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_is_kept() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("test-id-123"));

        assert_eq!(RequestId::from_headers(&headers).as_str(), "test-id-123");
    }

    #[test]
    fn test_missing_id_is_generated() {
        let id = RequestId::from_headers(&HeaderMap::new());
        assert!(Uuid::parse_str(id.as_str()).is_ok());
    }

    #[test]
    fn test_oversized_id_is_replaced() {
        let mut headers = HeaderMap::new();
        let long = "x".repeat(MAX_REQUEST_ID_LEN + 1);
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_str(&long).unwrap());

        let id = RequestId::from_headers(&headers);
        assert!(Uuid::parse_str(id.as_str()).is_ok());
    }
}
