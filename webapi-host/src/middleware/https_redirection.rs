use super::{is_https, request_host};
use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug)]
pub struct HttpsRedirection {
    https_port: Option<u16>,
    status: StatusCode,
    warned: AtomicBool,
}

impl HttpsRedirection {
    pub fn new(https_port: Option<u16>) -> Self {
        Self {
            https_port,
            status: StatusCode::TEMPORARY_REDIRECT,
            warned: AtomicBool::new(false),
        }
    }

    fn location(&self, request: &Request, port: u16) -> Option<HeaderValue> {
        let host = request_host(request)?;
        let authority = if port == 443 {
            host
        } else {
            format!("{}:{}", host, port)
        };
        let path = request
            .uri()
            .path_and_query()
            .map(|p| p.as_str())
            .unwrap_or("/");

        HeaderValue::from_str(&format!("https://{}{}", authority, path)).ok()
    }
}

/// Redirects plain HTTP requests to the configured HTTPS port. Without a
/// configured port requests pass through and a warning is logged once.
pub async fn https_redirection_middleware(
    State(redirect): State<Arc<HttpsRedirection>>,
    request: Request,
    next: Next,
) -> Response {
    if is_https(&request) {
        return next.run(request).await;
    }

    let Some(port) = redirect.https_port else {
        if !redirect.warned.swap(true, Ordering::Relaxed) {
            warn!("Failed to determine the https port for redirect");
        }
        return next.run(request).await;
    };

    match redirect.location(&request, port) {
        Some(location) => (redirect.status, [(header::LOCATION, location)]).into_response(),
        None => next.run(request).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, middleware, routing::get, Router};
    use tower::ServiceExt;

    fn app(https_port: Option<u16>) -> Router {
        Router::new()
            .route("/api/values", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(
                Arc::new(HttpsRedirection::new(https_port)),
                https_redirection_middleware,
            ))
    }

    fn request(proto: Option<&str>) -> Request {
        let mut builder =
            Request::get("/api/values?page=2").header(header::HOST, "example.com:5000");
        if let Some(proto) = proto {
            builder = builder.header("x-forwarded-proto", proto);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn plain_http_is_redirected_to_the_https_port() {
        let response = app(Some(5001)).oneshot(request(None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(
            response.headers()[header::LOCATION],
            "https://example.com:5001/api/values?page=2"
        );
    }

    #[tokio::test]
    async fn default_port_is_omitted_from_the_location() {
        let response = app(Some(443)).oneshot(request(None)).await.unwrap();

        assert_eq!(response.headers()[header::LOCATION], "https://example.com/api/values?page=2");
    }

    #[tokio::test]
    async fn https_requests_pass_through() {
        let response = app(Some(5001)).oneshot(request(Some("https"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_https_port_passes_through() {
        let response = app(None).oneshot(request(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
