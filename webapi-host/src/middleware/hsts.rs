use super::{is_https, request_host};
use axum::{
    extract::{Request, State},
    http::{header, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HstsOptions {
    pub max_age: Duration,
    pub include_subdomains: bool,
    pub preload: bool,
    pub excluded_hosts: Vec<String>,
}

impl Default for HstsOptions {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(30 * 24 * 60 * 60),
            include_subdomains: false,
            preload: false,
            excluded_hosts: vec![
                "localhost".to_string(),
                "127.0.0.1".to_string(),
                "[::1]".to_string(),
            ],
        }
    }
}

impl HstsOptions {
    pub fn header_value(&self) -> String {
        let mut value = format!("max-age={}", self.max_age.as_secs());
        if self.include_subdomains {
            value.push_str("; includeSubDomains");
        }
        if self.preload {
            value.push_str("; preload");
        }
        value
    }

    fn is_excluded(&self, host: &str) -> bool {
        self.excluded_hosts.iter().any(|h| h.eq_ignore_ascii_case(host))
    }
}

/// Adds `Strict-Transport-Security` to HTTPS responses for non-loopback hosts.
pub async fn hsts_middleware(
    State(options): State<Arc<HstsOptions>>,
    request: Request,
    next: Next,
) -> Response {
    let applies = is_https(&request)
        && !request_host(&request).is_some_and(|host| options.is_excluded(&host));

    let mut response = next.run(request).await;
    if applies {
        if let Ok(value) = HeaderValue::from_str(&options.header_value()) {
            response
                .headers_mut()
                .insert(header::STRICT_TRANSPORT_SECURITY, value);
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, middleware, routing::get, Router};
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(
                Arc::new(HstsOptions::default()),
                hsts_middleware,
            ))
    }

    async fn hsts_header(host: &str, proto: &str) -> Option<String> {
        let response = app()
            .oneshot(
                Request::get("/")
                    .header(header::HOST, host)
                    .header("x-forwarded-proto", proto)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        response
            .headers()
            .get(header::STRICT_TRANSPORT_SECURITY)
            .map(|v| v.to_str().unwrap().to_string())
    }

    #[test]
    fn header_value_lists_enabled_directives() {
        let options = HstsOptions {
            include_subdomains: true,
            preload: true,
            ..Default::default()
        };
        assert_eq!(options.header_value(), "max-age=2592000; includeSubDomains; preload");
    }

    #[tokio::test]
    async fn added_to_https_responses() {
        assert_eq!(hsts_header("example.com", "https").await.as_deref(), Some("max-age=2592000"));
    }

    #[tokio::test]
    async fn skipped_for_plain_http_and_loopback() {
        assert_eq!(hsts_header("example.com", "http").await, None);
        assert_eq!(hsts_header("localhost:5001", "https").await, None);
        assert_eq!(hsts_header("[::1]:5001", "https").await, None);
    }
}
