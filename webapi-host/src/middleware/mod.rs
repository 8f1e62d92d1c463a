pub mod exception_page;
pub mod hsts;
pub mod https_redirection;

use axum::extract::Request;
use axum::http::header;

const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Whether the client reached us over TLS. A TLS-terminating proxy in front
/// of the host reports the original scheme in `X-Forwarded-Proto`.
pub(crate) fn is_https(request: &Request) -> bool {
    if let Some(proto) = request
        .headers()
        .get(X_FORWARDED_PROTO)
        .and_then(|v| v.to_str().ok())
    {
        return proto
            .split(',')
            .next()
            .map(str::trim)
            .is_some_and(|p| p.eq_ignore_ascii_case("https"));
    }
    request.uri().scheme_str() == Some("https")
}

/// Request host without the port.
pub(crate) fn request_host(request: &Request) -> Option<String> {
    let authority = request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| request.uri().authority().map(|a| a.as_str().to_string()))?;

    let host = if authority.starts_with('[') {
        match authority.find(']') {
            Some(end) => &authority[..=end],
            None => authority.as_str(),
        }
    } else {
        authority.split(':').next().unwrap_or_default()
    };

    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request(host: &str, proto: Option<&str>) -> Request {
        let mut builder = Request::get("/").header(header::HOST, host);
        if let Some(proto) = proto {
            builder = builder.header(X_FORWARDED_PROTO, proto);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn host_is_stripped_of_its_port() {
        assert_eq!(
            request_host(&request("example.com:5000", None)).as_deref(),
            Some("example.com")
        );
        assert_eq!(request_host(&request("[::1]:5000", None)).as_deref(), Some("[::1]"));
        assert_eq!(request_host(&request("localhost", None)).as_deref(), Some("localhost"));
    }

    #[test]
    fn forwarded_proto_decides_the_scheme() {
        assert!(is_https(&request("example.com", Some("https"))));
        assert!(is_https(&request("example.com", Some("HTTPS, http"))));
        assert!(!is_https(&request("example.com", Some("http"))));
        assert!(!is_https(&request("example.com", None)));
    }
}
