use axum::body::Body;
use axum::http::header::{HeaderName, HeaderValue};
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use std::env;

const X_CONTENT_TYPE_OPTIONS: &str = "x-content-type-options";
const X_FRAME_OPTIONS: &str = "x-frame-options";
const STRICT_TRANSPORT_SECURITY: &str = "strict-transport-security";
const CONTENT_SECURITY_POLICY: &str = "content-security-policy";
const REFERRER_POLICY: &str = "referrer-policy";

const NOSNIFF: &str = "nosniff";
const DENY: &str = "DENY";
const HSTS_VALUE: &str = "max-age=31536000; includeSubDomains";
const CSP_API_VALUE: &str = "default-src 'none'; frame-ancestors 'none'";
const REFERRER_POLICY_VALUE: &str = "strict-origin-when-cross-origin";

/// Baseline security response headers for a JSON API. HSTS is added only
/// when running in production, where the service is known to sit behind TLS.
pub async fn set_security_headers(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(
        HeaderName::from_static(X_CONTENT_TYPE_OPTIONS),
        HeaderValue::from_static(NOSNIFF),
    );
    headers.insert(
        HeaderName::from_static(X_FRAME_OPTIONS),
        HeaderValue::from_static(DENY),
    );
    headers.insert(
        HeaderName::from_static(CONTENT_SECURITY_POLICY),
        HeaderValue::from_static(CSP_API_VALUE),
    );
    headers.insert(
        HeaderName::from_static(REFERRER_POLICY),
        HeaderValue::from_static(REFERRER_POLICY_VALUE),
    );

    if hsts_enabled() {
        headers.insert(
            HeaderName::from_static(STRICT_TRANSPORT_SECURITY),
            HeaderValue::from_static(HSTS_VALUE),
        );
    }

    response
}

fn hsts_enabled() -> bool {
    env::var("RUST_ENV")
        .map(|v| v.to_lowercase() == "production")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hsts_disabled_outside_production() {
        std::env::remove_var("RUST_ENV");
        assert!(!hsts_enabled());
    }

    #[test]
    fn header_values_parse() {
        for value in [NOSNIFF, DENY, HSTS_VALUE, CSP_API_VALUE, REFERRER_POLICY_VALUE] {
            assert!(value.parse::<HeaderValue>().is_ok());
        }
    }
}
