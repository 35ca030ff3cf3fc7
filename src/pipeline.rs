//! Request Pipeline (`spec.md` §4.11): ordered axum middleware layers applied
//! to every request — request-id stamping, auth, rate limiting, and
//! structured, redacted logging.

use std::num::NonZeroU32;
use std::time::Instant;

use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::Response;
use governor::clock::{Clock, DefaultClock};
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovRateLimiter};
use uuid::Uuid;

use crate::state::AppState;
use crate::types::GatewayError;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const PUBLIC_PATHS: &[&str] = &["/health", "/v1/hardware/recommendations"];

const SENSITIVE_HEADER_FRAGMENTS: &[&str] =
    &["api_key", "api-key", "authorization", "bearer", "token", "secret", "password", "credential", "private"];

/// Token-bucket rate limiter shared across the process (`spec.md` §4.11).
pub struct RateLimiter {
    inner: GovRateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl RateLimiter {
    pub fn new(requests_per_second: u32) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(requests_per_second.max(1)).expect("clamped to at least 1"));
        Self {
            inner: GovRateLimiter::direct(quota),
        }
    }

    /// `Err` carries the number of whole seconds the caller should wait,
    /// rounded up so a caller never retries before the bucket refills
    /// (`spec.md` §4.11: "ceil-to-seconds ≥ 1").
    fn check(&self) -> Result<(), u64> {
        self.inner.check().map_err(|not_until| {
            let wait = not_until.wait_time_from(DefaultClock::default().now());
            (wait.as_millis().div_ceil(1000) as u64).max(1)
        })
    }
}

/// Layer 1: accept a caller-supplied `X-Request-ID` if it looks like a UUIDv4,
/// otherwise mint one. Stamped into request extensions and the response header.
pub async fn request_id_layer(mut request: Request, next: Next) -> Response {
    let incoming = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| Uuid::parse_str(value).ok());

    let request_id = incoming.unwrap_or_else(Uuid::new_v4).to_string();
    request.extensions_mut().insert(RequestId(request_id.clone()));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(HeaderName::from_static("x-request-id"), value);
    }
    response
}

#[derive(Clone)]
pub struct RequestId(pub String);

/// Layer 2: require `X-API-Key` or `Authorization: Bearer <key>`, compared in
/// constant time. Skipped entirely when auth is disabled or the path is public.
pub async fn auth_layer(State(state): State<AppState>, request: Request, next: Next) -> Result<Response, Response> {
    let request_id = request_id_of(&request);

    if state.gateway_config.auth_disabled() || PUBLIC_PATHS.contains(&request.uri().path()) {
        return Ok(next.run(request).await);
    }

    let provided = extract_api_key(&request);
    let authorized = provided.is_some_and(|key| constant_time_eq(key.as_bytes(), state.gateway_config.api_key.as_bytes()));

    if authorized {
        Ok(next.run(request).await)
    } else {
        Err(GatewayError::Auth.into_response_with_request_id(request_id))
    }
}

fn extract_api_key(request: &Request) -> Option<String> {
    if let Some(value) = request.headers().get("x-api-key").and_then(|v| v.to_str().ok()) {
        return Some(value.to_string());
    }
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split_once(' '))
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
        .map(|(_, token)| token.to_string())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Layer 3: per-process token bucket. `/health` is exempt.
pub async fn rate_limit_layer(State(state): State<AppState>, request: Request, next: Next) -> Result<Response, Response> {
    let request_id = request_id_of(&request);

    if request.uri().path() == "/health" {
        return Ok(next.run(request).await);
    }

    match state.rate_limiter.check() {
        Ok(()) => Ok(next.run(request).await),
        Err(retry_after_secs) => Err(GatewayError::RateLimit { retry_after_secs }.into_response_with_request_id(request_id)),
    }
}

/// Layer 4: structured request log with header/value redaction.
pub async fn logging_layer(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = request_id_of(&request);
    let client_ip = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| "unknown".to_string());

    let start = Instant::now();
    let response = next.run(request).await;
    let latency = start.elapsed();

    tracing::info!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = latency.as_millis() as u64,
        client_ip = %client_ip,
        request_id = %request_id,
        "request completed"
    );
    response
}

fn request_id_of(request: &Request) -> String {
    request.extensions().get::<RequestId>().map(|id| id.0.clone()).unwrap_or_default()
}

/// Redact a header name/value pair for anything that must never reach logs
/// verbatim (`spec.md` §4.11's redaction keyword list).
pub fn redact_header(name: &str, value: &str) -> String {
    let lower = name.to_ascii_lowercase();
    if SENSITIVE_HEADER_FRAGMENTS.iter().any(|fragment| lower.contains(fragment)) {
        "[REDACTED]".to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_header_names_matching_any_fragment() {
        assert_eq!(redact_header("Authorization", "Bearer abc"), "[REDACTED]");
        assert_eq!(redact_header("X-API-Key", "sk-123"), "[REDACTED]");
        assert_eq!(redact_header("Content-Type", "application/json"), "application/json");
    }

    #[test]
    fn constant_time_eq_rejects_mismatched_lengths_and_values() {
        assert!(!constant_time_eq(b"abc", b"ab"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"", b""));
    }

    #[test]
    fn rate_limiter_denies_after_burst_and_reports_wait() {
        let limiter = RateLimiter::new(1);
        assert!(limiter.check().is_ok());
        let err = limiter.check().expect_err("second request in the same instant is denied");
        assert!(err >= 1);
    }
}
