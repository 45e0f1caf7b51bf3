//! Rate limit headers and the 429 response.

use crate::domain::policy::Decision;
use axum::response::{IntoResponse, Response};
use axum::Json;
use http::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use http::StatusCode;
use serde::Serialize;

/// Request limit of the applied policy.
pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");

/// Requests left in the current window.
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// Unix time (seconds) at which the current window resets.
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Message sent with a denial unless a layer overrides it.
pub const DEFAULT_DENIAL_MESSAGE: &str = "Too many requests";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DenialBody<'a> {
    error: &'a str,
    retry_after: u64,
}

/// Add rate limit headers for `decision` to a successful response.
///
/// Headers already present are left alone. Layers run outside-in on the
/// response path, so the innermost (most specific) policy's numbers win.
pub fn decorate(headers: &mut HeaderMap, decision: &Decision) {
    insert_absent(headers, X_RATELIMIT_LIMIT, decision.limit);
    insert_absent(headers, X_RATELIMIT_REMAINING, decision.remaining);
    insert_absent(headers, X_RATELIMIT_RESET, decision.reset_at_epoch_secs);
}

fn insert_absent(headers: &mut HeaderMap, name: HeaderName, value: u64) {
    if !headers.contains_key(&name) {
        headers.insert(name, HeaderValue::from(value));
    }
}

/// Build the 429 response for a denied request.
///
/// `retry_after_secs` is clamped to at least one second so clients never
/// retry immediately.
pub fn too_many_requests(decision: &Decision, retry_after_secs: u64, message: &str) -> Response {
    let retry_after = retry_after_secs.max(1);
    let body = DenialBody {
        error: message,
        retry_after,
    };

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    let headers = response.headers_mut();
    headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(0u64));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(decision.reset_at_epoch_secs));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use std::time::{Duration, UNIX_EPOCH};

    fn decision(allowed: bool, remaining: u64) -> Decision {
        Decision {
            allowed,
            limit: 10,
            remaining,
            reset_at: UNIX_EPOCH + Duration::from_secs(1_060),
            reset_at_epoch_secs: 1_060,
        }
    }

    #[test]
    fn test_decorate_sets_headers() {
        let mut headers = HeaderMap::new();
        decorate(&mut headers, &decision(true, 7));

        assert_eq!(headers[X_RATELIMIT_LIMIT], "10");
        assert_eq!(headers[X_RATELIMIT_REMAINING], "7");
        assert_eq!(headers[X_RATELIMIT_RESET], "1060");
    }

    #[test]
    fn test_decorate_keeps_inner_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from_static("5"));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from_static("1"));

        decorate(&mut headers, &decision(true, 7));

        assert_eq!(headers[X_RATELIMIT_LIMIT], "5");
        assert_eq!(headers[X_RATELIMIT_REMAINING], "1");
        assert_eq!(headers[X_RATELIMIT_RESET], "1060");
    }

    #[tokio::test]
    async fn test_too_many_requests() {
        let response = too_many_requests(&decision(false, 0), 42, DEFAULT_DENIAL_MESSAGE);

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "42");
        assert_eq!(response.headers()[X_RATELIMIT_LIMIT], "10");
        assert_eq!(response.headers()[X_RATELIMIT_REMAINING], "0");

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"error": "Too many requests", "retryAfter": 42})
        );
    }

    #[test]
    fn test_retry_after_is_at_least_one_second() {
        let response = too_many_requests(&decision(false, 0), 0, "slow down");
        assert_eq!(response.headers()[RETRY_AFTER], "1");
    }
}
