//! Mapping of GitHub responses and transport failures onto [`HostingError`].

use std::time::Duration;

use autoapprove_core::HostingError;
use chrono::Utc;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// Classify a non-success response.
pub fn classify_response(
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
    resource: &str,
) -> HostingError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.message)
        .ok()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.chars().take(200).collect());

    match status.as_u16() {
        401 => HostingError::Unauthorized(message),
        404 => HostingError::NotFound(resource.to_string()),
        429 => HostingError::RateLimited {
            retry_after: retry_after(headers),
        },
        // Primary and secondary rate limits both arrive as 403.
        403 if is_rate_limited(headers, &message) => HostingError::RateLimited {
            retry_after: retry_after(headers),
        },
        code => HostingError::Api {
            status: code,
            message,
        },
    }
}

/// Classify a failure that produced no response.
pub fn classify_transport(err: reqwest::Error) -> HostingError {
    if err.is_decode() {
        HostingError::Decode(err.to_string())
    } else {
        HostingError::Transient(err.to_string())
    }
}

fn is_rate_limited(headers: &HeaderMap, message: &str) -> bool {
    let exhausted = header_str(headers, "x-ratelimit-remaining").is_some_and(|v| v.trim() == "0");
    exhausted || message.to_ascii_lowercase().contains("rate limit")
}

/// `Retry-After` seconds, else time until `x-ratelimit-reset`.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    if let Some(secs) = header_str(headers, "retry-after").and_then(|v| v.trim().parse::<u64>().ok())
    {
        return Some(Duration::from_secs(secs));
    }
    let reset = header_str(headers, "x-ratelimit-reset")?.trim().parse::<i64>().ok()?;
    let wait = reset - Utc::now().timestamp();
    Some(Duration::from_secs(wait.max(0) as u64))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_str(v).unwrap());
        }
        map
    }

    #[test]
    fn test_secondary_rate_limit_is_retryable() {
        let err = classify_response(
            StatusCode::FORBIDDEN,
            &headers(&[("retry-after", "60")]),
            r#"{"message":"You have exceeded a secondary rate limit"}"#,
            "pulls/1",
        );
        assert!(err.is_retryable());
        assert!(matches!(
            err,
            HostingError::RateLimited { retry_after: Some(d) } if d == Duration::from_secs(60)
        ));
    }

    #[test]
    fn test_plain_forbidden_is_permanent() {
        let err = classify_response(
            StatusCode::FORBIDDEN,
            &HeaderMap::new(),
            r#"{"message":"Resource not accessible by integration"}"#,
            "pulls/1/reviews",
        );
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "api error 403: Resource not accessible by integration");
    }

    #[test]
    fn test_status_mapping() {
        let none = HeaderMap::new();
        assert!(matches!(
            classify_response(StatusCode::UNAUTHORIZED, &none, r#"{"message":"Bad credentials"}"#, "user"),
            HostingError::Unauthorized(m) if m == "Bad credentials"
        ));
        assert!(matches!(
            classify_response(StatusCode::NOT_FOUND, &none, "{}", "repos/o/r/pulls/9"),
            HostingError::NotFound(r) if r == "repos/o/r/pulls/9"
        ));
        assert!(classify_response(StatusCode::BAD_GATEWAY, &none, "<html>", "x").is_retryable());
        assert!(!classify_response(StatusCode::UNPROCESSABLE_ENTITY, &none, "{}", "x").is_retryable());
    }
}
