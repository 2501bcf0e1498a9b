//! Retry taxonomy (§4.4/§7): classifying a task failure as permanent or retryable,
//! and computing the backoff delay for the retryable case.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::retry_after::parse_retry_after;

/// The outcome of classifying a failed attempt. Distinct from [`crate::job::JobOutcome`]:
/// this is what a task's failure *means*; `JobOutcome` is what the queue does about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Never retried; the job transitions straight to `FAILED`.
    Permanent { code: String },
    /// Re-queued with `run_after = max(now, retry_after)` while `run_attempts < max_retries`.
    Retryable { code: String, retry_after: Option<DateTime<Utc>> },
}

/// Provider-default delay used when a `Retry-After` header is absent, unparseable, or
/// names a time already in the past (§4.4).
pub const DEFAULT_RETRY_DELAY_SECS: i64 = 5;

/// Classify an HTTP response for retry purposes (§4.4 "Retry taxonomy"):
/// 4xx other than 408/429 are permanent; 408, 429, and 5xx are retryable.
/// `retry_after_header` is the raw `Retry-After` header value, if present.
pub fn classify_http_status(status: u16, retry_after_header: Option<&str>) -> ErrorClass {
    let code = status.to_string();
    let retryable = status == 408 || status == 429 || (500..600).contains(&status);

    if !retryable {
        return ErrorClass::Permanent { code };
    }

    let retry_after = retry_after_header.map(parse_retry_after).or_else(|| Some(default_retry_after()));
    ErrorClass::Retryable { code, retry_after }
}

/// Transport-level failures (connection refused, DNS failure, timeouts below the
/// HTTP layer) default to retryable (§4.4).
pub fn classify_transport_error(message: &str) -> ErrorClass {
    ErrorClass::Retryable {
        code: format!("transport: {message}"),
        retry_after: Some(default_retry_after()),
    }
}

/// `DEFAULT_RETRY_DELAY_SECS` plus up to 25% random jitter, so a burst of jobs
/// failing at once doesn't all re-admit on the same tick.
fn default_retry_after() -> DateTime<Utc> {
    let jitter_secs = DEFAULT_RETRY_DELAY_SECS as f64 * 0.25 * rand::random::<f64>();
    Utc::now() + chrono::Duration::milliseconds(((DEFAULT_RETRY_DELAY_SECS as f64 + jitter_secs) * 1000.0) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_oh_one_is_permanent() {
        assert_eq!(classify_http_status(401, None), ErrorClass::Permanent { code: "401".to_string() });
    }

    #[test]
    fn four_hundred_four_is_permanent() {
        assert_eq!(classify_http_status(404, None), ErrorClass::Permanent { code: "404".to_string() });
    }

    #[test]
    fn four_oh_eight_is_retryable() {
        match classify_http_status(408, None) {
            ErrorClass::Retryable { code, retry_after } => {
                assert_eq!(code, "408");
                assert!(retry_after.is_some());
            }
            other => panic!("expected retryable, got {other:?}"),
        }
    }

    #[test]
    fn four_twenty_nine_is_retryable_with_parsed_retry_after() {
        match classify_http_status(429, Some("30")) {
            ErrorClass::Retryable { retry_after: Some(at), .. } => {
                let delta = at - Utc::now();
                assert!(delta.num_seconds() >= 28 && delta.num_seconds() <= 31);
            }
            other => panic!("expected retryable with retry_after, got {other:?}"),
        }
    }

    #[test]
    fn five_oh_three_is_retryable() {
        assert!(matches!(classify_http_status(503, None), ErrorClass::Retryable { .. }));
    }

    #[test]
    fn transport_errors_default_retryable() {
        assert!(matches!(classify_transport_error("connection reset"), ErrorClass::Retryable { .. }));
    }
}
