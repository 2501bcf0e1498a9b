//! `Retry-After` header parsing (§4.4): seconds-delta or an RFC1123/ISO8601 absolute
//! date. Past dates and unparseable values fall back to a provider-default delay.

use chrono::{DateTime, Utc};

use crate::retry::DEFAULT_RETRY_DELAY_SECS;

/// Parse a raw `Retry-After` header value into an absolute point in time.
///
/// Never fails: a value this function can't make sense of, or one that names a time
/// already in the past, resolves to `now + DEFAULT_RETRY_DELAY_SECS` instead.
pub fn parse_retry_after(raw: &str) -> DateTime<Utc> {
    let raw = raw.trim();
    let now = Utc::now();

    if let Ok(delta_secs) = raw.parse::<i64>() {
        if delta_secs >= 0 {
            return now + chrono::Duration::seconds(delta_secs);
        }
        return fallback(now);
    }

    if let Some(at) = parse_http_date(raw) {
        if at > now {
            return at;
        }
    }

    fallback(now)
}

fn fallback(now: DateTime<Utc>) -> DateTime<Utc> {
    now + chrono::Duration::seconds(DEFAULT_RETRY_DELAY_SECS)
}

/// Try RFC2822 (covers RFC1123's "Sun, 06 Nov 1994 08:49:37 GMT" form), then RFC3339/ISO8601.
fn parse_http_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_seconds_delta() {
        let before = Utc::now();
        let at = parse_retry_after("30");
        assert!(at >= before + chrono::Duration::seconds(29));
        assert!(at <= before + chrono::Duration::seconds(31));
    }

    #[test]
    fn parses_an_rfc2822_absolute_date_in_the_future() {
        let future = Utc::now() + chrono::Duration::seconds(120);
        let header = future.to_rfc2822();
        let at = parse_retry_after(&header);
        let delta = (at - future).num_seconds().abs();
        assert!(delta <= 1, "expected {at} close to {future}");
    }

    #[test]
    fn parses_an_rfc3339_absolute_date_in_the_future() {
        let future = Utc::now() + chrono::Duration::seconds(90);
        let header = future.to_rfc3339();
        let at = parse_retry_after(&header);
        let delta = (at - future).num_seconds().abs();
        assert!(delta <= 1);
    }

    #[test]
    fn a_past_absolute_date_falls_back_to_the_default_delay() {
        let past = Utc::now() - chrono::Duration::seconds(3600);
        let header = past.to_rfc2822();
        let at = parse_retry_after(&header);
        assert!(at > Utc::now());
    }

    #[test]
    fn an_unparseable_value_falls_back_to_the_default_delay() {
        let before = Utc::now();
        let at = parse_retry_after("not a date");
        assert!(at >= before + chrono::Duration::seconds(DEFAULT_RETRY_DELAY_SECS - 1));
    }

    #[test]
    fn a_negative_seconds_delta_falls_back_to_the_default_delay() {
        let before = Utc::now();
        let at = parse_retry_after("-5");
        assert!(at >= before + chrono::Duration::seconds(DEFAULT_RETRY_DELAY_SECS - 1));
    }
}
