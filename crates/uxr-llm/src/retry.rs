use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};

pub const BASE_BACKOFF_MS: u64 = 200;

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(1);
static JITTER_COUNTER: AtomicU64 = AtomicU64::new(1);

pub fn should_retry_status(status: u16) -> bool {
    status == 408 || status == 409 || status == 425 || status == 429 || status >= 500
}

pub fn next_backoff_ms(attempt: usize) -> u64 {
    let shift = attempt.min(6);
    BASE_BACKOFF_MS.saturating_mul(1_u64 << shift)
}

/// Bounded jitter in `[50%, 100%]` of the deterministic backoff. Uses a
/// counter-mixing function rather than a random source, so retries stay
/// reproducible in tests.
pub fn next_backoff_ms_with_jitter(attempt: usize, jitter_enabled: bool) -> u64 {
    let base = next_backoff_ms(attempt);
    if !jitter_enabled || base <= 1 {
        return base;
    }

    let low = base / 2;
    let width = base.saturating_sub(low);
    let seed = JITTER_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mixed = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15).rotate_left(17) ^ 0xA24B_AED4_963E_E407;
    let jitter = if width == 0 { 0 } else { mixed % width.saturating_add(1) };
    low.saturating_add(jitter)
}

/// Parses a raw `Retry-After` header value, accepting either a delta-seconds
/// integer or an RFC 2822 HTTP date.
pub fn parse_retry_after_ms(raw_header_value: &str) -> Option<u64> {
    let raw = raw_header_value.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(seconds.saturating_mul(1000));
    }
    let retry_at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    let delay_ms = retry_at.signed_duration_since(Utc::now()).num_milliseconds();
    if delay_ms <= 0 {
        return Some(0);
    }
    u64::try_from(delay_ms).ok()
}

/// The LLM-client's jittered backoff for rate-limit responses (§5): the
/// larger of the computed backoff and any server-provided retry-after floor.
pub fn provider_retry_delay_ms(attempt: usize, jitter_enabled: bool, retry_after_ms: Option<u64>) -> u64 {
    let backoff_ms = next_backoff_ms_with_jitter(attempt, jitter_enabled);
    match retry_after_ms {
        Some(retry_after_ms) => backoff_ms.max(retry_after_ms),
        None => backoff_ms,
    }
}

pub fn retry_budget_allows_delay(elapsed_ms: u64, delay_ms: u64, retry_budget_ms: u64) -> bool {
    if retry_budget_ms == 0 {
        return true;
    }
    elapsed_ms.saturating_add(delay_ms) <= retry_budget_ms
}

/// Caps a jittered backoff sequence at `cap_ms`, matching the Navigator's
/// "1s -> 30s cap" rate-limit backoff requirement.
pub fn capped_backoff_ms(attempt: usize, jitter_enabled: bool, floor_ms: u64, cap_ms: u64) -> u64 {
    floor_ms
        .max(next_backoff_ms_with_jitter(attempt, jitter_enabled))
        .min(cap_ms)
}

pub fn new_request_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let count = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("uxr-{millis}-{count}")
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn retry_status_selection_is_correct() {
        assert!(should_retry_status(429));
        assert!(should_retry_status(503));
        assert!(!should_retry_status(400));
        assert!(!should_retry_status(404));
    }

    #[test]
    fn backoff_increases_per_attempt() {
        assert_eq!(next_backoff_ms(0), 200);
        assert_eq!(next_backoff_ms(1), 400);
        assert_eq!(next_backoff_ms(2), 800);
    }

    #[test]
    fn jittered_backoff_stays_within_expected_bounds() {
        let attempt = 3;
        let base = next_backoff_ms(attempt);
        let low = base / 2;
        for _ in 0..64 {
            let value = next_backoff_ms_with_jitter(attempt, true);
            assert!(value >= low, "expected {value} >= {low}");
            assert!(value <= base, "expected {value} <= {base}");
        }
    }

    #[test]
    fn unit_parse_retry_after_ms_accepts_seconds_and_rejects_invalid_values() {
        assert_eq!(parse_retry_after_ms("3"), Some(3_000));
        assert_eq!(parse_retry_after_ms("not-a-number"), None);
        assert_eq!(parse_retry_after_ms(""), None);
    }

    #[test]
    fn functional_parse_retry_after_ms_accepts_http_dates() {
        let raw = (Utc::now() + Duration::seconds(2)).to_rfc2822().replace("+0000", "GMT");
        let delay = parse_retry_after_ms(&raw).expect("delay from date");
        assert!(delay <= 2_500, "delay should be close to 2s, got {delay}");
        assert!(delay >= 500, "delay should be positive and non-trivial, got {delay}");
    }

    #[test]
    fn regression_provider_retry_delay_honors_retry_after_floor() {
        assert_eq!(provider_retry_delay_ms(0, false, None), 200);
        assert_eq!(provider_retry_delay_ms(2, false, Some(100)), 800);
        assert_eq!(provider_retry_delay_ms(0, false, Some(1_500)), 1_500);
    }

    #[test]
    fn retry_budget_math_respects_zero_and_bounded_budgets() {
        assert!(retry_budget_allows_delay(50, 100, 0));
        assert!(retry_budget_allows_delay(50, 50, 100));
        assert!(!retry_budget_allows_delay(50, 60, 100));
    }

    #[test]
    fn functional_capped_backoff_respects_floor_and_cap() {
        assert_eq!(capped_backoff_ms(0, false, 1_000, 30_000), 1_000);
        assert_eq!(capped_backoff_ms(10, false, 1_000, 30_000), 30_000);
    }

    #[test]
    fn request_ids_are_unique() {
        let a = new_request_id();
        let b = new_request_id();
        assert_ne!(a, b);
        assert!(a.starts_with("uxr-"));
    }
}
