//! Maps upstream failure responses onto rate-limit reasons. The backend
//! sometimes misreports quota exhaustion as 404, so those are recognized and
//! remapped to 429 by the caller.

use crate::models::RateLimitReason;

const USAGE_PATTERNS: &[&str] = &[
    "usage_limit_reached",
    "usage_not_included",
    "usage limit",
    "exhausted",
    "quota",
];

const RATE_PATTERNS: &[&str] = &[
    "rate_limit",
    "rate limit",
    "too many requests",
    "per minute",
];

pub fn classify(status: u16, body: &str) -> RateLimitReason {
    if status == 503 || status == 529 {
        return RateLimitReason::ServerError;
    }
    let lower = body.to_lowercase();
    if USAGE_PATTERNS.iter().any(|pattern| lower.contains(pattern)) {
        return RateLimitReason::UsageLimitReached;
    }
    if RATE_PATTERNS.iter().any(|pattern| lower.contains(pattern)) {
        return RateLimitReason::RateLimitExceeded;
    }
    RateLimitReason::Unknown
}

/// A 404 whose body matches the usage-limit patterns is a quota event in
/// disguise; a 404 that does not match is a real 404.
pub fn is_misreported_quota_404(status: u16, body: &str) -> bool {
    status == 404 && classify(status, body) == RateLimitReason::UsageLimitReached
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_statuses_win_regardless_of_body() {
        assert_eq!(classify(503, "quota exceeded"), RateLimitReason::ServerError);
        assert_eq!(classify(529, ""), RateLimitReason::ServerError);
    }

    #[test]
    fn usage_patterns_classify_as_usage_limit() {
        let bodies = [
            r#"{"error":{"code":"usage_limit_reached"}}"#,
            r#"{"error":{"code":"usage_not_included"}}"#,
            "Your usage limit was reached for this billing cycle",
            "Resource exhausted",
            "You have run out of quota.",
        ];
        for body in bodies {
            assert_eq!(classify(429, body), RateLimitReason::UsageLimitReached, "{body}");
        }
    }

    #[test]
    fn rate_patterns_classify_as_rate_limit() {
        let bodies = [
            r#"{"error":{"type":"rate_limit_error"}}"#,
            "Rate limit hit, slow down",
            "Too Many Requests",
            "requests per minute cap reached",
        ];
        for body in bodies {
            assert_eq!(classify(429, body), RateLimitReason::RateLimitExceeded, "{body}");
        }
    }

    #[test]
    fn usage_patterns_take_precedence_over_rate_patterns() {
        let body = "usage limit reached; rate limit applies";
        assert_eq!(classify(429, body), RateLimitReason::UsageLimitReached);
    }

    #[test]
    fn empty_or_unmatched_body_is_unknown() {
        assert_eq!(classify(429, ""), RateLimitReason::Unknown);
        assert_eq!(classify(429, "something odd happened"), RateLimitReason::Unknown);
    }

    #[test]
    fn quota_404_detection() {
        assert!(is_misreported_quota_404(
            404,
            r#"{"error":{"code":"usage_limit_reached"}}"#
        ));
        assert!(!is_misreported_quota_404(404, "model not found"));
        assert!(!is_misreported_quota_404(429, "usage limit"));
    }
}
