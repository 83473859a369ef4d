//! Quota detection for Gemini API responses
//!
//! Decides which upstream failures should quarantine a key. Only quota and
//! rate-limit class errors count — a 500 from the model backend says nothing
//! about the key itself, so the pool takes no action for those.

/// Classification of an upstream error for pool purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Quota or rate limit exhausted — quarantine the key and fail over
    QuotaExceeded,
    /// Anything else — retry/report upstream, no pool action
    Transient,
}

/// Quota exhaustion phrases in Gemini error bodies.
///
/// `RESOURCE_EXHAUSTED` is the canonical gRPC status Gemini reports for both
/// per-minute rate limits and daily quota. Billing-quota failures sometimes
/// arrive as 403 with a quota message instead.
const QUOTA_PATTERNS: &[&str] = &[
    "resource_exhausted",
    "quota",
    "rate limit",
    "rate-limit",
    "ratelimit",
];

/// Classify an upstream error by HTTP status and response body.
///
/// 429 is always quota-class for Gemini. 403 and 400 are quota-class only
/// when the body carries a known quota phrase. A malformed request or a
/// genuinely revoked key is not something a cooldown fixes, so those stay
/// Transient and the pool is left alone.
pub fn classify_status(status: u16, body: &str) -> ErrorClass {
    match status {
        429 => ErrorClass::QuotaExceeded,
        400 | 403 => classify_body(body),
        _ => ErrorClass::Transient,
    }
}

/// Check a response body for known quota exhaustion phrases.
fn classify_body(body: &str) -> ErrorClass {
    let lower = body.to_lowercase();
    for pattern in QUOTA_PATTERNS {
        if lower.contains(pattern) {
            return ErrorClass::QuotaExceeded;
        }
    }
    ErrorClass::Transient
}
