use crucible_types::ErrorCategory;

/// Ordered pattern list; order matters per §4.4 ("Network before Timeout,
/// RateLimit before Provider, etc."). Each category is tried in turn and
/// the first case-insensitive substring hit wins.
const PATTERNS: &[(ErrorCategory, &[&str])] = &[
    (
        ErrorCategory::RateLimit,
        &[
            "rate limit",
            "429",
            "too many requests",
            "quota exceeded",
            "insufficient_quota",
            "key limit exceeded",
        ],
    ),
    (
        ErrorCategory::Network,
        &[
            "connection refused",
            "connection reset",
            "dns",
            "network unreachable",
            "econnrefused",
        ],
    ),
    (
        ErrorCategory::Timeout,
        &["timeout", "timed out", "deadline exceeded"],
    ),
    (
        ErrorCategory::Streaming,
        &["stream", "sse", "chunk decode"],
    ),
    (
        ErrorCategory::Session,
        &["session", "conversation not found"],
    ),
    (
        ErrorCategory::Process,
        &["process exited", "child process", "spawn failed"],
    ),
    (
        ErrorCategory::Provider,
        &["provider error", "503", "502", "bad gateway", "service unavailable", "upstream"],
    ),
    (
        ErrorCategory::Configuration,
        &["invalid config", "missing api key", "configuration"],
    ),
    (ErrorCategory::Memory, &["out of memory", "oom"]),
    (
        ErrorCategory::Permission,
        &["permission denied", "unauthorized", "forbidden", "403"],
    ),
];

/// Maps any error message into a category by ordered case-insensitive
/// substring match (§4.4). A `NoSuitableProvider` error is surfaced as
/// `Configuration` by callers, not by this function (it never sees that
/// message).
pub fn classify(message: &str) -> ErrorCategory {
    let lower = message.to_lowercase();
    for (category, patterns) in PATTERNS {
        if patterns.iter().any(|p| lower.contains(p)) {
            return *category;
        }
    }
    ErrorCategory::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_before_provider() {
        // Contains both a provider-ish phrase and a rate-limit phrase;
        // RateLimit must win because it's checked first.
        assert_eq!(
            classify("provider error: HTTP 429 rate limit exceeded"),
            ErrorCategory::RateLimit
        );
    }

    #[test]
    fn network_before_timeout() {
        assert_eq!(
            classify("network unreachable while waiting, request timed out"),
            ErrorCategory::Network
        );
    }

    #[test]
    fn unknown_when_nothing_matches() {
        assert_eq!(classify("the cat sat on the mat"), ErrorCategory::Unknown);
    }

    #[test]
    fn case_insensitive() {
        assert_eq!(classify("RATE LIMIT HIT"), ErrorCategory::RateLimit);
    }
}
