use once_cell::sync::Lazy;
use regex::Regex;
use tracing::error;

// Upstream credential failures ("Incorrect API key provided", "invalid_api_key", ...)
pub static CREDENTIAL_FAILURE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)api[_ ]?key|authentication")
        .unwrap_or_else(|e| {
            error!("Failed to compile CREDENTIAL_FAILURE_REGEX: {}", e);
            // Fallback to a very simple pattern that matches nothing
            Regex::new(r"^$").unwrap()
        })
});

// Upstream quota and billing failures
pub static QUOTA_FAILURE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)quota|billing")
        .unwrap_or_else(|e| {
            error!("Failed to compile QUOTA_FAILURE_REGEX: {}", e);
            Regex::new(r"^$").unwrap()
        })
});
