use crate::utils::regex_patterns::{CREDENTIAL_FAILURE_REGEX, QUOTA_FAILURE_REGEX};

pub const CREDENTIAL_ERROR_MESSAGE: &str =
    "Invalid or missing OpenAI API key. Check the OPENAI_API_KEY setting.";

pub const QUOTA_ERROR_MESSAGE: &str = "OpenAI quota exceeded. Check your account billing.";

/// Turn a raw upstream failure description into the message shown to clients.
///
/// Credential failures take precedence over quota failures; anything else is
/// passed through unchanged.
pub fn classify_upstream_error(raw: &str) -> String {
    if CREDENTIAL_FAILURE_REGEX.is_match(raw) {
        CREDENTIAL_ERROR_MESSAGE.to_string()
    } else if QUOTA_FAILURE_REGEX.is_match(raw) {
        QUOTA_ERROR_MESSAGE.to_string()
    } else {
        raw.to_string()
    }
}
