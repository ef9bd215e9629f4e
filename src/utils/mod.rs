pub mod access_gate;
pub mod client_identity;
pub mod image_validator;
pub mod rate_limiter;
pub mod regex_patterns;
pub mod upstream_errors;

pub use access_gate::AccessGate;
pub use client_identity::client_identity;
pub use image_validator::ImageValidator;
pub use rate_limiter::{RateLimiter, create_request_rate_limiter};
pub use upstream_errors::classify_upstream_error;
