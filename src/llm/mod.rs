pub mod openai;
pub mod provider;
#[cfg(test)]
pub mod scripted;
pub mod types;

pub use openai::OpenAiProvider;
pub use provider::LlmProvider;
pub use types::{ImageData, LlmError, LlmMessage, LlmRequest};
