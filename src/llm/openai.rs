use crate::llm::provider::{LlmProvider, ProviderConfig, TokenStream};
use crate::llm::types::{LlmError, LlmMessage, LlmRequest, LlmResponse, LlmUsage};
use crate::settings::Settings;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, trace, warn};

pub struct OpenAiProvider {
    client: Client,
    api_key: Option<String>,
    config: ProviderConfig,
}

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: &'static str,
    content: OpenAiContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum OpenAiContent {
    Text(String),
    Parts(Vec<OpenAiContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OpenAiContentPart {
    ImageUrl { image_url: OpenAiImageUrl },
    Text { text: String },
}

#[derive(Debug, Serialize)]
struct OpenAiImageUrl {
    url: String,
    detail: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    model: Option<String>,
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
    total_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    #[serde(default)]
    delta: OpenAiDelta,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiDelta {
    content: Option<String>,
}

impl OpenAiProvider {
    pub fn new(settings: &Settings) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(settings.upstream_timeout)
            .build()?;

        let config =
            ProviderConfig::new("openai", settings.api_base_url.trim_end_matches('/')).with_image_detail("high");

        Ok(Self {
            client,
            api_key: settings.openai_api_key.clone(),
            config,
        })
    }

    fn convert_message(&self, message: &LlmMessage) -> OpenAiMessage {
        let content = if message.has_images() {
            let mut parts: Vec<OpenAiContentPart> = message
                .images
                .iter()
                .map(|image| OpenAiContentPart::ImageUrl {
                    image_url: OpenAiImageUrl {
                        url: image.data_url(),
                        detail: self.config.image_detail.clone(),
                    },
                })
                .collect();
            parts.push(OpenAiContentPart::Text {
                text: message.content.clone(),
            });
            OpenAiContent::Parts(parts)
        } else {
            OpenAiContent::Text(message.content.clone())
        };

        OpenAiMessage {
            role: message.role.as_str(),
            content,
        }
    }

    fn build_request(&self, request: &LlmRequest) -> OpenAiRequest {
        OpenAiRequest {
            model: request.model.clone(),
            messages: request
                .messages
                .iter()
                .map(|msg| self.convert_message(msg))
                .collect(),
            max_tokens: request.max_tokens,
            stream: request.stream,
        }
    }

    async fn send(&self, request: &LlmRequest) -> Result<Response, LlmError> {
        let api_key = request
            .api_key
            .as_deref()
            .or(self.api_key.as_deref())
            .ok_or_else(|| LlmError::AuthenticationFailed("no api_key configured".to_string()))?;

        let openai_request = self.build_request(request);

        info!(
            event = "openai_api_request",
            model = %request.model,
            message_count = request.messages.len(),
            max_tokens = ?request.max_tokens,
            stream = request.stream,
            "Sending request to OpenAI API"
        );

        let url = format!("{}/chat/completions", self.config.api_base_url);
        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&openai_request)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_text = response.text().await.unwrap_or_default();
        let message = extract_api_error_message(&error_text).unwrap_or(error_text);

        error!(
            event = "openai_api_error",
            status_code = %status,
            error_text = %message,
            "OpenAI API request failed"
        );

        Err(match status.as_u16() {
            401 => LlmError::AuthenticationFailed(message),
            _ => LlmError::ApiError {
                status: status.as_u16(),
                message,
            },
        })
    }

    fn convert_response(&self, openai_response: OpenAiResponse) -> Result<LlmResponse, LlmError> {
        let choice = openai_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::ProviderError("No choices in response".to_string()))?;

        let usage = openai_response.usage.map(|u| LlmUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(LlmResponse {
            content: choice.message.content,
            finish_reason: choice.finish_reason,
            usage,
            model: openai_response.model,
        })
    }
}

/// Pull a human-readable message out of an OpenAI error payload.
fn extract_api_error_message(raw: &str) -> Option<String> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let error = value.get("error")?;
    if let Some(message) = error.get("message").and_then(|m| m.as_str()) {
        let code = error
            .get("code")
            .and_then(|c| c.as_str())
            .or_else(|| error.get("type").and_then(|t| t.as_str()));
        return Some(match code {
            Some(code) => format!("{} ({})", message, code),
            None => message.to_string(),
        });
    }
    error.as_str().map(str::to_string)
}

/// Parse one SSE `data:` payload into its content fragment, if any.
fn parse_stream_chunk(raw: &str) -> Result<Option<String>, LlmError> {
    let value: Value = serde_json::from_str(raw)?;

    if value.get("error").is_some() {
        let message = extract_api_error_message(raw)
            .unwrap_or_else(|| "An error occurred during streaming".to_string());
        return Err(LlmError::ProviderError(message));
    }

    let chunk: OpenAiStreamChunk = serde_json::from_value(value)?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty()))
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn has_credentials(&self) -> bool {
        self.api_key.is_some()
    }

    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
        let request = request.with_stream(false);
        let response = self.send(&request).await?;
        let openai_response: OpenAiResponse = response.json().await?;
        self.convert_response(openai_response)
    }

    async fn generate_stream(&self, request: LlmRequest) -> Result<TokenStream, LlmError> {
        let request = request.with_stream(true);
        let response = self.send(&request).await?;
        let events = Box::pin(response.bytes_stream().eventsource());

        let stream = futures::stream::unfold(Some(events), |state| async move {
            let mut events = state?;
            loop {
                match events.next().await {
                    None => {
                        warn!(
                            event = "openai_stream_closed_early",
                            "SSE stream closed before [DONE]"
                        );
                        return Some((
                            Err(LlmError::StreamError(
                                "SSE stream closed before response completed".to_string(),
                            )),
                            None,
                        ));
                    }
                    Some(Err(e)) => {
                        return Some((Err(LlmError::StreamError(e.to_string())), None));
                    }
                    Some(Ok(sse)) => {
                        trace!("OpenAI SSE: {:?}", sse.data);
                        if sse.data == "[DONE]" {
                            return None;
                        }
                        match parse_stream_chunk(&sse.data) {
                            Ok(Some(fragment)) => return Some((Ok(fragment), Some(events))),
                            Ok(None) => continue,
                            Err(e) => return Some((Err(e), None)),
                        }
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }
}
