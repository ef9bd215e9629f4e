use crate::error::ValidationError;
use crate::llm::{LlmError, LlmProvider, LlmRequest};
use crate::services::conversation_builder::ConversationBuilder;
use crate::services::mode_registry::{Mode, ModeRegistry};
use crate::store::{AnalysisRecord, AnalysisStore};
use crate::utils::{ImageValidator, classify_upstream_error};
use chrono::Utc;
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Items analyzed concurrently within one batch.
pub const BATCH_PARALLELISM: usize = 4;

#[derive(Debug, Clone)]
pub struct BatchItem {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub question: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BatchResult {
    Success {
        id: Uuid,
        filename: String,
        question: String,
        answer: String,
        mode: Mode,
    },
    Failure {
        error: String,
        filename: String,
    },
}

impl BatchResult {
    pub fn is_success(&self) -> bool {
        matches!(self, BatchResult::Success { .. })
    }

    fn failure(filename: &str, error: impl Into<String>) -> Self {
        BatchResult::Failure {
            error: error.into(),
            filename: filename.to_string(),
        }
    }
}

/// Request-scoped options shared by every item of a batch.
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    pub shared_question: Option<String>,
    pub project_id: Option<String>,
    pub api_key: Option<String>,
}

pub struct BatchCoordinator {
    provider: Arc<dyn LlmProvider>,
    registry: Arc<ModeRegistry>,
    store: Arc<dyn AnalysisStore>,
    model: String,
    timeout: Duration,
}

impl BatchCoordinator {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        registry: Arc<ModeRegistry>,
        store: Arc<dyn AnalysisStore>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            registry,
            store,
            model: model.into(),
            timeout,
        }
    }

    /// Analyze every item. Results are returned in input order and a failed
    /// item never aborts the others.
    pub async fn run(&self, mode_id: &str, items: Vec<BatchItem>, options: &BatchOptions) -> Vec<BatchResult> {
        let total = items.len();
        let mode = self.registry.resolve(mode_id).name;
        info!(
            event = "batch_started",
            items = total,
            mode = %mode,
            project_id = ?options.project_id,
            "Starting batch analysis"
        );

        let results: Vec<BatchResult> = futures::stream::iter(items)
            .map(|item| self.run_item(mode, item, options))
            .buffered(BATCH_PARALLELISM)
            .collect()
            .await;

        let succeeded = results.iter().filter(|r| r.is_success()).count();
        info!(
            event = "batch_completed",
            items = total,
            succeeded = succeeded,
            failed = total - succeeded,
            "Batch analysis finished"
        );
        results
    }

    async fn run_item(&self, mode: Mode, item: BatchItem, options: &BatchOptions) -> BatchResult {
        let question = item
            .question
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .or_else(|| options.shared_question.as_deref().map(str::trim).filter(|q| !q.is_empty()));
        let Some(question) = question.map(str::to_string) else {
            return BatchResult::failure(&item.filename, ValidationError::MissingQuestion.to_string());
        };

        let asset = match ImageValidator::validate(&item.filename, item.bytes) {
            Ok(asset) => asset,
            Err(e) => {
                warn!(
                    event = "batch_item_rejected",
                    filename = %item.filename,
                    error = %e,
                    "Batch item failed validation"
                );
                return BatchResult::failure(&item.filename, e.to_string());
            }
        };

        let mode_config = self.registry.get(mode);
        let conversation = ConversationBuilder::build(mode_config, Some(asset.to_image_data()), &[], &question);
        let request = LlmRequest::new(&self.model)
            .with_messages(conversation.into_messages())
            .with_max_tokens(mode_config.max_output_tokens)
            .with_api_key(options.api_key.clone());

        let outcome = match tokio::time::timeout(self.timeout, self.provider.generate(request)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(LlmError::Timeout(self.timeout.as_secs())),
        };
        let answer = match outcome {
            Ok(response) => {
                let usage = response.usage.as_ref();
                info!(
                    event = "batch_item_completed",
                    filename = %item.filename,
                    model = ?response.model,
                    finish_reason = ?response.finish_reason,
                    prompt_tokens = ?usage.and_then(|u| u.prompt_tokens),
                    completion_tokens = ?usage.and_then(|u| u.completion_tokens),
                    total_tokens = ?usage.and_then(|u| u.total_tokens),
                    "Upstream answered batch item"
                );
                response.content.unwrap_or_default()
            }
            Err(e) => {
                warn!(
                    event = "batch_item_failed",
                    filename = %item.filename,
                    error = %e,
                    "Upstream call failed for batch item"
                );
                return BatchResult::failure(&item.filename, classify_upstream_error(&e.to_string()));
            }
        };

        let id = Uuid::new_v4();
        let record = AnalysisRecord {
            id,
            filename: item.filename.clone(),
            question: question.clone(),
            answer: answer.clone(),
            mode,
            project_id: options.project_id.clone(),
            created_at: Utc::now(),
        };
        if let Err(e) = self.store.put(record).await {
            warn!(
                event = "batch_store_failed",
                id = %id,
                error = %e,
                "Could not persist batch analysis"
            );
        }

        BatchResult::Success {
            id,
            filename: item.filename,
            question,
            answer,
            mode,
        }
    }
}
