use crate::llm::{LlmError, LlmProvider, LlmRequest};
use crate::services::conversation_builder::Conversation;
use crate::services::mode_registry::ModeConfig;
use crate::utils::classify_upstream_error;
use futures::{Stream, StreamExt};
use serde_json::json;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Events buffered between the upstream task and the consumer.
const RELAY_BUFFER: usize = 64;

/// One client-visible increment of a streamed analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Token(String),
    Done,
    Error(String),
}

impl StreamEvent {
    /// Payload for the SSE `data:` line.
    pub fn to_sse_data(&self) -> String {
        match self {
            StreamEvent::Token(text) => json!({ "token": text }).to_string(),
            StreamEvent::Done => "[DONE]".to_string(),
            StreamEvent::Error(message) => json!({ "error": message }).to_string(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Token(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayPhase {
    Idle,
    Streaming,
    Completed,
    Failed,
}

struct PendingCall {
    provider: Arc<dyn LlmProvider>,
    request: LlmRequest,
    timeout: Duration,
}

enum RelayState {
    Idle(PendingCall),
    Streaming(mpsc::Receiver<StreamEvent>),
    Completed,
    Failed,
}

/// Opens streaming upstream calls and exposes them as [`RelayStream`]s.
#[derive(Clone)]
pub struct StreamRelay {
    provider: Arc<dyn LlmProvider>,
    model: String,
    timeout: Duration,
}

impl StreamRelay {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            provider,
            model: model.into(),
            timeout,
        }
    }

    pub fn stream(&self, conversation: Conversation, mode: &ModeConfig) -> RelayStream {
        let request = LlmRequest::new(&self.model)
            .with_messages(conversation.into_messages())
            .with_max_tokens(mode.max_output_tokens)
            .with_stream(true);

        RelayStream {
            state: RelayState::Idle(PendingCall {
                provider: Arc::clone(&self.provider),
                request,
                timeout: self.timeout,
            }),
            cancel: CancellationToken::new(),
        }
    }
}

/// Lazy, single-use sequence of [`StreamEvent`]s.
///
/// The upstream call starts on the first poll. It ends with exactly one
/// `Done` or `Error`. Dropping the stream or calling [`RelayStream::cancel`]
/// cancels the upstream call.
pub struct RelayStream {
    state: RelayState,
    cancel: CancellationToken,
}

impl RelayStream {
    /// Use a per-request upstream credential. Ignored once the call has started.
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        if let RelayState::Idle(call) = &mut self.state {
            call.request.api_key = api_key.filter(|key| !key.is_empty());
        }
        self
    }

    pub fn phase(&self) -> RelayPhase {
        match self.state {
            RelayState::Idle(_) => RelayPhase::Idle,
            RelayState::Streaming(_) => RelayPhase::Streaming,
            RelayState::Completed => RelayPhase::Completed,
            RelayState::Failed => RelayPhase::Failed,
        }
    }

    /// Stop the upstream call. No further events are produced.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        if !matches!(self.state, RelayState::Completed) {
            self.state = RelayState::Failed;
        }
    }

    fn start(&mut self) {
        let state = std::mem::replace(&mut self.state, RelayState::Failed);
        if let RelayState::Idle(call) = state {
            let (tx, rx) = mpsc::channel(RELAY_BUFFER);
            tokio::spawn(drive(call, tx, self.cancel.clone()));
            self.state = RelayState::Streaming(rx);
        } else {
            self.state = state;
        }
    }
}

impl Stream for RelayStream {
    type Item = StreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StreamEvent>> {
        let this = self.get_mut();
        if matches!(this.state, RelayState::Idle(_)) {
            this.start();
        }

        let RelayState::Streaming(rx) = &mut this.state else {
            return Poll::Ready(None);
        };

        match rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_terminal() {
                    this.state = if event == StreamEvent::Done {
                        RelayState::Completed
                    } else {
                        RelayState::Failed
                    };
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                this.state = RelayState::Failed;
                if this.cancel.is_cancelled() {
                    Poll::Ready(None)
                } else {
                    Poll::Ready(Some(StreamEvent::Error(
                        "Upstream stream ended unexpectedly".to_string(),
                    )))
                }
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for RelayStream {
    fn drop(&mut self) {
        let phase = self.phase();
        if phase == RelayPhase::Streaming {
            debug!(
                event = "stream_relay_dropped",
                phase = ?phase,
                "Consumer dropped an open stream"
            );
        }
        self.cancel();
    }
}

/// Forward fragments as they arrive. Returns false if the consumer went away.
async fn forward_tokens(
    provider: Arc<dyn LlmProvider>,
    request: LlmRequest,
    tx: &mpsc::Sender<StreamEvent>,
    fragments: &mut usize,
) -> Result<bool, LlmError> {
    let mut stream = provider.generate_stream(request).await?;
    while let Some(fragment) = stream.next().await {
        let fragment = fragment?;
        *fragments += 1;
        if tx.send(StreamEvent::Token(fragment)).await.is_err() {
            return Ok(false);
        }
    }
    Ok(true)
}

async fn drive(call: PendingCall, tx: mpsc::Sender<StreamEvent>, cancel: CancellationToken) {
    let started = Instant::now();
    let deadline = started + call.timeout;
    let timeout_secs = call.timeout.as_secs();
    let mut fragments = 0usize;

    info!(
        event = "stream_relay_started",
        provider = call.provider.name(),
        model = %call.request.model,
        message_count = call.request.messages.len(),
        max_tokens = ?call.request.max_tokens,
        "Opening upstream stream"
    );

    let outcome = tokio::select! {
        _ = cancel.cancelled() => {
            info!(
                event = "stream_relay_cancelled",
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Client went away, upstream call cancelled"
            );
            return;
        }
        outcome = tokio::time::timeout_at(
            deadline,
            forward_tokens(call.provider, call.request, &tx, &mut fragments),
        ) => outcome,
    };

    let terminal = match outcome {
        Ok(Ok(true)) => {
            info!(
                event = "stream_relay_completed",
                fragments = fragments,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Upstream stream completed"
            );
            StreamEvent::Done
        }
        Ok(Ok(false)) => return,
        Ok(Err(e)) => {
            warn!(
                event = "stream_relay_failed",
                error = %e,
                fragments = fragments,
                "Upstream stream failed"
            );
            StreamEvent::Error(classify_upstream_error(&e.to_string()))
        }
        Err(_) => {
            let e = LlmError::Timeout(timeout_secs);
            warn!(
                event = "stream_relay_timeout",
                timeout_secs = timeout_secs,
                fragments = fragments,
                "Upstream stream exceeded its deadline"
            );
            StreamEvent::Error(classify_upstream_error(&e.to_string()))
        }
    };

    let _ = tx.send(terminal).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::scripted::{Failure, Script, ScriptedProvider};
    use crate::llm::ImageData;
    use crate::llm::types::LlmRole;
    use crate::services::conversation_builder::{ConversationBuilder, ConversationTurn};
    use crate::services::mode_registry::ModeRegistry;
    use crate::utils::upstream_errors::{CREDENTIAL_ERROR_MESSAGE, QUOTA_ERROR_MESSAGE};

    fn relay(provider: Arc<ScriptedProvider>, timeout: Duration) -> StreamRelay {
        StreamRelay::new(provider, "gpt-4o", timeout)
    }

    fn conversation(registry: &ModeRegistry) -> Conversation {
        let image = ImageData {
            base64_data: "R0lGODlhAQABAA==".to_string(),
            mime_type: "image/gif".to_string(),
        };
        ConversationBuilder::build(registry.resolve("deep"), Some(image), &[], "how tall is it")
    }

    async fn collect(stream: RelayStream) -> Vec<StreamEvent> {
        stream.collect().await
    }

    #[tokio::test]
    async fn success_emits_tokens_in_order_then_one_done() {
        let provider = ScriptedProvider::new(Script::Tokens(vec!["1. ", "The beam ", "is 3m."]));
        let registry = ModeRegistry::new();
        let stream = relay(provider.clone(), Duration::from_secs(60))
            .stream(conversation(&registry), registry.resolve("deep"));

        assert_eq!(
            collect(stream).await,
            vec![
                StreamEvent::Token("1. ".into()),
                StreamEvent::Token("The beam ".into()),
                StreamEvent::Token("is 3m.".into()),
                StreamEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn empty_completion_still_emits_done() {
        let provider = ScriptedProvider::new(Script::Tokens(vec![]));
        let registry = ModeRegistry::new();
        let stream = relay(provider, Duration::from_secs(60))
            .stream(conversation(&registry), registry.resolve("deep"));
        assert_eq!(collect(stream).await, vec![StreamEvent::Done]);
    }

    #[tokio::test]
    async fn call_is_lazy_and_carries_mode_budget() {
        let provider = ScriptedProvider::new(Script::Tokens(vec!["ok"]));
        let registry = ModeRegistry::new();
        let expert = registry.resolve("expert");
        let mut stream = relay(provider.clone(), Duration::from_secs(60))
            .stream(conversation(&registry), expert)
            .with_api_key(Some("sk-client".to_string()));

        assert_eq!(stream.phase(), RelayPhase::Idle);
        tokio::task::yield_now().await;
        assert_eq!(provider.calls(), 0);

        assert_eq!(stream.next().await, Some(StreamEvent::Token("ok".into())));
        assert_eq!(stream.phase(), RelayPhase::Streaming);
        assert_eq!(stream.next().await, Some(StreamEvent::Done));
        assert_eq!(stream.phase(), RelayPhase::Completed);
        assert_eq!(stream.next().await, None);

        let request = &provider.requests()[0];
        assert_eq!(request.max_tokens, Some(expert.max_output_tokens));
        assert_eq!(request.model, "gpt-4o");
        assert!(request.stream);
        assert_eq!(request.api_key.as_deref(), Some("sk-client"));
        assert_eq!(request.messages.len(), 2);
    }

    #[tokio::test]
    async fn full_history_reaches_upstream() {
        let provider = ScriptedProvider::new(Script::Tokens(vec!["ok"]));
        let registry = ModeRegistry::new();
        let history = vec![ConversationTurn::user("what is this"), ConversationTurn::assistant("a beam")];
        let conversation = ConversationBuilder::build(registry.resolve("deep"), None, &history, "how tall is it");

        let stream = relay(provider.clone(), Duration::from_secs(60)).stream(conversation, registry.resolve("deep"));
        collect(stream).await;

        let roles: Vec<LlmRole> = provider.requests()[0].messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![LlmRole::System, LlmRole::User, LlmRole::Assistant, LlmRole::User]);
    }

    #[tokio::test]
    async fn auth_failure_emits_single_normalized_error() {
        let provider = ScriptedProvider::new(Script::FailOnOpen(Failure::Auth));
        let registry = ModeRegistry::new();
        let stream = relay(provider, Duration::from_secs(60))
            .stream(conversation(&registry), registry.resolve("deep"));

        assert_eq!(
            collect(stream).await,
            vec![StreamEvent::Error(CREDENTIAL_ERROR_MESSAGE.to_string())]
        );
    }

    #[tokio::test]
    async fn mid_stream_failure_ends_with_error_and_no_done() {
        let provider = ScriptedProvider::new(Script::FailAfter(vec!["Step 1"], Failure::Quota));
        let registry = ModeRegistry::new();
        let mut stream = relay(provider, Duration::from_secs(60))
            .stream(conversation(&registry), registry.resolve("deep"));

        assert_eq!(stream.next().await, Some(StreamEvent::Token("Step 1".into())));
        assert_eq!(
            stream.next().await,
            Some(StreamEvent::Error(QUOTA_ERROR_MESSAGE.to_string()))
        );
        assert_eq!(stream.phase(), RelayPhase::Failed);
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn other_failures_pass_through_raw() {
        let provider = ScriptedProvider::new(Script::FailOnOpen(Failure::Network));
        let registry = ModeRegistry::new();
        let stream = relay(provider, Duration::from_secs(60))
            .stream(conversation(&registry), registry.resolve("deep"));

        assert_eq!(
            collect(stream).await,
            vec![StreamEvent::Error("Stream error: connection reset by peer".to_string())]
        );
    }

    #[tokio::test]
    async fn deadline_turns_into_error_event() {
        let provider = ScriptedProvider::new(Script::Hang(vec!["partial"]));
        let registry = ModeRegistry::new();
        let stream = relay(provider, Duration::from_millis(50))
            .stream(conversation(&registry), registry.resolve("deep"));

        let events = collect(stream).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], StreamEvent::Token("partial".into()));
        assert!(matches!(&events[1], StreamEvent::Error(m) if m.contains("timed out")));
    }

    #[tokio::test]
    async fn dropping_the_stream_cancels_upstream() {
        let provider = ScriptedProvider::new(Script::Hang(vec!["partial"]));
        let registry = ModeRegistry::new();
        let mut stream = relay(provider.clone(), Duration::from_secs(60))
            .stream(conversation(&registry), registry.resolve("deep"));

        assert_eq!(stream.next().await, Some(StreamEvent::Token("partial".into())));
        drop(stream);

        for _ in 0..50 {
            if provider.stream_dropped() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(provider.stream_dropped());
    }

    #[tokio::test]
    async fn explicit_cancel_stops_events() {
        let provider = ScriptedProvider::new(Script::Hang(vec!["partial"]));
        let registry = ModeRegistry::new();
        let mut stream = relay(provider, Duration::from_secs(60))
            .stream(conversation(&registry), registry.resolve("deep"));

        assert_eq!(stream.next().await, Some(StreamEvent::Token("partial".into())));
        stream.cancel();
        assert_eq!(stream.phase(), RelayPhase::Failed);
        assert_eq!(stream.next().await, None);
    }

    #[test]
    fn sse_payloads_match_wire_format() {
        assert_eq!(StreamEvent::Token("a \"b\"".into()).to_sse_data(), r#"{"token":"a \"b\""}"#);
        assert_eq!(StreamEvent::Done.to_sse_data(), "[DONE]");
        assert_eq!(StreamEvent::Error("boom".into()).to_sse_data(), r#"{"error":"boom"}"#);
        assert!(StreamEvent::Done.is_terminal());
        assert!(!StreamEvent::Token(String::new()).is_terminal());
    }
}
