//! In-process provider with scripted behaviour, used by tests in place of the
//! real upstream.

use crate::llm::provider::{LlmProvider, TokenStream};
use crate::llm::types::{LlmError, LlmRequest, LlmResponse, LlmRole};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy)]
pub enum Failure {
    Auth,
    Quota,
    Network,
}

impl Failure {
    pub fn to_error(self) -> LlmError {
        match self {
            Failure::Auth => {
                LlmError::AuthenticationFailed("Incorrect API key provided (invalid_api_key)".to_string())
            }
            Failure::Quota => LlmError::ApiError {
                status: 429,
                message: "You exceeded your current quota (insufficient_quota)".to_string(),
            },
            Failure::Network => LlmError::StreamError("connection reset by peer".to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Script {
    /// Stream these fragments, then finish cleanly.
    Tokens(Vec<&'static str>),
    /// Fail before any fragment is produced.
    FailOnOpen(Failure),
    /// Stream these fragments, then fail.
    FailAfter(Vec<&'static str>, Failure),
    /// Stream these fragments, then never finish.
    Hang(Vec<&'static str>),
    /// Answer like `Tokens`, except never finish for this exact question.
    HangOn(&'static str),
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

pub struct ScriptedProvider {
    script: Script,
    calls: AtomicUsize,
    requests: Mutex<Vec<LlmRequest>>,
    stream_dropped: Arc<AtomicBool>,
}

impl ScriptedProvider {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            stream_dropped: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn stream_dropped(&self) -> bool {
        self.stream_dropped.load(Ordering::SeqCst)
    }

    fn record(&self, request: &LlmRequest) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn has_credentials(&self) -> bool {
        true
    }

    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
        self.record(&request);
        let question = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == LlmRole::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        match &self.script {
            Script::HangOn(stuck) if question == *stuck => futures::future::pending().await,
            Script::Tokens(_) | Script::HangOn(_) => {
                Ok(LlmResponse {
                    content: Some(format!("answer: {}", question)),
                    finish_reason: Some("stop".to_string()),
                    usage: None,
                    model: Some(request.model),
                })
            }
            Script::FailOnOpen(failure) | Script::FailAfter(_, failure) => Err(failure.to_error()),
            Script::Hang(_) => futures::future::pending().await,
        }
    }

    async fn generate_stream(&self, request: LlmRequest) -> Result<TokenStream, LlmError> {
        self.record(&request);
        let guard = DropFlag(Arc::clone(&self.stream_dropped));

        let (fragments, tail): (Vec<&'static str>, TokenStream) = match &self.script {
            Script::Tokens(tokens) => (tokens.clone(), Box::pin(futures::stream::empty())),
            Script::HangOn(_) => (Vec::new(), Box::pin(futures::stream::empty())),
            Script::FailOnOpen(failure) => return Err(failure.to_error()),
            Script::FailAfter(tokens, failure) => (
                tokens.clone(),
                Box::pin(futures::stream::once(futures::future::ready(Err(failure.to_error())))),
            ),
            Script::Hang(tokens) => (tokens.clone(), Box::pin(futures::stream::pending())),
        };

        let stream = futures::stream::iter(fragments.into_iter().map(|t| Ok(t.to_string())))
            .chain(tail)
            .map(move |item| {
                let _alive = &guard;
                item
            });
        Ok(Box::pin(stream))
    }
}
