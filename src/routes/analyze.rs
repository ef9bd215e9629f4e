use crate::error::{Result, ValidationError};
use crate::routes::{AppState, admit, form_error, upstream_key};
use crate::services::ConversationBuilder;
use crate::utils::ImageValidator;
use axum::body::Bytes;
use axum::extract::{ConnectInfo, Multipart, State};
use axum::http::{HeaderMap, HeaderName, header};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use std::convert::Infallible;
use std::net::SocketAddr;
use tracing::{debug, info};

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

#[derive(Default)]
struct AnalyzeForm {
    image: Option<(String, Bytes)>,
    question: Option<String>,
    mode: Option<String>,
    history: Option<String>,
}

impl AnalyzeForm {
    async fn read(mut multipart: Multipart) -> Result<Self> {
        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await.map_err(form_error)? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "image" => {
                    let filename = field.file_name().unwrap_or_default().to_string();
                    let bytes = field.bytes().await.map_err(form_error)?;
                    form.image = Some((filename, bytes));
                }
                "question" => form.question = Some(field.text().await.map_err(form_error)?),
                "mode" => form.mode = Some(field.text().await.map_err(form_error)?),
                "history" => form.history = Some(field.text().await.map_err(form_error)?),
                _ => {}
            }
        }
        Ok(form)
    }
}

/// `POST /analyze`: validate, then stream the answer as server-sent events.
///
/// Everything up to the first event is checked synchronously and fails with
/// a JSON error. Once the stream has started, upstream failures arrive as a
/// single `{"error": ...}` event.
pub async fn analyze(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Response> {
    let client = admit(&state, &headers, peer.map(|ConnectInfo(addr)| addr)).await?;
    let form = AnalyzeForm::read(multipart).await?;

    let (filename, bytes) = form.image.ok_or(ValidationError::MissingImage)?;
    if filename.is_empty() {
        return Err(ValidationError::EmptyFilename.into());
    }
    let asset = ImageValidator::validate(&filename, bytes)?;

    let question = form
        .question
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or(ValidationError::MissingQuestion)?;
    let history = ConversationBuilder::parse_history(form.history.as_deref())?;
    let mode = state.modes.resolve(form.mode.as_deref().unwrap_or_default());

    info!(
        event = "analyze_accepted",
        client = %client,
        mode = %mode.name,
        model = %state.settings.model,
        history_turns = history.len(),
        image_bytes = asset.bytes.len(),
        image_extension = %asset.declared_extension,
        "Streaming analysis"
    );

    let conversation = ConversationBuilder::build(mode, Some(asset.to_image_data()), &history, question);
    debug!(
        event = "conversation_built",
        client = %client,
        message_count = conversation.messages().len(),
        "Conversation assembled"
    );
    let events = state
        .relay
        .stream(conversation, mode)
        .with_api_key(upstream_key(&headers))
        .map(|event| Ok::<_, Infallible>(Event::default().data(event.to_sse_data())));

    Ok((
        [(header::CACHE_CONTROL, "no-cache"), (X_ACCEL_BUFFERING, "no")],
        Sse::new(events),
    )
        .into_response())
}
