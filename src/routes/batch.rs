use crate::error::{Result, ValidationError};
use crate::routes::{AppState, admit, form_error, upstream_key};
use crate::services::{BatchItem, BatchOptions, BatchResult};
use axum::Json;
use axum::extract::{ConnectInfo, Multipart, State};
use axum::http::HeaderMap;
use serde::Serialize;
use std::net::SocketAddr;
use tracing::info;

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub results: Vec<BatchResult>,
    pub count: usize,
}

#[derive(Default)]
struct BatchForm {
    images: Vec<(String, Vec<u8>)>,
    questions: Vec<String>,
    question: Option<String>,
    mode: Option<String>,
    project_id: Option<String>,
}

impl BatchForm {
    async fn read(mut multipart: Multipart) -> Result<Self> {
        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await.map_err(form_error)? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "images" => {
                    let filename = field.file_name().unwrap_or_default().to_string();
                    let bytes = field.bytes().await.map_err(form_error)?;
                    form.images.push((filename, bytes.into()));
                }
                "questions" => form.questions.push(field.text().await.map_err(form_error)?),
                "question" => form.question = Some(field.text().await.map_err(form_error)?),
                "mode" => form.mode = Some(field.text().await.map_err(form_error)?),
                "project_id" => {
                    let project = field.text().await.map_err(form_error)?;
                    form.project_id = Some(project.trim().to_string()).filter(|p| !p.is_empty());
                }
                _ => {}
            }
        }
        Ok(form)
    }

    /// Pair each image with the question at the same position, if any.
    fn into_items(self) -> Vec<BatchItem> {
        let mut questions = self.questions.into_iter();
        self.images
            .into_iter()
            .map(|(filename, bytes)| BatchItem {
                bytes,
                filename,
                question: questions.next(),
            })
            .collect()
    }
}

/// `POST /batch`: analyze several images without streaming.
pub async fn batch(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<BatchResponse>> {
    let client = admit(&state, &headers, peer.map(|ConnectInfo(addr)| addr)).await?;
    let form = BatchForm::read(multipart).await?;
    if form.images.is_empty() {
        return Err(ValidationError::NoImages.into());
    }

    let mode = form.mode.clone().unwrap_or_default();
    let options = BatchOptions {
        shared_question: form.question.clone(),
        project_id: form.project_id.clone(),
        api_key: upstream_key(&headers),
    };
    info!(
        event = "batch_accepted",
        client = %client,
        images = form.images.len(),
        "Running batch analysis"
    );

    let results = state.batch.run(&mode, form.into_items(), &options).await;
    Ok(Json(BatchResponse {
        count: results.len(),
        results,
    }))
}

#[cfg(test)]
mod tests {
    use crate::llm::scripted::{Script, ScriptedProvider};
    use crate::routes::router;
    use crate::routes::test_support::{Form, body_json, multipart, state};
    use crate::utils::image_validator::fixtures;
    use axum::http::StatusCode;
    use tower::ServiceExt;

    const CLIENT: (&str, &str) = ("x-forwarded-for", "203.0.113.9");

    #[tokio::test]
    async fn partial_failure_keeps_order() {
        let provider = ScriptedProvider::new(Script::Tokens(vec![]));
        let app = router(state(provider.clone(), None));
        let form = Form::default()
            .file("images", "one.png", fixtures::PNG)
            .file("images", "two.png", &fixtures::oversized_png())
            .file("images", "three.gif", fixtures::GIF)
            .text("questions", "first?")
            .text("question", "shared?")
            .text("mode", "deep");

        let response = app.oneshot(multipart("/batch", form, &[CLIENT])).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["count"], 3);
        let results = json["results"].as_array().unwrap();
        assert_eq!(results[0]["filename"], "one.png");
        assert_eq!(results[0]["question"], "first?");
        assert_eq!(results[0]["mode"], "deep");
        assert!(results[0]["id"].is_string());
        assert_eq!(results[1]["filename"], "two.png");
        assert_eq!(results[1]["error"], "Image too large. Maximum size is 20 MB.");
        assert_eq!(results[2]["question"], "shared?");
        assert_eq!(results[2]["answer"], "answer: shared?");
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let provider = ScriptedProvider::new(Script::Tokens(vec![]));
        let app = router(state(provider, None));

        let response = app
            .oneshot(multipart("/batch", Form::default().text("question", "q"), &[CLIENT]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "No images provided.");
    }

    #[tokio::test]
    async fn batch_is_gated() {
        let provider = ScriptedProvider::new(Script::Tokens(vec![]));
        let app = router(state(provider.clone(), Some("hunter2")));
        let form = Form::default().file("images", "one.png", fixtures::PNG).text("question", "q");

        let response = app
            .oneshot(multipart("/batch", form, &[CLIENT, ("x-forma-key", "wrong")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(provider.calls(), 0);
    }
}
