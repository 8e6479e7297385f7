//! HTTP surface.
//!
//! Every action locks the shared [`Controller`] only long enough to issue or
//! settle a ticket; remote calls run with the lock released.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    response::{Html, IntoResponse},
    routing::{delete, get, post},
};
use http::header;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::audio::wav_from_pcm16;
use crate::auth;
use crate::error::AppError;
use crate::models::AnalysisType;
use crate::services::extractor::TextExtractor;
use crate::services::llm::AnalysisBackend;
use crate::services::reader;
use crate::session::{Controller, Snapshot};

/// Largest accepted upload.
const MAX_UPLOAD_BYTES: usize = 200 * 1024 * 1024;
const PDF_MAGIC: &[u8] = b"%PDF";
const UPLOAD_FIELD: &str = "pdf_file";

#[derive(Clone)]
pub struct AppState {
    pub llm_client: Arc<dyn AnalysisBackend>,
    pub extractor: Arc<dyn TextExtractor>,
    pub controller: Arc<Mutex<Controller>>,
    pub allowed_emails: Arc<Vec<String>>,
}

impl AppState {
    pub fn new(
        llm_client: Arc<dyn AnalysisBackend>,
        extractor: Arc<dyn TextExtractor>,
        allowed_emails: Vec<String>,
    ) -> Self {
        Self {
            llm_client,
            extractor,
            controller: Arc::new(Mutex::new(Controller::new())),
            allowed_emails: Arc::new(allowed_emails),
        }
    }

    /// Locks the controller, refusing when nobody is signed in.
    async fn signed_in(&self) -> Result<MutexGuard<'_, Controller>, AppError> {
        let controller = self.controller.lock().await;
        controller.require_user()?;
        Ok(controller)
    }

    /// Checks sign-in and releases the lock straight away.
    async fn require_signed_in(&self) -> Result<(), AppError> {
        self.controller.lock().await.require_user()?;
        Ok(())
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/state", get(current_state))
        .route("/upload", post(upload_pdf))
        .route("/upload/new", post(new_upload))
        .route("/sessions/:id/select", post(select_session))
        .route("/sessions/:id", delete(remove_session))
        .route("/analyze", post(analyze))
        .route("/back", post(back))
        .route("/speech", post(speech))
        .route("/slide", post(slide))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn index() -> Html<String> {
    let analysis_types: String = AnalysisType::ALL
        .iter()
        .map(|t| format!("<li>{}</li>", t.label()))
        .collect();

    let html_content = format!(
        r#"
    <!DOCTYPE html>
    <html>
    <head>
        <title>Chapterwise</title>
        <meta charset="utf-8">
        <style>
            body {{ font-family: Arial, sans-serif; margin: 40px; }}
            .info-box {{ background-color: #f0f8ff; padding: 20px; border-radius: 8px; margin: 20px 0; }}
            .endpoint {{ background-color: #f5f5f5; padding: 10px; margin: 10px 0; border-radius: 4px; font-family: monospace; }}
        </style>
    </head>
    <body>
        <h1>Chapterwise</h1>

        <div class="info-box">
            <h2>Service Information</h2>
            <p>Upload a PDF book, pick a chapter and get an AI-written analysis of it.</p>
            <p>Scanned books are read page by page from the document images.</p>
        </div>

        <h2>Available Endpoints:</h2>
        <div class="endpoint">POST /login - Sign in with an identity token</div>
        <div class="endpoint">GET /state - Current screen, library and chapters</div>
        <div class="endpoint">POST /upload - Upload a PDF (multipart field '{UPLOAD_FIELD}')</div>
        <div class="endpoint">POST /analyze - Analyze one chapter</div>
        <div class="endpoint">POST /speech - Narrate an analysis as WAV audio</div>
        <div class="endpoint">POST /slide - Illustrate an analysis as a slide</div>

        <h2>Analysis Styles:</h2>
        <ul>{analysis_types}</ul>
    </body>
    </html>
    "#
    );

    Html(html_content)
}

async fn health_check() -> &'static str {
    "OK"
}

// ============================================================================
// Sign-in
// ============================================================================

#[derive(Debug, Deserialize)]
struct LoginRequest {
    credential: String,
}

async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<Snapshot>, AppError> {
    let user = auth::authorize(&request.credential, &state.allowed_emails)?;

    let mut controller = state.controller.lock().await;
    controller.sign_in(user);
    Ok(Json(controller.snapshot()))
}

async fn logout(State(state): State<AppState>) -> Json<Snapshot> {
    let mut controller = state.controller.lock().await;
    controller.sign_out();
    Json(controller.snapshot())
}

async fn current_state(State(state): State<AppState>) -> Result<Json<Snapshot>, AppError> {
    let controller = state.signed_in().await?;
    Ok(Json(controller.snapshot()))
}

// ============================================================================
// Library
// ============================================================================

async fn upload_pdf(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Snapshot>, AppError> {
    state.require_signed_in().await?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let file_name = field.file_name().unwrap_or("book.pdf").to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        upload = Some((file_name, data));
        break;
    }

    let (file_name, data) = upload
        .ok_or_else(|| AppError::BadRequest(format!("missing '{UPLOAD_FIELD}' field")))?;
    if !data.starts_with(PDF_MAGIC) {
        return Err(AppError::BadRequest("only PDF files are accepted".to_string()));
    }
    tracing::info!(file_name = %file_name, bytes = data.len(), "received upload");

    let ticket = state.signed_in().await?.begin_upload(&file_name);

    let result = reader::prepare_book(
        state.extractor.clone(),
        state.llm_client.as_ref(),
        &file_name,
        data.to_vec(),
    )
    .await;

    let mut controller = state.controller.lock().await;
    match result {
        Ok(session) => {
            if !controller.finish_upload(ticket, session) {
                return Err(AppError::Superseded);
            }
            Ok(Json(controller.snapshot()))
        }
        Err(err) => {
            controller.fail_upload(ticket, &err);
            Err(err)
        }
    }
}

async fn new_upload(State(state): State<AppState>) -> Result<Json<Snapshot>, AppError> {
    let mut controller = state.signed_in().await?;
    controller.new_upload();
    Ok(Json(controller.snapshot()))
}

async fn select_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Snapshot>, AppError> {
    let mut controller = state.signed_in().await?;
    controller.switch_session(id)?;
    Ok(Json(controller.snapshot()))
}

async fn remove_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Snapshot>, AppError> {
    let mut controller = state.signed_in().await?;
    controller.remove_session(id)?;
    Ok(Json(controller.snapshot()))
}

// ============================================================================
// Analysis
// ============================================================================

#[derive(Debug, Deserialize)]
struct AnalyzeRequest {
    chapter_number: String,
    chapter_title: String,
    analysis_type: AnalysisType,
}

async fn analyze(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Json<Snapshot>, AppError> {
    let job = state.signed_in().await?.begin_analysis(
        &request.chapter_number,
        &request.chapter_title,
        request.analysis_type,
    )?;

    let result = reader::run_analysis(state.llm_client.as_ref(), &job).await;

    let mut controller = state.controller.lock().await;
    match result {
        Ok(content) => {
            if !controller.complete_analysis(job.ticket, content) {
                return Err(AppError::Superseded);
            }
            Ok(Json(controller.snapshot()))
        }
        Err(err) => {
            controller.fail_analysis(&job.ticket, &err);
            Err(err)
        }
    }
}

async fn back(State(state): State<AppState>) -> Result<Json<Snapshot>, AppError> {
    let mut controller = state.signed_in().await?;
    controller.back_to_chapters();
    Ok(Json(controller.snapshot()))
}

// ============================================================================
// Narration and slides
// ============================================================================

#[derive(Debug, Deserialize)]
struct SpeechRequest {
    text: String,
}

async fn speech(
    State(state): State<AppState>,
    Json(request): Json<SpeechRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.require_signed_in().await?;
    if request.text.trim().is_empty() {
        return Err(AppError::BadRequest("nothing to narrate".to_string()));
    }

    let pcm = state
        .llm_client
        .synthesize_speech(&request.text)
        .await
        .map_err(AppError::Speech)?;
    let wav = wav_from_pcm16(&pcm).map_err(AppError::AudioEncoding)?;

    tracing::info!(pcm_bytes = pcm.len(), "narration ready");
    Ok(([(header::CONTENT_TYPE, "audio/wav")], wav))
}

#[derive(Debug, Deserialize)]
struct SlideRequest {
    chapter_title: String,
    analysis: String,
}

#[derive(Debug, Serialize)]
struct SlideResponse {
    data_uri: String,
}

async fn slide(
    State(state): State<AppState>,
    Json(request): Json<SlideRequest>,
) -> Result<Json<SlideResponse>, AppError> {
    state.require_signed_in().await?;

    let image = state
        .llm_client
        .generate_slide(&request.chapter_title, &request.analysis)
        .await
        .map_err(AppError::Slide)?;

    Ok(Json(SlideResponse {
        data_uri: image.data_uri(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chapter, SlideImage};
    use crate::services::extractor::{ExtractError, ExtractedText};
    use crate::services::llm::{ChapterSource, LlmError};
    use async_trait::async_trait;
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode},
    };
    use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    const BOUNDARY: &str = "chapterwise-test-boundary";

    struct FakeExtractor;

    impl TextExtractor for FakeExtractor {
        fn extract(&self, _pdf: &[u8]) -> Result<ExtractedText, ExtractError> {
            let page = "Chapter 1: Opening\n\n".to_string()
                + &"The first pages set the scene in a small town. ".repeat(20)
                + "\n\nChapter 2: Closing\n\n"
                + &"Everything is tied together at the end. ".repeat(20);
            Ok(ExtractedText::from_pages(vec![page]))
        }
    }

    struct FakeBackend;

    #[async_trait]
    impl AnalysisBackend for FakeBackend {
        async fn identify_chapters(
            &self,
            _source: ChapterSource<'_>,
        ) -> Result<Vec<Chapter>, LlmError> {
            Ok(vec![
                Chapter {
                    number: "1".to_string(),
                    title: "Opening".to_string(),
                    description: "The scene is set".to_string(),
                },
                Chapter {
                    number: "2".to_string(),
                    title: "Closing".to_string(),
                    description: "Loose ends".to_string(),
                },
            ])
        }

        async fn analyze_chapter(
            &self,
            title: &str,
            _extracted: Option<&str>,
            analysis: AnalysisType,
            _document: Option<&str>,
        ) -> Result<String, LlmError> {
            Ok(format!("## {} of {title}", analysis.label()))
        }

        async fn synthesize_speech(&self, _text: &str) -> Result<Vec<u8>, LlmError> {
            Ok(vec![0x00, 0x00, 0x00, 0x40])
        }

        async fn generate_slide(
            &self,
            _chapter_title: &str,
            _analysis: &str,
        ) -> Result<SlideImage, LlmError> {
            Ok(SlideImage {
                mime_type: "image/png".to_string(),
                data: "iVBORw0K".to_string(),
            })
        }
    }

    fn app() -> Router {
        router(AppState::new(
            Arc::new(FakeBackend),
            Arc::new(FakeExtractor),
            vec!["reader@example.com".to_string()],
        ))
    }

    fn credential(email: &str) -> String {
        format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256"}"#),
            URL_SAFE_NO_PAD.encode(json!({ "email": email, "name": "Reader" }).to_string())
        )
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn empty_request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    fn upload_request(file_name: &str, contents: &[u8]) -> Request<Body> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{UPLOAD_FIELD}\"; filename=\"{file_name}\"\r\nContent-Type: application/pdf\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(contents);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn signed_in_app() -> Router {
        let app = app();
        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/login",
                json!({ "credential": credential("Reader@example.com") }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        app
    }

    #[tokio::test]
    async fn test_health_and_index_are_public() {
        let app = app();

        let response = app.clone().oneshot(empty_request("GET", "/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(empty_request("GET", "/")).await.unwrap();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(html.contains("Critical Analysis"));
    }

    #[tokio::test]
    async fn test_actions_require_sign_in() {
        let app = app();

        let response = app.clone().oneshot(empty_request("GET", "/state")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error"], "Sign in required");

        let response = app
            .clone()
            .oneshot(json_request("POST", "/speech", json!({ "text": "hi" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/slide",
                json!({ "chapter_title": "Opening", "analysis": "A quiet start." }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(upload_request("novel.pdf", b"%PDF-1.7 fake"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // Sign-in checks must not leave the controller locked.
        let response = app
            .oneshot(json_request(
                "POST",
                "/login",
                json!({ "credential": credential("reader@example.com") }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unlisted_email_is_denied() {
        let response = app()
            .oneshot(json_request(
                "POST",
                "/login",
                json!({ "credential": credential("stranger@example.com") }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_json(response).await["error"], "Access denied");
    }

    #[tokio::test]
    async fn test_upload_then_analyze() {
        let app = signed_in_app().await;

        let response = app
            .clone()
            .oneshot(upload_request("novel.pdf", b"%PDF-1.7 fake"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let snapshot = body_json(response).await;
        assert_eq!(snapshot["view"]["screen"], "chapters");
        assert_eq!(snapshot["chapters"].as_array().unwrap().len(), 2);
        assert_eq!(snapshot["sessions"][0]["file_name"], "novel.pdf");
        assert_eq!(snapshot["is_scanned_mode"], false);

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/analyze",
                json!({
                    "chapter_number": "2",
                    "chapter_title": "Closing",
                    "analysis_type": "insights",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let snapshot = body_json(response).await;
        assert_eq!(snapshot["view"]["screen"], "analysis");
        assert_eq!(snapshot["view"]["content"], "## Key Insights of Closing");

        let response = app.oneshot(empty_request("POST", "/back")).await.unwrap();
        assert_eq!(body_json(response).await["view"]["screen"], "chapters");
    }

    #[tokio::test]
    async fn test_non_pdf_upload_is_rejected() {
        let app = signed_in_app().await;
        let response = app
            .oneshot(upload_request("notes.txt", b"just some text"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_removing_only_book_returns_to_upload() {
        let app = signed_in_app().await;
        let response = app
            .clone()
            .oneshot(upload_request("only.pdf", b"%PDF-1.4"))
            .await
            .unwrap();
        let snapshot = body_json(response).await;
        let id = snapshot["active_session"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(empty_request("DELETE", &format!("/sessions/{id}")))
            .await
            .unwrap();
        let snapshot = body_json(response).await;
        assert_eq!(snapshot["view"]["screen"], "upload");
        assert!(snapshot["sessions"].as_array().unwrap().is_empty());

        let response = app
            .oneshot(empty_request("DELETE", &format!("/sessions/{id}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_speech_is_served_as_wav() {
        let app = signed_in_app().await;
        let response = app
            .oneshot(json_request("POST", "/speech", json!({ "text": "**Hello** there" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/wav");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.starts_with(b"RIFF"));
    }

    #[tokio::test]
    async fn test_slide_returns_data_uri() {
        let app = signed_in_app().await;
        let response = app
            .oneshot(json_request(
                "POST",
                "/slide",
                json!({ "chapter_title": "Opening", "analysis": "A quiet start." }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await["data_uri"],
            "data:image/png;base64,iVBORw0K"
        );
    }
}
