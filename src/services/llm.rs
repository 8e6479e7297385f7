use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::config::LlmConfig;
use crate::models::{AnalysisType, Chapter, SlideImage};
use crate::services::narration;

/// Characters of extracted text sent for chapter identification.
pub const IDENTIFY_TEXT_CHARS: usize = 60_000;
/// Extracted chapter text shorter than this goes down the visual path.
pub const MIN_ANALYSIS_CHARS: usize = 100;
/// Characters of analysis embedded in a slide prompt.
pub const SLIDE_EXCERPT_CHARS: usize = 500;
pub const SLIDE_ASPECT_RATIO: &str = "16:9";
const PDF_MIME: &str = "application/pdf";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("no chapters identified")]
    NoChapters,

    #[error("not enough content to analyze")]
    InsufficientContent,

    #[error("response contained no audio")]
    MissingAudio,

    #[error("response contained no image")]
    MissingImage,

    #[error("invalid base64 payload: {0}")]
    Decode(#[from] base64::DecodeError),
}

/// What chapter identification looks at.
#[derive(Debug, Clone, Copy)]
pub enum ChapterSource<'a> {
    /// Extracted text; only the first [`IDENTIFY_TEXT_CHARS`] are sent.
    Text(&'a str),
    /// Base64 PDF bytes, read visually by the model.
    Document(&'a str),
}

/// The remote model operations the app depends on.
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    async fn identify_chapters(&self, source: ChapterSource<'_>) -> Result<Vec<Chapter>, LlmError>;

    async fn analyze_chapter(
        &self,
        title: &str,
        extracted: Option<&str>,
        analysis: AnalysisType,
        document: Option<&str>,
    ) -> Result<String, LlmError>;

    /// Returns raw 16-bit little-endian mono PCM at 24 kHz.
    async fn synthesize_speech(&self, text: &str) -> Result<Vec<u8>, LlmError>;

    async fn generate_slide(&self, chapter_title: &str, analysis: &str)
    -> Result<SlideImage, LlmError>;
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

impl Part {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    fn pdf(base64: &str) -> Self {
        Self {
            inline_data: Some(InlineData {
                mime_type: PDF_MIME.to_string(),
                data: base64.to_string(),
            }),
            ..Default::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_modalities: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_config: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub content: Content,
}

impl GenerateContentResponse {
    fn parts(&self) -> impl Iterator<Item = &Part> {
        self.candidates.iter().flat_map(|c| c.content.parts.iter())
    }

    /// All text parts joined, or `None` when there is no non-blank text.
    pub fn text(&self) -> Option<String> {
        let text: String = self.parts().filter_map(|p| p.text.as_deref()).collect();
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }

    pub fn inline_data(&self) -> Option<&InlineData> {
        self.parts().find_map(|p| p.inline_data.as_ref())
    }
}

// ============================================================================
// Request shaping
// ============================================================================

fn single_turn(parts: Vec<Part>, generation_config: Option<GenerationConfig>) -> GenerateContentRequest {
    GenerateContentRequest {
        contents: vec![Content {
            role: Some("user".to_string()),
            parts,
        }],
        generation_config,
    }
}

fn prefix_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => &text[..cut],
        None => text,
    }
}

pub fn identify_request(source: ChapterSource<'_>) -> GenerateContentRequest {
    let instructions = "Identify the chapters of this book. For each chapter return its number \
        exactly as printed (for example \"1\", \"IV\" or \"Prologue\"), its title exactly as it \
        appears in the book's headings, and a one-sentence description of what it covers. Skip \
        front matter such as the copyright page, table of contents and acknowledgements. \
        Return the chapters in reading order.";

    let parts = match source {
        ChapterSource::Document(pdf) => vec![
            Part::pdf(pdf),
            Part::text(format!(
                "{instructions} The document may be scanned; read the page images directly."
            )),
        ],
        ChapterSource::Text(text) => vec![Part::text(format!(
            "{instructions}\n\nBook text:\n{}",
            prefix_chars(text, IDENTIFY_TEXT_CHARS)
        ))],
    };

    let schema = json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "number": { "type": "STRING" },
                "title": { "type": "STRING" },
                "description": { "type": "STRING" }
            },
            "required": ["number", "title", "description"]
        }
    });

    single_turn(
        parts,
        Some(GenerationConfig {
            temperature: Some(0.1),
            response_mime_type: Some("application/json".to_string()),
            response_schema: Some(schema),
            ..Default::default()
        }),
    )
}

pub fn analysis_prompt(analysis: AnalysisType, title: &str) -> String {
    match analysis {
        AnalysisType::Standard => format!(
            "Write a clear summary of the chapter \"{title}\". Open with a two-sentence overview, \
             then cover the main events or arguments in order, and close with why the chapter \
             matters to the book as a whole. Use markdown headings and short paragraphs."
        ),
        AnalysisType::Detailed => format!(
            "Produce a detailed, section-by-section breakdown of the chapter \"{title}\". For each \
             section give a heading, the key points as a bulleted list, and any important quotes \
             as blockquotes. Finish with a list of terms or names a reader should remember."
        ),
        AnalysisType::Insights => format!(
            "Extract the key insights from the chapter \"{title}\". List the five to eight most \
             important ideas, each with a bold one-line statement followed by a short explanation \
             and a practical takeaway the reader can apply."
        ),
        AnalysisType::Critical => format!(
            "Write a critical analysis of the chapter \"{title}\". Assess the strength of its \
             arguments or storytelling, point out assumptions, gaps and counterpoints, and compare \
             it with other perspectives where relevant. Use markdown headings for each part of \
             the critique."
        ),
    }
}

pub fn analysis_request(
    title: &str,
    extracted: Option<&str>,
    analysis: AnalysisType,
    document: Option<&str>,
) -> Result<GenerateContentRequest, LlmError> {
    let instructions = analysis_prompt(analysis, title);
    let text = extracted.filter(|text| text.trim().chars().count() >= MIN_ANALYSIS_CHARS);

    let parts = match (text, document) {
        (Some(text), _) => vec![Part::text(format!(
            "{instructions}\n\nChapter text:\n{text}"
        ))],
        (None, Some(pdf)) => vec![
            Part::pdf(pdf),
            Part::text(format!(
                "{instructions}\n\nThe full book is attached. Find the chapter titled \"{title}\" \
                 by reading the pages, and base the analysis only on that chapter."
            )),
        ],
        (None, None) => return Err(LlmError::InsufficientContent),
    };

    Ok(single_turn(
        parts,
        Some(GenerationConfig {
            temperature: Some(0.4),
            ..Default::default()
        }),
    ))
}

pub fn speech_request(text: &str, voice: &str) -> GenerateContentRequest {
    single_turn(
        vec![Part::text(text)],
        Some(GenerationConfig {
            response_modalities: Some(vec!["AUDIO".to_string()]),
            speech_config: Some(json!({
                "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": voice } }
            })),
            ..Default::default()
        }),
    )
}

pub fn slide_request(chapter_title: &str, analysis: &str) -> GenerateContentRequest {
    let prompt = format!(
        "Create a single clean, modern presentation slide illustrating the chapter \
         \"{chapter_title}\". Use a bold title, a simple visual metaphor and at most three short \
         phrases. Base it on this analysis:\n\n{}",
        prefix_chars(analysis, SLIDE_EXCERPT_CHARS)
    );

    single_turn(
        vec![Part::text(prompt)],
        Some(GenerationConfig {
            response_modalities: Some(vec!["IMAGE".to_string()]),
            image_config: Some(json!({ "aspectRatio": SLIDE_ASPECT_RATIO })),
            ..Default::default()
        }),
    )
}

// ============================================================================
// Response validation
// ============================================================================

/// Models sometimes wrap JSON in a markdown fence even when asked not to.
fn strip_json_fence(text: &str) -> &str {
    let trimmed = text.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

pub fn parse_chapters(response: &GenerateContentResponse) -> Result<Vec<Chapter>, LlmError> {
    let text = response
        .text()
        .ok_or_else(|| LlmError::Malformed("empty chapter response".to_string()))?;

    let chapters: Vec<Chapter> = serde_json::from_str(strip_json_fence(&text))
        .map_err(|e| LlmError::Malformed(format!("chapter list: {e}")))?;

    if chapters.is_empty() {
        return Err(LlmError::NoChapters);
    }
    if let Some(bad) = chapters
        .iter()
        .find(|c| c.number.trim().is_empty() || c.title.trim().is_empty() || c.description.trim().is_empty())
    {
        return Err(LlmError::Malformed(format!(
            "chapter with empty field: {:?}",
            bad.title
        )));
    }

    Ok(chapters)
}

// ============================================================================
// Client
// ============================================================================

pub struct LLMClient {
    client: reqwest::Client,
    config: LlmConfig,
}

impl LLMClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        if config.api_key.is_empty() {
            tracing::warn!("LLM_API_KEY is not set; remote calls will be rejected");
        }

        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(LLMClient { client, config })
    }

    async fn generate(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, LlmError> {
        let url = format!("{}/models/{}:generateContent", self.config.api_url, model);

        let mut request_builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(request);

        if !self.config.api_key.is_empty() {
            request_builder = request_builder.header("x-goog-api-key", &self.config.api_key);
        }

        let response = request_builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(model, status = status.as_u16(), "model request failed");
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl AnalysisBackend for LLMClient {
    async fn identify_chapters(&self, source: ChapterSource<'_>) -> Result<Vec<Chapter>, LlmError> {
        let request = identify_request(source);
        let response = self.generate(&self.config.text_model, &request).await?;
        let chapters = parse_chapters(&response)?;

        tracing::info!(chapters = chapters.len(), "identified chapters");
        Ok(chapters)
    }

    async fn analyze_chapter(
        &self,
        title: &str,
        extracted: Option<&str>,
        analysis: AnalysisType,
        document: Option<&str>,
    ) -> Result<String, LlmError> {
        let request = analysis_request(title, extracted, analysis, document)?;
        let response = self.generate(&self.config.text_model, &request).await?;

        response
            .text()
            .ok_or_else(|| LlmError::Malformed("empty analysis".to_string()))
    }

    async fn synthesize_speech(&self, text: &str) -> Result<Vec<u8>, LlmError> {
        let cleaned = narration::clean_for_speech(text);
        let chunks = narration::chunk_sentences(&cleaned, self.config.speech_chunk_chars);
        if chunks.is_empty() {
            return Err(LlmError::InsufficientContent);
        }

        // Chunks are awaited one by one; the PCM is concatenated in text order.
        let mut pcm = Vec::new();
        for (index, chunk) in chunks.iter().enumerate() {
            let request = speech_request(chunk, &self.config.voice);
            let response = self.generate(&self.config.tts_model, &request).await?;
            let audio = response.inline_data().ok_or(LlmError::MissingAudio)?;
            pcm.extend(STANDARD.decode(&audio.data)?);

            tracing::debug!(chunk = index + 1, total = chunks.len(), "synthesized speech chunk");
        }

        Ok(pcm)
    }

    async fn generate_slide(
        &self,
        chapter_title: &str,
        analysis: &str,
    ) -> Result<SlideImage, LlmError> {
        let request = slide_request(chapter_title, analysis);
        let response = self.generate(&self.config.image_model, &request).await?;
        let image = response.inline_data().ok_or(LlmError::MissingImage)?;

        Ok(SlideImage {
            mime_type: image.mime_type.clone(),
            data: image.data.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
    use serde_json::Value;
    use std::sync::{Arc, Mutex};

    type Calls = Arc<Mutex<Vec<Value>>>;

    fn to_json(request: &GenerateContentRequest) -> Value {
        serde_json::to_value(request).unwrap()
    }

    fn response_json(part: Value) -> Value {
        json!({ "candidates": [ { "content": { "role": "model", "parts": [part] } } ] })
    }

    /// Serves `generateContent` on a local port, answering with `reply(call_index)`.
    async fn fake_service(reply: fn(usize) -> (StatusCode, Value)) -> (LLMClient, Calls) {
        let calls: Calls = Arc::default();

        async fn handle(
            State((calls, reply)): State<(Calls, fn(usize) -> (StatusCode, Value))>,
            Json(body): Json<Value>,
        ) -> (StatusCode, Json<Value>) {
            let index = {
                let mut calls = calls.lock().unwrap();
                calls.push(body);
                calls.len() - 1
            };
            let (status, value) = reply(index);
            (status, Json(value))
        }

        let app = Router::new()
            .route("/models/:call", post(handle))
            .with_state((calls.clone(), reply));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = LLMClient::new(LlmConfig {
            api_url: format!("http://{addr}"),
            api_key: "test-key".to_string(),
            speech_chunk_chars: 20,
            ..Default::default()
        })
        .unwrap();
        (client, calls)
    }

    #[test]
    fn test_identify_text_is_truncated() {
        let text = "a".repeat(IDENTIFY_TEXT_CHARS + 5_000);
        let request = to_json(&identify_request(ChapterSource::Text(&text)));

        let parts = request["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 1);
        let sent = parts[0]["text"].as_str().unwrap();
        let book = sent.split("Book text:\n").nth(1).unwrap();
        assert_eq!(book.chars().count(), IDENTIFY_TEXT_CHARS);
        assert_eq!(
            request["generationConfig"]["responseMimeType"],
            "application/json"
        );
    }

    #[test]
    fn test_identify_document_sends_pdf() {
        let request = to_json(&identify_request(ChapterSource::Document("JVBERi0=")));
        let part = &request["contents"][0]["parts"][0];

        assert_eq!(part["inlineData"]["mimeType"], PDF_MIME);
        assert_eq!(part["inlineData"]["data"], "JVBERi0=");
    }

    #[test]
    fn test_analysis_prefers_text() {
        let text = "word ".repeat(50);
        let request = analysis_request("One", Some(&text), AnalysisType::Critical, Some("PDF")).unwrap();
        let request = to_json(&request);

        let parts = request["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 1);
        let sent = parts[0]["text"].as_str().unwrap();
        assert!(sent.contains("critical analysis"));
        assert!(sent.contains(&text));
    }

    #[test]
    fn test_short_text_uses_document() {
        let request = analysis_request("One", Some("too short"), AnalysisType::Standard, Some("PDF")).unwrap();
        let request = to_json(&request);

        let parts = request["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts[0]["inlineData"]["data"], "PDF");
        assert!(parts[1]["text"].as_str().unwrap().contains("Find the chapter titled \"One\""));
    }

    #[test]
    fn test_no_content_is_an_error() {
        let result = analysis_request("One", Some("short"), AnalysisType::Insights, None);
        assert!(matches!(result, Err(LlmError::InsufficientContent)));
    }

    #[test]
    fn test_slide_prompt_uses_excerpt() {
        let analysis = format!("{}{}", "x".repeat(SLIDE_EXCERPT_CHARS), "TAIL");
        let request = to_json(&slide_request("The Storm", &analysis));

        let prompt = request["contents"][0]["parts"][0]["text"].as_str().unwrap();
        assert!(prompt.contains("\"The Storm\""));
        assert!(!prompt.contains("TAIL"));
        assert_eq!(request["generationConfig"]["imageConfig"]["aspectRatio"], "16:9");
    }

    #[test]
    fn test_speech_request_voice() {
        let request = to_json(&speech_request("Hello.", "Puck"));
        assert_eq!(
            request["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Puck"
        );
        assert_eq!(request["generationConfig"]["responseModalities"][0], "AUDIO");
    }

    #[test]
    fn test_parse_chapters_validates() {
        let ok: GenerateContentResponse = serde_json::from_value(response_json(json!({
            "text": "```json\n[{\"number\":\"1\",\"title\":\"Start\",\"description\":\"Opening\"}]\n```"
        })))
        .unwrap();
        let chapters = parse_chapters(&ok).unwrap();
        assert_eq!(chapters[0].title, "Start");

        let empty: GenerateContentResponse =
            serde_json::from_value(response_json(json!({ "text": "[]" }))).unwrap();
        assert!(matches!(parse_chapters(&empty), Err(LlmError::NoChapters)));

        let blank: GenerateContentResponse = serde_json::from_value(response_json(json!({
            "text": "[{\"number\":\"1\",\"title\":\"\",\"description\":\"x\"}]"
        })))
        .unwrap();
        assert!(matches!(parse_chapters(&blank), Err(LlmError::Malformed(_))));

        let junk: GenerateContentResponse =
            serde_json::from_value(response_json(json!({ "text": "not json" }))).unwrap();
        assert!(matches!(parse_chapters(&junk), Err(LlmError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_speech_chunks_requested_in_order() {
        let (client, calls) = fake_service(|index| {
            let pcm = STANDARD.encode([index as u8, 0]);
            (
                StatusCode::OK,
                response_json(json!({ "inlineData": { "mimeType": "audio/L16;rate=24000", "data": pcm } })),
            )
        })
        .await;

        let pcm = client
            .synthesize_speech("**First** point here.\nSecond point here.\nThird one.")
            .await
            .unwrap();

        assert_eq!(pcm, vec![0, 0, 1, 0, 2, 0]);
        let calls = calls.lock().unwrap();
        let texts: Vec<&str> = calls
            .iter()
            .map(|c| c["contents"][0]["parts"][0]["text"].as_str().unwrap())
            .collect();
        assert_eq!(texts, vec!["First point here.", "Second point here.", "Third one."]);
    }

    #[tokio::test]
    async fn test_missing_audio_is_an_error() {
        let (client, _) =
            fake_service(|_| (StatusCode::OK, response_json(json!({ "text": "no audio" })))).await;

        let result = client.synthesize_speech("Hello there.").await;
        assert!(matches!(result, Err(LlmError::MissingAudio)));
    }

    #[tokio::test]
    async fn test_status_error_surfaces() {
        let (client, _) = fake_service(|_| {
            (StatusCode::TOO_MANY_REQUESTS, json!({ "error": "quota" }))
        })
        .await;

        let result = client
            .analyze_chapter("One", Some(&"text ".repeat(40)), AnalysisType::Standard, None)
            .await;
        assert!(matches!(result, Err(LlmError::Status { status: 429, .. })));
    }

    #[tokio::test]
    async fn test_identify_and_slide_round_trip() {
        let (client, calls) = fake_service(|index| {
            let part = if index == 0 {
                json!({ "text": "[{\"number\":\"1\",\"title\":\"Start\",\"description\":\"Opening\"}]" })
            } else {
                json!({ "inlineData": { "mimeType": "image/png", "data": "iVBORw0=" } })
            };
            (StatusCode::OK, response_json(part))
        })
        .await;

        let chapters = client
            .identify_chapters(ChapterSource::Document("JVBERi0="))
            .await
            .unwrap();
        assert_eq!(chapters.len(), 1);

        let slide = client.generate_slide("Start", "An analysis").await.unwrap();
        assert_eq!(slide.data_uri(), "data:image/png;base64,iVBORw0=");
        assert_eq!(calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_slide_without_image_is_an_error() {
        let (client, _) =
            fake_service(|_| (StatusCode::OK, response_json(json!({ "text": "sorry" })))).await;

        let result = client.generate_slide("Start", "An analysis").await;
        assert!(matches!(result, Err(LlmError::MissingImage)));
    }
}
