//! The two long-running user actions: turning an uploaded PDF into a book
//! session, and producing one chapter analysis.

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::STANDARD};

use crate::error::AppError;
use crate::models::BookSession;
use crate::services::extractor::{ExtractError, TextExtractor};
use crate::services::llm::{AnalysisBackend, ChapterSource};
use crate::services::locator;
use crate::session::AnalysisJob;

/// Extracts text, decides between the text and visual paths, and asks the
/// backend for the chapter list.
pub async fn prepare_book(
    extractor: Arc<dyn TextExtractor>,
    backend: &dyn AnalysisBackend,
    file_name: &str,
    pdf: Vec<u8>,
) -> Result<BookSession, AppError> {
    let pdf = Arc::new(pdf);

    // pdf-extract is synchronous and may panic on malformed input
    let extracted = {
        let pdf = pdf.clone();
        tokio::task::spawn_blocking(move || extractor.extract(&pdf))
            .await
            .map_err(|e| AppError::Extraction(ExtractError::Unreadable(e.to_string())))?
            .map_err(AppError::Extraction)?
    };

    let is_scanned = extracted.is_scanned();
    let full_text = if is_scanned {
        String::new()
    } else {
        extracted.full_text()
    };
    let pdf_base64 = STANDARD.encode(pdf.as_slice());

    tracing::info!(
        file_name,
        pages = extracted.pages.len(),
        text_chars = full_text.len(),
        scanned = is_scanned,
        "prepared PDF"
    );

    let source = if is_scanned {
        ChapterSource::Document(&pdf_base64)
    } else {
        ChapterSource::Text(&full_text)
    };
    let chapters = backend
        .identify_chapters(source)
        .await
        .map_err(AppError::identification)?;

    if chapters.is_empty() {
        return Err(AppError::NoChapters);
    }

    Ok(BookSession::new(
        file_name,
        chapters,
        full_text,
        pdf_base64,
        is_scanned,
    ))
}

/// Isolates the chapter text when possible and asks for the analysis.
///
/// Scanned books skip the locator and send only the document. Text books
/// send whatever the locator found plus the document, so the model can fall
/// back to reading the PDF when the located text is missing or short.
pub async fn run_analysis(
    backend: &dyn AnalysisBackend,
    job: &AnalysisJob,
) -> Result<String, AppError> {
    let title = job.ticket.chapter.title.as_str();

    let extracted = if job.is_scanned_mode {
        None
    } else {
        let located = locator::locate_usable(&job.pdf_text, title, job.next_title.as_deref());
        if located.is_none() {
            tracing::info!(chapter = title, "chapter text not located, using whole document");
        }
        located
    };

    let document = Some(job.pdf_base64.as_ref()).filter(|d| !d.is_empty());

    backend
        .analyze_chapter(title, extracted.as_deref(), job.ticket.analysis_type, document)
        .await
        .map_err(AppError::analysis)
}
