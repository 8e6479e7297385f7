//! PDF text extraction and scanned-document detection.

use thiserror::Error;

/// Below this many characters of extracted text a book is read visually.
pub const MIN_TEXT_CHARS: usize = 500;
/// A page with fewer non-whitespace characters than this counts as an image page.
const SPARSE_PAGE_CHARS: usize = 50;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unreadable PDF: {0}")]
    Unreadable(String),
}

/// Text pulled out of a document, one entry per page.
#[derive(Debug, Clone, Default)]
pub struct ExtractedText {
    pub pages: Vec<String>,
    /// The extractor's own judgement that the pages are mostly images.
    pub image_heavy: bool,
}

impl ExtractedText {
    pub fn from_pages(pages: Vec<String>) -> Self {
        let sparse = pages
            .iter()
            .filter(|page| page.chars().filter(|c| !c.is_whitespace()).count() < SPARSE_PAGE_CHARS)
            .count();
        let image_heavy = !pages.is_empty() && sparse * 2 > pages.len();

        Self { pages, image_heavy }
    }

    pub fn full_text(&self) -> String {
        self.pages
            .iter()
            .map(|page| page.trim())
            .filter(|page| !page.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Whether this book must take the whole-document visual path.
    pub fn is_scanned(&self) -> bool {
        self.image_heavy || self.full_text().trim().chars().count() < MIN_TEXT_CHARS
    }
}

pub trait TextExtractor: Send + Sync {
    fn extract(&self, pdf: &[u8]) -> Result<ExtractedText, ExtractError>;
}

/// Extractor backed by `pdf-extract`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfTextExtractor;

impl TextExtractor for PdfTextExtractor {
    fn extract(&self, pdf: &[u8]) -> Result<ExtractedText, ExtractError> {
        let pages = pdf_extract::extract_text_from_mem_by_pages(pdf)
            .map_err(|e| ExtractError::Unreadable(e.to_string()))?;

        let extracted = ExtractedText::from_pages(pages);
        tracing::debug!(
            pages = extracted.pages.len(),
            image_heavy = extracted.image_heavy,
            "extracted PDF text"
        );
        Ok(extracted)
    }
}
