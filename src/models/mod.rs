use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A chapter as identified by the language model.
///
/// Two chapters are the same chapter when both `number` and `title` match;
/// the description is free text and takes no part in identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub number: String,
    pub title: String,
    pub description: String,
}

impl PartialEq for Chapter {
    fn eq(&self, other: &Self) -> bool {
        self.number == other.number && self.title == other.title
    }
}

impl Eq for Chapter {}

impl Chapter {
    pub fn matches(&self, number: &str, title: &str) -> bool {
        self.number == number && self.title == title
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisType {
    Standard,
    Detailed,
    Insights,
    Critical,
}

impl AnalysisType {
    pub const ALL: [AnalysisType; 4] = [
        AnalysisType::Standard,
        AnalysisType::Detailed,
        AnalysisType::Insights,
        AnalysisType::Critical,
    ];

    pub fn label(self) -> &'static str {
        match self {
            AnalysisType::Standard => "Standard Summary",
            AnalysisType::Detailed => "Detailed Breakdown",
            AnalysisType::Insights => "Key Insights",
            AnalysisType::Critical => "Critical Analysis",
        }
    }
}

/// One uploaded book and everything derived from it.
#[derive(Debug, Clone, Serialize)]
pub struct BookSession {
    pub id: Uuid,
    pub file_name: String,
    pub upload_timestamp: DateTime<Utc>,
    pub chapters: Vec<Chapter>,
    #[serde(skip)]
    pub pdf_text: Arc<str>,
    #[serde(skip)]
    pub pdf_base64: Arc<str>,
    pub is_scanned_mode: bool,
}

impl BookSession {
    pub fn new(
        file_name: impl Into<String>,
        chapters: Vec<Chapter>,
        pdf_text: String,
        pdf_base64: String,
        is_scanned_mode: bool,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            file_name: file_name.into(),
            upload_timestamp: Utc::now(),
            chapters,
            pdf_text: pdf_text.into(),
            pdf_base64: pdf_base64.into(),
            is_scanned_mode,
        }
    }

    pub fn find_chapter(&self, number: &str, title: &str) -> Option<(usize, &Chapter)> {
        self.chapters
            .iter()
            .enumerate()
            .find(|(_, chapter)| chapter.matches(number, title))
    }

    /// Title of the chapter that follows `index`, used as the end boundary
    /// when isolating chapter text.
    pub fn next_chapter_title(&self, index: usize) -> Option<&str> {
        self.chapters.get(index + 1).map(|c| c.title.as_str())
    }
}

/// Base64 image returned by slide generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlideImage {
    pub mime_type: String,
    pub data: String,
}

impl SlideImage {
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}
