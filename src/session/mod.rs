//! Application state and the transitions that change it.
//!
//! [`Controller`] is the only owner of the library and the current screen.
//! Work that waits on the network is split in two: a `begin_*` transition
//! hands out a ticket, the caller awaits the remote result without holding
//! the controller, and a `complete_*`/`fail_*` transition applies it only if
//! the ticket is still current. Every navigation bumps the generation, so
//! answers to abandoned requests are dropped instead of overwriting newer
//! state.

mod library;

pub use library::Library;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::auth::User;
use crate::error::AppError;
use crate::models::{AnalysisType, BookSession, Chapter};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "screen", rename_all = "snake_case")]
pub enum View {
    Upload,
    Processing {
        file_name: String,
    },
    Chapters,
    Analyzing {
        chapter: Chapter,
        analysis_type: AnalysisType,
    },
    Analysis {
        chapter: Chapter,
        analysis_type: AnalysisType,
        content: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadTicket {
    generation: u64,
}

/// Identifies one analysis request and what it was for.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestTicket {
    generation: u64,
    pub session_id: Uuid,
    pub chapter: Chapter,
    pub analysis_type: AnalysisType,
}

/// Everything an analysis request needs, detached from the controller.
#[derive(Debug, Clone)]
pub struct AnalysisJob {
    pub ticket: RequestTicket,
    pub next_title: Option<String>,
    pub pdf_text: Arc<str>,
    pub pdf_base64: Arc<str>,
    pub is_scanned_mode: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub file_name: String,
    pub upload_timestamp: DateTime<Utc>,
    pub chapter_count: usize,
    pub is_scanned_mode: bool,
}

impl From<&BookSession> for SessionSummary {
    fn from(session: &BookSession) -> Self {
        Self {
            id: session.id,
            file_name: session.file_name.clone(),
            upload_timestamp: session.upload_timestamp,
            chapter_count: session.chapters.len(),
            is_scanned_mode: session.is_scanned_mode,
        }
    }
}

/// Read-only view of the controller for the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub user: Option<User>,
    pub view: View,
    pub error: Option<String>,
    pub sessions: Vec<SessionSummary>,
    pub active_session: Option<Uuid>,
    pub chapters: Vec<Chapter>,
    pub is_scanned_mode: bool,
}

#[derive(Debug)]
pub struct Controller {
    library: Library,
    view: View,
    error: Option<String>,
    user: Option<User>,
    generation: u64,
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

impl Controller {
    pub fn new() -> Self {
        Self {
            library: Library::new(),
            view: View::Upload,
            error: None,
            user: None,
            generation: 0,
        }
    }

    pub fn view(&self) -> &View {
        &self.view
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn require_user(&self) -> Result<&User, AppError> {
        self.user.as_ref().ok_or(AppError::Unauthenticated)
    }

    pub fn snapshot(&self) -> Snapshot {
        let active = self.library.active();
        Snapshot {
            user: self.user.clone(),
            view: self.view.clone(),
            error: self.error.clone(),
            sessions: self.library.sessions().iter().map(SessionSummary::from).collect(),
            active_session: self.library.active_id(),
            chapters: active.map(|s| s.chapters.clone()).unwrap_or_default(),
            is_scanned_mode: active.is_some_and(|s| s.is_scanned_mode),
        }
    }

    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Screen to fall back to when the current one has nothing to show.
    fn resting_view(&self) -> View {
        if self.library.active().is_some() {
            View::Chapters
        } else {
            View::Upload
        }
    }

    // ========================================================================
    // Sign-in
    // ========================================================================

    pub fn sign_in(&mut self, user: User) {
        self.user = Some(user);
        self.error = None;
    }

    /// Signing out forgets every book.
    pub fn sign_out(&mut self) {
        *self = Self {
            generation: self.generation + 1,
            ..Self::new()
        };
    }

    // ========================================================================
    // Upload
    // ========================================================================

    pub fn new_upload(&mut self) {
        self.next_generation();
        self.error = None;
        self.view = View::Upload;
    }

    pub fn begin_upload(&mut self, file_name: &str) -> UploadTicket {
        let generation = self.next_generation();
        self.error = None;
        self.view = View::Processing {
            file_name: file_name.to_string(),
        };
        UploadTicket { generation }
    }

    pub fn finish_upload(&mut self, ticket: UploadTicket, session: BookSession) -> bool {
        if ticket.generation != self.generation {
            tracing::info!(file_name = %session.file_name, "discarding superseded upload");
            return false;
        }

        tracing::info!(
            session_id = %session.id,
            file_name = %session.file_name,
            chapters = session.chapters.len(),
            scanned = session.is_scanned_mode,
            "book added to library"
        );
        self.library.add(session);
        self.view = View::Chapters;
        true
    }

    pub fn fail_upload(&mut self, ticket: UploadTicket, err: &AppError) -> bool {
        if ticket.generation != self.generation {
            return false;
        }
        self.error = Some(err.to_string());
        self.view = View::Upload;
        true
    }

    // ========================================================================
    // Library navigation
    // ========================================================================

    pub fn switch_session(&mut self, id: Uuid) -> Result<(), AppError> {
        if !self.library.switch(id) {
            return Err(AppError::SessionNotFound);
        }
        self.next_generation();
        self.error = None;
        self.view = View::Chapters;
        Ok(())
    }

    pub fn remove_session(&mut self, id: Uuid) -> Result<(), AppError> {
        let was_active = self.library.active_id() == Some(id);
        let removed = self.library.remove(id).ok_or(AppError::SessionNotFound)?;
        tracing::info!(session_id = %removed.id, file_name = %removed.file_name, "book removed");

        if was_active {
            self.next_generation();
            self.error = None;
            self.view = self.resting_view();
        }
        Ok(())
    }

    pub fn back_to_chapters(&mut self) {
        self.next_generation();
        self.view = self.resting_view();
    }

    // ========================================================================
    // Analysis
    // ========================================================================

    pub fn begin_analysis(
        &mut self,
        chapter_number: &str,
        chapter_title: &str,
        analysis_type: AnalysisType,
    ) -> Result<AnalysisJob, AppError> {
        let session = self.library.active().ok_or(AppError::NoActiveSession)?;
        let (index, chapter) = session
            .find_chapter(chapter_number, chapter_title)
            .ok_or(AppError::ChapterNotFound)?;

        let chapter = chapter.clone();
        let session_id = session.id;
        let next_title = session.next_chapter_title(index).map(str::to_string);
        let pdf_text = session.pdf_text.clone();
        let pdf_base64 = session.pdf_base64.clone();
        let is_scanned_mode = session.is_scanned_mode;

        let generation = self.next_generation();
        self.error = None;
        self.view = View::Analyzing {
            chapter: chapter.clone(),
            analysis_type,
        };

        Ok(AnalysisJob {
            ticket: RequestTicket {
                generation,
                session_id,
                chapter,
                analysis_type,
            },
            next_title,
            pdf_text,
            pdf_base64,
            is_scanned_mode,
        })
    }

    fn is_current(&self, ticket: &RequestTicket) -> bool {
        ticket.generation == self.generation && self.library.active_id() == Some(ticket.session_id)
    }

    pub fn complete_analysis(&mut self, ticket: RequestTicket, content: String) -> bool {
        if !self.is_current(&ticket) {
            tracing::info!(
                chapter = %ticket.chapter.title,
                analysis = ?ticket.analysis_type,
                "discarding stale analysis"
            );
            return false;
        }

        self.view = View::Analysis {
            chapter: ticket.chapter,
            analysis_type: ticket.analysis_type,
            content,
        };
        true
    }

    /// Back to the chapter list with an error banner; other chapters stay
    /// selectable.
    pub fn fail_analysis(&mut self, ticket: &RequestTicket, err: &AppError) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        self.error = Some(err.to_string());
        self.view = self.resting_view();
        true
    }
}
