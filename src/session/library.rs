use uuid::Uuid;

use crate::models::BookSession;

/// Uploaded books, newest first, with at most one active.
#[derive(Debug, Default)]
pub struct Library {
    sessions: Vec<BookSession>,
    active: Option<Uuid>,
}

impl Library {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sessions(&self) -> &[BookSession] {
        &self.sessions
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn active_id(&self) -> Option<Uuid> {
        self.active
    }

    pub fn active(&self) -> Option<&BookSession> {
        self.active.and_then(|id| self.get(id))
    }

    pub fn get(&self, id: Uuid) -> Option<&BookSession> {
        self.sessions.iter().find(|s| s.id == id)
    }

    /// Adds `session` at the front and makes it active.
    pub fn add(&mut self, session: BookSession) -> Uuid {
        let id = session.id;
        self.sessions.insert(0, session);
        self.active = Some(id);
        id
    }

    pub fn switch(&mut self, id: Uuid) -> bool {
        if self.get(id).is_none() {
            return false;
        }
        self.active = Some(id);
        true
    }

    /// Removes a session. Removing the active one activates the new first
    /// session, if any; removing any other leaves the active one alone.
    pub fn remove(&mut self, id: Uuid) -> Option<BookSession> {
        let index = self.sessions.iter().position(|s| s.id == id)?;
        let removed = self.sessions.remove(index);

        if self.active == Some(id) {
            self.active = self.sessions.first().map(|s| s.id);
        }
        Some(removed)
    }
}
