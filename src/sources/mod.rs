//! Read-side interfaces to the per-service data providers.
//!
//! The stores themselves (notes index, task list, calendar, mailbox) are
//! external collaborators; this module defines the bounded-read contracts the
//! context aggregator consumes and the capability bundle that authorizes
//! provider access for one authenticated principal.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ─── Provider records ────────────────────────────────────────────────────────

/// A semantic-similarity hit from the notes index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteHit {
    /// Source identifier (e.g. a note path) used for citation.
    pub id: String,
    pub text: String,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub list_id: Option<String>,
    pub title: String,
    pub body: Option<String>,
    /// Provider status string (e.g. "notStarted", "inProgress").
    pub status: String,
    /// "low" | "normal" | "high".
    pub importance: String,
    /// Due date, ISO-8601, date portion is what gets rendered.
    pub due: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub subject: String,
    /// ISO-8601 local datetime, minute precision is what gets rendered.
    pub start: String,
    pub end: String,
    pub location: Option<String>,
    pub organizer: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailRecord {
    pub id: String,
    pub sender: String,
    pub subject: String,
    pub preview: String,
    /// Received date, ISO-8601.
    pub received: String,
    pub read: bool,
}

// ─── Reader traits ───────────────────────────────────────────────────────────

/// Semantic similarity search over the notes index.
#[async_trait]
pub trait NoteSearch: Send + Sync {
    async fn search(&self, query: &str, k: usize) -> anyhow::Result<Vec<NoteHit>>;
}

/// Bounded read of open tasks, most relevant first.
#[async_trait]
pub trait TaskReader: Send + Sync {
    async fn recent(&self, n: usize) -> anyhow::Result<Vec<TaskRecord>>;
}

/// Bounded read of near-term calendar events, soonest first.
#[async_trait]
pub trait CalendarReader: Send + Sync {
    async fn upcoming(&self, n: usize) -> anyhow::Result<Vec<EventRecord>>;
}

/// Bounded read of the most recent inbox messages.
#[async_trait]
pub trait MailReader: Send + Sync {
    async fn recent(&self, n: usize) -> anyhow::Result<Vec<MailRecord>>;
}

// ─── Capability bundle ───────────────────────────────────────────────────────

/// Opaque capability bundle for one authenticated principal.
///
/// Owning a `SessionContext` is what authorizes the aggregator to call the
/// providers; a provider that is absent simply contributes nothing. Consumed,
/// never constructed, by the pipeline.
#[derive(Clone, Default)]
pub struct SessionContext {
    /// Short identifier used for audit attribution, never logged in full.
    pub principal: String,
    pub notes: Option<Arc<dyn NoteSearch>>,
    pub tasks: Option<Arc<dyn TaskReader>>,
    pub calendar: Option<Arc<dyn CalendarReader>>,
    pub mail: Option<Arc<dyn MailReader>>,
}

impl SessionContext {
    /// A bundle granting access to no providers. Every source contributes an
    /// empty section; useful for deployments without linked accounts and for
    /// tests.
    pub fn unlinked(principal: &str) -> Self {
        Self {
            principal: principal.to_string(),
            ..Self::default()
        }
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("principal", &self.principal)
            .field("notes", &self.notes.is_some())
            .field("tasks", &self.tasks.is_some())
            .field("calendar", &self.calendar.is_some())
            .field("mail", &self.mail.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlinked_session_has_no_providers() {
        let session = SessionContext::unlinked("user-1");
        assert_eq!(session.principal, "user-1");
        assert!(session.notes.is_none());
        assert!(session.tasks.is_none());
        assert!(session.calendar.is_none());
        assert!(session.mail.is_none());
    }

    #[test]
    fn debug_does_not_leak_provider_internals() {
        let session = SessionContext::unlinked("user-1");
        let rendered = format!("{session:?}");
        assert!(rendered.contains("user-1"));
        assert!(rendered.contains("notes: false"));
    }
}
