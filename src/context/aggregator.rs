use super::{ContextDocument, ContextFragment, ContextSection, SourceKind, SourceToggles};
use crate::config::ContextConfig;
use crate::security::{AuditSink, ContentType, Sanitizer, SecurityEvent, SecurityEventKind};
use crate::sources::SessionContext;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Fans out to the enabled data providers, sanitizes every fragment, and
/// assembles a bounded [`ContextDocument`].
///
/// A provider failure or timeout yields an empty contribution for that
/// source; it never fails the whole aggregation.
pub struct Aggregator {
    sanitizer: Arc<Sanitizer>,
    audit: Arc<dyn AuditSink>,
    cfg: ContextConfig,
}

impl Aggregator {
    pub fn new(sanitizer: Arc<Sanitizer>, audit: Arc<dyn AuditSink>, cfg: ContextConfig) -> Self {
        Self {
            sanitizer,
            audit,
            cfg,
        }
    }

    /// Gather context for one request. The four provider calls run
    /// concurrently, each bounded by its own timeout.
    pub async fn gather(
        &self,
        session: &SessionContext,
        toggles: &SourceToggles,
        query: &str,
    ) -> ContextDocument {
        let (notes, tasks, calendar, email) = tokio::join!(
            self.gather_notes(session, toggles, query),
            self.gather_tasks(session, toggles),
            self.gather_calendar(session, toggles),
            self.gather_email(session, toggles),
        );

        let (notes_section, mut sources) = notes;
        let mut sections = vec![notes_section, tasks, calendar, email];
        self.enforce_budget(&mut sections);

        // A notes section squeezed out by the budget can no longer back its
        // citations.
        if sections
            .iter()
            .any(|s| s.kind == SourceKind::Notes && s.body.is_empty())
        {
            sources.clear();
        }

        ContextDocument::new(sections, sources)
    }

    // ── Per-source gathering ─────────────────────────────────────────────

    async fn gather_notes(
        &self,
        session: &SessionContext,
        toggles: &SourceToggles,
        query: &str,
    ) -> (ContextSection, Vec<String>) {
        let empty = ContextSection {
            kind: SourceKind::Notes,
            body: String::new(),
            truncated: false,
        };

        if !toggles.use_notes {
            return (empty, Vec::new());
        }
        let Some(ref notes) = session.notes else {
            return (empty, Vec::new());
        };

        let hits = self
            .bounded(
                SourceKind::Notes,
                self.cfg.notes_timeout_secs,
                notes.search(query, self.cfg.notes_k),
            )
            .await
            .unwrap_or_default();

        let mut sources = Vec::new();
        let mut parts = Vec::new();
        for hit in hits {
            let fragment = self.fragment(
                SourceKind::Notes,
                &hit.id,
                &hit.text,
                ContentType::NoteExcerpt,
            );
            let source = self
                .sanitizer
                .sanitize_from(&hit.id, &hit.id, ContentType::SourceId, true);
            if !sources.contains(&source) {
                sources.push(source.clone());
            }
            parts.push(format!("[From: {source}]\n{}", fragment.sanitized_text));
        }

        (
            ContextSection {
                kind: SourceKind::Notes,
                body: parts.join("\n\n---\n\n"),
                truncated: false,
            },
            sources,
        )
    }

    async fn gather_tasks(
        &self,
        session: &SessionContext,
        toggles: &SourceToggles,
    ) -> ContextSection {
        let mut section = ContextSection {
            kind: SourceKind::Tasks,
            body: String::new(),
            truncated: false,
        };

        if !toggles.use_tasks {
            return section;
        }
        let Some(ref tasks) = session.tasks else {
            return section;
        };

        let records = self
            .bounded(
                SourceKind::Tasks,
                self.cfg.provider_timeout_secs,
                tasks.recent(self.cfg.tasks_n),
            )
            .await
            .unwrap_or_default();

        let mut lines = Vec::new();
        for task in records.iter().take(self.cfg.tasks_n) {
            let title = self.fragment(
                SourceKind::Tasks,
                &task.id,
                &task.title,
                ContentType::TaskTitle,
            );
            let mut line = format!("- [{}] {}", task.status, title.sanitized_text);
            if task.importance == "high" {
                line.push_str(" (HIGH PRIORITY)");
            }
            if let Some(ref due) = task.due {
                let day: String = due.chars().take(10).collect();
                line.push_str(&format!(" (due: {day})"));
            }
            lines.push(line);
        }

        section.body = lines.join("\n");
        section
    }

    async fn gather_calendar(
        &self,
        session: &SessionContext,
        toggles: &SourceToggles,
    ) -> ContextSection {
        let mut section = ContextSection {
            kind: SourceKind::Calendar,
            body: String::new(),
            truncated: false,
        };

        if !toggles.use_calendar {
            return section;
        }
        let Some(ref calendar) = session.calendar else {
            return section;
        };

        let events = self
            .bounded(
                SourceKind::Calendar,
                self.cfg.provider_timeout_secs,
                calendar.upcoming(self.cfg.events_n),
            )
            .await
            .unwrap_or_default();

        let mut lines: Vec<String> = Vec::new();
        let mut current_date = String::new();
        for event in events.iter().take(self.cfg.events_n) {
            let subject = self.fragment(
                SourceKind::Calendar,
                &event.id,
                &event.subject,
                ContentType::EventSubject,
            );
            let date: String = event.start.chars().take(10).collect();
            if date != current_date {
                current_date.clone_from(&date);
                lines.push(format!("## {date}"));
            }

            let time: String = event.start.chars().skip(11).take(5).collect();
            let mut line = format!("- {time}: {}", subject.sanitized_text);
            if let Some(ref location) = event.location {
                let location =
                    self.sanitizer
                        .sanitize_from(&event.id, location, ContentType::EventLocation, true);
                if !location.is_empty() {
                    line.push_str(&format!(" @ {location}"));
                }
            }
            if let Some(ref organizer) = event.organizer {
                let organizer = self.sanitizer.sanitize_from(
                    &event.id,
                    organizer,
                    ContentType::EventOrganizer,
                    true,
                );
                if !organizer.is_empty() {
                    line.push_str(&format!(" (organizer: {organizer})"));
                }
            }
            lines.push(line);
        }

        section.body = lines.join("\n");
        section
    }

    async fn gather_email(
        &self,
        session: &SessionContext,
        toggles: &SourceToggles,
    ) -> ContextSection {
        let mut section = ContextSection {
            kind: SourceKind::Email,
            body: String::new(),
            truncated: false,
        };

        if !toggles.use_email {
            return section;
        }
        let Some(ref mail) = session.mail else {
            return section;
        };

        let messages = self
            .bounded(
                SourceKind::Email,
                self.cfg.provider_timeout_secs,
                mail.recent(self.cfg.mail_n),
            )
            .await
            .unwrap_or_default();

        let mut lines = Vec::new();
        for msg in messages.iter().take(self.cfg.mail_n) {
            let sender =
                self.sanitizer
                    .sanitize_from(&msg.id, &msg.sender, ContentType::EmailSender, true);
            let subject =
                self.sanitizer
                    .sanitize_from(&msg.id, &msg.subject, ContentType::EmailSubject, true);
            let preview =
                self.sanitizer
                    .sanitize_from(&msg.id, &msg.preview, ContentType::EmailPreview, true);

            let received: String = msg.received.chars().take(10).collect();
            let read = if msg.read { "read" } else { "unread" };
            lines.push(format!("- [{read}] {received} from {sender}: {subject}"));
            if !preview.is_empty() {
                lines.push(format!("  Preview: {preview}..."));
            }
        }

        section.body = lines.join("\n");
        section
    }

    // ── Helpers ──────────────────────────────────────────────────────────

    fn fragment(
        &self,
        kind: SourceKind,
        identifier: &str,
        raw: &str,
        content_type: ContentType,
    ) -> ContextFragment {
        let sanitized = self
            .sanitizer
            .sanitize_from(identifier, raw, content_type, true);
        ContextFragment {
            source_kind: kind,
            identifier: identifier.to_string(),
            raw_chars: raw.chars().count(),
            truncated: raw.chars().count() > content_type.max_chars(),
            sanitized_text: sanitized,
        }
    }

    async fn bounded<T, F>(&self, kind: SourceKind, secs: u64, fut: F) -> Option<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match tokio::time::timeout(Duration::from_secs(secs), fut).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(error)) => {
                tracing::warn!(source = %kind, %error, "context provider failed");
                self.audit.record(SecurityEvent::new(
                    SecurityEventKind::ProviderDegraded,
                    kind.heading(),
                    &error.to_string(),
                ));
                None
            }
            Err(_) => {
                tracing::warn!(source = %kind, timeout_secs = secs, "context provider timed out");
                self.audit.record(SecurityEvent::new(
                    SecurityEventKind::ProviderDegraded,
                    kind.heading(),
                    "timeout",
                ));
                None
            }
        }
    }

    /// Enforce the hard character budget by truncating lower-priority
    /// sources first (configured order, e.g. email before notes).
    fn enforce_budget(&self, sections: &mut [ContextSection]) {
        let mut total: usize = sections.iter().map(|s| s.body.chars().count()).sum();
        if total <= self.cfg.char_budget {
            return;
        }

        let order: Vec<SourceKind> = self
            .cfg
            .truncation_order
            .iter()
            .filter_map(|name| SourceKind::from_str(name).ok())
            .chain(SourceKind::ALL.into_iter().rev())
            .collect();

        for kind in order {
            if total <= self.cfg.char_budget {
                break;
            }
            let Some(section) = sections.iter_mut().find(|s| s.kind == kind) else {
                continue;
            };
            let len = section.body.chars().count();
            if len == 0 {
                continue;
            }

            let over = total - self.cfg.char_budget;
            if len <= over {
                section.body.clear();
                section.truncated = true;
                total -= len;
            } else {
                section.body = section.body.chars().take(len - over).collect();
                section.truncated = true;
                total = self.cfg.char_budget;
            }
        }
    }
}
