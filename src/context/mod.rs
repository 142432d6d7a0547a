//! Multi-source context assembly.
//!
//! A [`ContextDocument`] is the sanitized, size-bounded grounding handed to
//! the LLM. Fragments live only for the duration of one pipeline invocation
//! and are never persisted.

mod aggregator;

pub use aggregator::Aggregator;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Which provider a fragment came from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SourceKind {
    Notes,
    Tasks,
    Calendar,
    Email,
}

impl SourceKind {
    pub const ALL: [SourceKind; 4] = [
        SourceKind::Notes,
        SourceKind::Tasks,
        SourceKind::Calendar,
        SourceKind::Email,
    ];

    /// Section heading used in the assembled prompt.
    pub fn heading(self) -> &'static str {
        match self {
            Self::Notes => "NOTES",
            Self::Tasks => "TASKS",
            Self::Calendar => "CALENDAR",
            Self::Email => "EMAIL",
        }
    }
}

/// Per-source enablement for one request. Every source defaults to enabled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SourceToggles {
    #[serde(default = "enabled_by_default")]
    pub use_notes: bool,
    #[serde(default = "enabled_by_default")]
    pub use_tasks: bool,
    #[serde(default = "enabled_by_default")]
    pub use_calendar: bool,
    #[serde(default = "enabled_by_default")]
    pub use_email: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl Default for SourceToggles {
    fn default() -> Self {
        Self {
            use_notes: true,
            use_tasks: true,
            use_calendar: true,
            use_email: true,
        }
    }
}

impl SourceToggles {
    pub fn enabled(&self, kind: SourceKind) -> bool {
        match kind {
            SourceKind::Notes => self.use_notes,
            SourceKind::Tasks => self.use_tasks,
            SourceKind::Calendar => self.use_calendar,
            SourceKind::Email => self.use_email,
        }
    }
}

/// One sanitized piece of provider data. Owned by the aggregator for the
/// lifetime of a single request.
#[derive(Debug, Clone)]
pub struct ContextFragment {
    pub source_kind: SourceKind,
    pub identifier: String,
    pub raw_chars: usize,
    pub sanitized_text: String,
    pub truncated: bool,
}

/// One rendered per-source section of the document.
#[derive(Debug, Clone)]
pub struct ContextSection {
    pub kind: SourceKind,
    pub body: String,
    pub truncated: bool,
}

/// The sanitized, size-bounded assembly of all per-source fragments.
#[derive(Debug, Clone, Default)]
pub struct ContextDocument {
    sections: Vec<ContextSection>,
    /// Citation identifiers (currently note sources) for the `sources` field
    /// of the assistant message.
    pub sources: Vec<String>,
    /// Which sources actually contributed content.
    pub contributing: Vec<SourceKind>,
}

impl ContextDocument {
    pub fn new(sections: Vec<ContextSection>, sources: Vec<String>) -> Self {
        let contributing = sections
            .iter()
            .filter(|s| !s.body.is_empty())
            .map(|s| s.kind)
            .collect();
        Self {
            sections,
            sources,
            contributing,
        }
    }

    pub fn section(&self, kind: SourceKind) -> Option<&ContextSection> {
        self.sections.iter().find(|s| s.kind == kind)
    }

    pub fn section_body(&self, kind: SourceKind) -> &str {
        self.section(kind).map_or("", |s| s.body.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.contributing.is_empty()
    }

    pub fn total_chars(&self) -> usize {
        self.sections.iter().map(|s| s.body.chars().count()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(kind: SourceKind, body: &str) -> ContextSection {
        ContextSection {
            kind,
            body: body.to_string(),
            truncated: false,
        }
    }

    #[test]
    fn contributing_skips_empty_sections() {
        let doc = ContextDocument::new(
            vec![
                section(SourceKind::Notes, "a note"),
                section(SourceKind::Tasks, ""),
            ],
            vec![],
        );
        assert_eq!(doc.contributing, vec![SourceKind::Notes]);
        assert!(!doc.is_empty());
    }

    #[test]
    fn empty_document_reports_empty() {
        let doc = ContextDocument::default();
        assert!(doc.is_empty());
        assert_eq!(doc.total_chars(), 0);
    }

    #[test]
    fn source_kind_parses_from_lowercase() {
        use std::str::FromStr;
        assert_eq!(SourceKind::from_str("email").ok(), Some(SourceKind::Email));
        assert_eq!(SourceKind::Email.to_string(), "email");
    }

    #[test]
    fn toggles_default_to_all_enabled() {
        let toggles = SourceToggles::default();
        for kind in SourceKind::ALL {
            assert!(toggles.enabled(kind));
        }
    }

    #[test]
    fn section_lookup_by_kind() {
        let doc = ContextDocument::new(vec![section(SourceKind::Tasks, "- [open] Pay rent")], vec![]);
        assert_eq!(doc.section_body(SourceKind::Tasks), "- [open] Pay rent");
        assert_eq!(doc.section_body(SourceKind::Email), "");
    }
}
