//! Prompt-injection defense for external text.
//!
//! Every fragment of provider data (notes, tasks, calendar, email, search
//! snippets, fetched pages) passes through [`Sanitizer::sanitize`] before it
//! is assembled into a prompt. Sanitization never fails a request: matched
//! content is replaced with a fixed marker and a security event is emitted
//! through the injected [`AuditSink`].

use super::audit::{AuditSink, SecurityEvent, SecurityEventKind};
use anyhow::Context;
use regex::{Regex, RegexBuilder};
use std::sync::Arc;
use unicode_normalization::UnicodeNormalization;

/// Replacement emitted in place of filtered content.
pub const FILTERED_MARKER: &str = "[Content filtered for security]";

// ─── Content types and budgets ──────────────────────────────────────────────

/// Kind of text being sanitized. Each kind carries its own length budget so
/// a single oversized provider field cannot blow up the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    UserMessage,
    EmailSender,
    EmailSubject,
    EmailPreview,
    TaskTitle,
    TaskBody,
    EventSubject,
    EventLocation,
    EventOrganizer,
    NoteExcerpt,
    SourceId,
    SearchQuery,
    SearchSnippet,
    PageTitle,
    FetchedPage,
}

impl ContentType {
    /// Maximum characters retained for this kind (head-truncation).
    pub fn max_chars(self) -> usize {
        match self {
            Self::UserMessage => 10_000,
            Self::EmailSender => 100,
            Self::EmailSubject => 200,
            Self::EmailPreview => 300,
            Self::TaskTitle => 200,
            Self::TaskBody => 500,
            Self::EventSubject => 200,
            Self::EventLocation | Self::EventOrganizer => 100,
            Self::NoteExcerpt => 1_000,
            Self::SourceId => 200,
            Self::SearchQuery => 200,
            Self::SearchSnippet => 300,
            Self::PageTitle => 200,
            Self::FetchedPage => 50_000,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserMessage => "user_message",
            Self::EmailSender => "email_sender",
            Self::EmailSubject => "email_subject",
            Self::EmailPreview => "email_preview",
            Self::TaskTitle => "task_title",
            Self::TaskBody => "task_body",
            Self::EventSubject => "event_subject",
            Self::EventLocation => "event_location",
            Self::EventOrganizer => "event_organizer",
            Self::NoteExcerpt => "note_excerpt",
            Self::SourceId => "source_id",
            Self::SearchQuery => "search_query",
            Self::SearchSnippet => "search_snippet",
            Self::PageTitle => "page_title",
            Self::FetchedPage => "fetched_page",
        }
    }
}

// ─── Injection pattern families ─────────────────────────────────────────────

struct PatternFamily {
    name: &'static str,
    patterns: &'static [&'static str],
}

/// Maintained pattern set. Matching happens after NFKC normalization, so
/// fullwidth or compatibility-form obfuscations of these phrases still hit.
const PATTERN_FAMILIES: &[PatternFamily] = &[
    PatternFamily {
        name: "instruction_override",
        patterns: &[
            r"ignore\s*(all\s*)?(previous|prior|above)\s*(instructions?|prompts?)",
            r"forget\s*(all\s*)?(previous|prior|above)",
            r"new\s+(instructions?|rules?|role)",
            r"override\s*(instructions?|rules?)",
            r"disregard\s*(previous|prior|above)",
            r"you\s+(must|will|shall|should)\s+(now|always|never)",
        ],
    },
    PatternFamily {
        name: "role_switch",
        patterns: &[
            r"```\s*(system|assistant|user)",
            r"\[INST\]|\[/INST\]",
            r"<\|.*?\|>",
            r"(^|\s)(human|assistant|system)\s*:",
            r"###\s*(instruction|response|system)",
            r"system\s*prompt",
        ],
    },
    PatternFamily {
        name: "identity_manipulation",
        patterns: &[
            r"you\s+are\s+now\s+(a|an|in)",
            r"act\s+as\s+(if\s+)?(a|an|you)",
            r"pretend\s+(to\s+be|you\s+are)",
            r"as\s+an?\s+(ai|language\s+model|chatbot|assistant)",
            r"jailbreak",
            r"DAN\s+mode",
            r"\bDAN\b",
        ],
    },
    PatternFamily {
        name: "context_escape",
        patterns: &[
            r"(end|exit|escape)\s*(context|prompt|instruction)",
            r"===+\s*(end|system|new)",
        ],
    },
];

// ─── Policy ─────────────────────────────────────────────────────────────────

/// What to do with a fragment once an injection pattern matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InjectionPolicy {
    /// Replace the entire fragment with [`FILTERED_MARKER`].
    #[default]
    ReplaceFragment,
    /// Replace only the matched spans, keeping surrounding text.
    ReplaceSpan,
}

// ─── Sanitizer ──────────────────────────────────────────────────────────────

/// Pattern- and unicode-based defense against prompt injection.
///
/// Immutable after construction; safe to share across concurrent pipeline
/// instances. The only side effect is event emission through the audit sink.
pub struct Sanitizer {
    patterns: Vec<Regex>,
    policy: InjectionPolicy,
    audit: Arc<dyn AuditSink>,
}

impl Sanitizer {
    pub fn new(audit: Arc<dyn AuditSink>) -> anyhow::Result<Self> {
        Self::with_policy(audit, InjectionPolicy::default())
    }

    pub fn with_policy(audit: Arc<dyn AuditSink>, policy: InjectionPolicy) -> anyhow::Result<Self> {
        let mut patterns = Vec::new();
        for family in PATTERN_FAMILIES {
            for raw in family.patterns {
                let regex = RegexBuilder::new(raw)
                    .case_insensitive(true)
                    .multi_line(true)
                    .build()
                    .with_context(|| format!("compile {} pattern {raw}", family.name))?;
                patterns.push(regex);
            }
        }
        Ok(Self {
            patterns,
            policy,
            audit,
        })
    }

    /// NFKC-fold text so lookalike characters collapse onto their canonical
    /// form before pattern matching (e.g. fullwidth "ｉｇｎｏｒｅ" → "ignore").
    pub fn normalize(text: &str) -> String {
        text.nfkc().collect()
    }

    /// Whether the text contains a known injection pattern in any unicode
    /// obfuscation. Used for the log-only pre-flight check on user messages.
    pub fn contains_injection(&self, text: &str) -> bool {
        let normalized = Self::normalize(text);
        self.patterns.iter().any(|p| p.is_match(&normalized))
    }

    /// Sanitize external text for prompt inclusion, attributing any security
    /// event to the content type itself.
    pub fn sanitize(&self, text: &str, content_type: ContentType, filter_injections: bool) -> String {
        self.sanitize_from(content_type.as_str(), text, content_type, filter_injections)
    }

    /// Sanitize external text, attributing security events to `source`
    /// (typically a fragment identifier such as `notes/projects/plan.md`).
    pub fn sanitize_from(
        &self,
        source: &str,
        text: &str,
        content_type: ContentType,
        filter_injections: bool,
    ) -> String {
        if text.is_empty() {
            return String::new();
        }

        // Normalize before anything else so truncation and matching see the
        // same canonical form.
        let normalized = Self::normalize(text);

        // Head-truncation: keep the start, drop the tail.
        let truncated: String = normalized.chars().take(content_type.max_chars()).collect();

        // Collapse whitespace runs (including newlines) to single spaces.
        let collapsed = collapse_whitespace(&truncated);

        if filter_injections {
            match self.policy {
                InjectionPolicy::ReplaceFragment => {
                    if self.patterns.iter().any(|p| p.is_match(&collapsed)) {
                        self.audit.record(SecurityEvent::new(
                            SecurityEventKind::InjectionAttempt,
                            source,
                            &collapsed,
                        ));
                        return FILTERED_MARKER.to_string();
                    }
                }
                InjectionPolicy::ReplaceSpan => {
                    let mut filtered = collapsed.clone();
                    let mut hit = false;
                    for pattern in &self.patterns {
                        if pattern.is_match(&filtered) {
                            hit = true;
                            filtered = pattern.replace_all(&filtered, FILTERED_MARKER).into_owned();
                        }
                    }
                    if hit {
                        self.audit.record(SecurityEvent::new(
                            SecurityEventKind::InjectionAttempt,
                            source,
                            &collapsed,
                        ));
                        return escape_markup(&filtered);
                    }
                }
            }
        }

        escape_markup(&collapsed)
    }
}

/// Collapse all whitespace runs to single spaces and trim the ends.
fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Escape markup-significant characters so a fragment cannot break the
/// structured sections of the assembled prompt.
pub fn escape_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
