//! Security event recording.
//!
//! Defensive subsystems never fail a request; they degrade the content and
//! report what happened through an injected [`AuditSink`]. Events carry a
//! digest of the offending content, never the content itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    /// An injection pattern matched in external or user-supplied text.
    InjectionAttempt,
    /// A context or lookup provider failed or timed out and was omitted.
    ProviderDegraded,
    /// An outbound URL was rejected by the SSRF guard.
    BlockedUrl,
    /// Input exceeded its content-type budget and was truncated.
    OversizedInput,
}

impl SecurityEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InjectionAttempt => "injection_attempt",
            Self::ProviderDegraded => "provider_degraded",
            Self::BlockedUrl => "blocked_url",
            Self::OversizedInput => "oversized_input",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub kind: SecurityEventKind,
    /// Identifier of the fragment or subsystem that produced the content.
    pub source: String,
    /// SHA-256 of the content that triggered the event. The raw content is
    /// never persisted alongside the event.
    pub digest_sha256: String,
    pub content_chars: usize,
    pub recorded_at: DateTime<Utc>,
}

impl SecurityEvent {
    pub fn new(kind: SecurityEventKind, source: &str, content: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        Self {
            kind,
            source: source.to_string(),
            digest_sha256: hex::encode(hasher.finalize()),
            content_chars: content.chars().count(),
            recorded_at: Utc::now(),
        }
    }
}

/// Collaborator that receives security events. Implementations must be safe
/// to call from concurrent pipeline instances.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: SecurityEvent);
}

/// Default sink: structured `tracing` output on the warn level.
#[derive(Debug, Default)]
pub struct TracingAudit;

impl AuditSink for TracingAudit {
    fn record(&self, event: SecurityEvent) {
        tracing::warn!(
            kind = event.kind.as_str(),
            source = %event.source,
            digest = %event.digest_sha256,
            chars = event.content_chars,
            "security event"
        );
    }
}

/// In-memory sink for tests and diagnostics.
#[derive(Debug, Default)]
pub struct MemoryAudit {
    events: Mutex<Vec<SecurityEvent>>,
}

impl MemoryAudit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SecurityEvent> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn count_of(&self, kind: SecurityEventKind) -> usize {
        self.events().iter().filter(|e| e.kind == kind).count()
    }
}

impl AuditSink for MemoryAudit {
    fn record(&self, event: SecurityEvent) {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(event);
    }
}
