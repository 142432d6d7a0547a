pub mod audit;
pub mod sanitize;
pub mod url_guard;

pub use audit::{AuditSink, MemoryAudit, SecurityEvent, SecurityEventKind, TracingAudit};
pub use sanitize::{ContentType, FILTERED_MARKER, InjectionPolicy, Sanitizer, escape_markup};
pub use url_guard::{is_private_host, is_private_ip, validate_fetch_url};
