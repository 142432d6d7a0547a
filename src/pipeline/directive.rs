//! Incremental directive detection over streamed completion text.
//!
//! Directives are single lines of the form `SEARCH: <query>` or
//! `FETCH: <url>` emitted by the model mid-response. The scanner is an
//! incremental state machine: it forwards text as soon as it provably cannot
//! be part of a directive and holds back only the minimal unterminated
//! suffix that could still complete a marker line. Directive lines are
//! consumed, never forwarded.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectiveKind {
    Search,
    Fetch,
}

impl DirectiveKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Fetch => "fetch",
        }
    }
}

/// An in-band lookup instruction parsed from generation output. Ephemeral;
/// consumed by the generation loop and never surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub kind: DirectiveKind,
    pub payload: String,
}

/// Output of feeding one delta (or finishing) the scanner.
#[derive(Debug, Default)]
pub struct ScanOutput {
    /// Text safe to forward to the caller.
    pub text: String,
    /// A completed directive, if one was found. Text after the directive
    /// line in the same delta is intentionally dropped; the caller abandons
    /// the superseded stream on detection.
    pub directive: Option<Directive>,
}

const MARKERS: [&str; 2] = ["SEARCH:", "FETCH:"];

#[derive(Debug, Default)]
pub struct DirectiveScanner {
    /// Unterminated line suffix that could still become a directive.
    carry: String,
    /// The current line already had text forwarded, so it can no longer
    /// start a directive.
    mid_line: bool,
}

impl DirectiveScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one streamed delta.
    pub fn push(&mut self, delta: &str) -> ScanOutput {
        let mut combined = std::mem::take(&mut self.carry);
        combined.push_str(delta);

        let mut text = String::new();
        let mut rest = combined.as_str();

        while let Some(pos) = rest.find('\n') {
            let (line_with_newline, remainder) = rest.split_at(pos + 1);
            rest = remainder;

            if self.mid_line {
                text.push_str(line_with_newline);
                self.mid_line = false;
                continue;
            }

            let line = line_with_newline.trim_end_matches(['\n', '\r']);
            if let Some(directive) = parse_directive(line) {
                return ScanOutput {
                    text,
                    directive: Some(directive),
                };
            }
            text.push_str(line_with_newline);
        }

        if !rest.is_empty() {
            if self.mid_line || !could_start_directive(rest) {
                text.push_str(rest);
                self.mid_line = true;
            } else {
                self.carry = rest.to_string();
            }
        }

        ScanOutput {
            text,
            directive: None,
        }
    }

    /// Flush the held suffix at end of stream. A directive line without a
    /// trailing newline still counts.
    pub fn finish(&mut self) -> ScanOutput {
        let carry = std::mem::take(&mut self.carry);
        if carry.is_empty() {
            return ScanOutput::default();
        }
        if !self.mid_line
            && let Some(directive) = parse_directive(carry.trim_end_matches(['\n', '\r']))
        {
            return ScanOutput {
                text: String::new(),
                directive: Some(directive),
            };
        }
        ScanOutput {
            text: carry,
            directive: None,
        }
    }
}

fn parse_directive(line: &str) -> Option<Directive> {
    let trimmed = line.trim_start();
    for (marker, kind) in [
        ("SEARCH:", DirectiveKind::Search),
        ("FETCH:", DirectiveKind::Fetch),
    ] {
        if let Some(payload) = trimmed.strip_prefix(marker) {
            let payload = payload.trim();
            if payload.is_empty() {
                return None;
            }
            return Some(Directive {
                kind,
                payload: payload.to_string(),
            });
        }
    }
    None
}

/// Whether a partial line could still grow into a directive marker.
fn could_start_directive(partial: &str) -> bool {
    let candidate = partial.trim_start();
    MARKERS
        .iter()
        .any(|m| candidate.starts_with(m) || m.starts_with(candidate))
}
