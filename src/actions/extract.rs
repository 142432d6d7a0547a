use super::types::{ActionPayload, ProposedAction};
use anyhow::Context;
use regex::Regex;

/// Result of scanning a final response: what the user sees and the actions
/// the model proposed.
#[derive(Debug, Clone)]
pub struct Extraction {
    /// Narrative text with all marker syntax stripped.
    pub display_text: String,
    /// Valid proposals in extraction order, all `pending`.
    pub actions: Vec<ProposedAction>,
}

/// Parses ```ACTION fenced blocks out of fully assembled response text.
///
/// A block that fails schema validation is dropped silently from the action
/// list; the surrounding narrative is preserved either way. Malformed model
/// output must never corrupt the user-visible answer.
pub struct ActionExtractor {
    block: Regex,
}

const DEFAULT_REASON: &str = "Proposed by the assistant";

impl ActionExtractor {
    pub fn new() -> anyhow::Result<Self> {
        let block = Regex::new(r"(?s)```ACTION\s*\n?(.*?)\n?```").context("compile action block pattern")?;
        Ok(Self { block })
    }

    pub fn extract(&self, response_text: &str) -> Extraction {
        let mut actions = Vec::new();

        for capture in self.block.captures_iter(response_text) {
            let Some(raw) = capture.get(1) else {
                continue;
            };
            let body = raw.as_str().trim();

            let payload: ActionPayload = match serde_json::from_str(body) {
                Ok(payload) => payload,
                Err(error) => {
                    tracing::debug!(%error, "skipping unparseable ACTION block");
                    continue;
                }
            };
            if let Err(reason) = payload.validate() {
                tracing::debug!(%reason, "skipping schema-invalid ACTION block");
                continue;
            }

            actions.push(ProposedAction::pending(payload, DEFAULT_REASON));
        }

        let stripped = self.block.replace_all(response_text, "");
        let display_text = tidy_whitespace(&stripped);

        Extraction {
            display_text,
            actions,
        }
    }
}

/// Collapse the blank runs left behind by removed blocks.
fn tidy_whitespace(text: &str) -> String {
    let mut out = text.to_string();
    while out.contains("\n\n\n") {
        out = out.replace("\n\n\n", "\n\n");
    }
    out.trim().to_string()
}
