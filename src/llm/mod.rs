//! Opaque completion service interface.
//!
//! The pipeline treats the LLM as a black-box `prompt -> text stream`
//! function. Retries, provider failover, and token accounting belong to the
//! implementation behind [`CompletionClient`], never to the pipeline.

mod compat;

pub use compat::CompatClient;

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

pub type TokenStream = Pin<Box<dyn Stream<Item = anyhow::Result<String>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub system: String,
    pub turns: Vec<Turn>,
    pub model: String,
    pub temperature: f64,
}

/// Streaming text completion. One call, one response stream; implementations
/// own their timeouts and never retry on behalf of the pipeline.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn stream(&self, request: &CompletionRequest) -> anyhow::Result<TokenStream>;
}
