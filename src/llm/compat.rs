use super::{CompletionClient, CompletionRequest, TokenStream, TurnRole};
use crate::config::LlmConfig;
use crate::error::LlmError;
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const COMPLETION_TIMEOUT_SECS: u64 = 90;

/// Client for any OpenAI-compatible `/chat/completions` endpoint.
///
/// Requests are issued non-streaming and the full completion is surfaced as
/// a single-chunk [`TokenStream`]; the pipeline's incremental scanner handles
/// both granularities identically.
pub struct CompatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    temperature: f64,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireChoiceMessage,
}

#[derive(Deserialize)]
struct WireChoiceMessage {
    content: Option<String>,
}

impl CompatClient {
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(COMPLETION_TIMEOUT_SECS))
            .build()
            .context("build completion HTTP client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn wire_messages<'a>(request: &'a CompletionRequest) -> Vec<WireMessage<'a>> {
        let mut messages = Vec::with_capacity(request.turns.len() + 1);
        messages.push(WireMessage {
            role: "system",
            content: &request.system,
        });
        for turn in &request.turns {
            messages.push(WireMessage {
                role: match turn.role {
                    TurnRole::User => "user",
                    TurnRole::Assistant => "assistant",
                },
                content: &turn.content,
            });
        }
        messages
    }
}

#[async_trait]
impl CompletionClient for CompatClient {
    async fn stream(&self, request: &CompletionRequest) -> anyhow::Result<TokenStream> {
        let body = WireRequest {
            model: &request.model,
            temperature: request.temperature,
            messages: Self::wire_messages(request),
        };

        let mut http = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(ref key) = self.api_key {
            http = http.bearer_auth(key);
        }

        let response = http.send().await.context("send completion request")?;
        let status = response.status();
        if !status.is_success() {
            return Err(LlmError::Request(format!("endpoint returned {status}")).into());
        }

        let parsed: WireResponse = response
            .json()
            .await
            .context("decode completion response")?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|content| !content.is_empty())
            .ok_or(LlmError::EmptyResponse)?;

        Ok(Box::pin(futures_util::stream::once(async move { Ok(text) })))
    }
}
