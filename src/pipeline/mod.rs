//! The contextual response pipeline.
//!
//! One request flows `sanitize → aggregate context → select role → generate
//! (with directive interception) → extract actions → persist proposals`.
//! Each invocation is one cooperative unit of work; many run concurrently
//! across sessions.

pub mod directive;
pub mod generator;

pub use directive::{Directive, DirectiveKind, DirectiveScanner};
pub use generator::{GenerationPlan, ResponseGenerator};

use crate::actions::{ActionExtractor, ActionRef, ActionStore};
use crate::config::ConfigHandle;
use crate::context::{Aggregator, SourceToggles};
use crate::llm::{CompletionClient, Turn, TurnRole};
use crate::lookup::{PageFetcher, WebSearch};
use crate::prompt::{PromptBuilder, SystemPromptParams};
use crate::roles::RoleSet;
use crate::security::{AuditSink, Sanitizer, SecurityEvent, SecurityEventKind};
use crate::sources::SessionContext;
use async_trait::async_trait;
use chrono::Utc;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Upper bound on a single user message, matching the gateway validation.
pub const MAX_MESSAGE_CHARS: usize = 10_000;
/// Upper bound on replayed dialogue history.
pub const MAX_HISTORY_MESSAGES: usize = 100;

// ─── Conversation types ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// One immutable turn of a conversation. Ordering is append-only and defines
/// the model's dialogue history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub proposed_actions: Vec<ActionRef>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            sources: Vec::new(),
            proposed_actions: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            sources: Vec::new(),
            proposed_actions: Vec::new(),
        }
    }
}

/// Collaborator receiving completed assistant messages for persistence.
/// Failures are logged and never fail the request.
#[async_trait]
pub trait ConversationSink: Send + Sync {
    async fn append(&self, message: &Message) -> anyhow::Result<()>;
}

// ─── Wire contract ───────────────────────────────────────────────────────────

/// The externally observable streaming protocol: one `meta`, zero or more
/// `content`, then exactly one `done` or `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    Meta { sources: Vec<String> },
    Content { content: String },
    Done,
    Error { message: String },
}

impl ChatEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }
}

/// One chat invocation as received from the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<Message>,
    #[serde(flatten)]
    pub toggles: SourceToggles,
}

// ─── Pipeline ────────────────────────────────────────────────────────────────

/// Dependencies for one pipeline instance. Everything is injected; the
/// pipeline owns no ambient global state.
pub struct PipelineParams {
    pub config: ConfigHandle,
    pub audit: Arc<dyn AuditSink>,
    pub llm: Arc<dyn CompletionClient>,
    pub search: Option<Arc<dyn WebSearch>>,
    pub fetcher: Option<Arc<dyn PageFetcher>>,
    pub store: Arc<ActionStore>,
    pub sink: Option<Arc<dyn ConversationSink>>,
}

pub struct Pipeline {
    config: ConfigHandle,
    audit: Arc<dyn AuditSink>,
    sanitizer: Arc<Sanitizer>,
    llm: Arc<dyn CompletionClient>,
    search: Option<Arc<dyn WebSearch>>,
    fetcher: Option<Arc<dyn PageFetcher>>,
    extractor: Arc<ActionExtractor>,
    store: Arc<ActionStore>,
    sink: Option<Arc<dyn ConversationSink>>,
}

impl Pipeline {
    pub fn new(params: PipelineParams) -> anyhow::Result<Self> {
        let sanitizer = Arc::new(Sanitizer::new(Arc::clone(&params.audit))?);
        let extractor = Arc::new(ActionExtractor::new()?);
        Ok(Self {
            config: params.config,
            audit: params.audit,
            sanitizer,
            llm: params.llm,
            search: params.search,
            fetcher: params.fetcher,
            extractor,
            store: params.store,
            sink: params.sink,
        })
    }

    pub fn store(&self) -> &Arc<ActionStore> {
        &self.store
    }

    /// Run one request and stream the response events.
    ///
    /// The returned stream upholds the wire contract on every path: callers
    /// always observe a terminal event unless they disconnect first.
    pub fn respond(
        &self,
        session: SessionContext,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> impl Stream<Item = ChatEvent> + Send + 'static {
        let config = self.config.clone();
        let audit = Arc::clone(&self.audit);
        let sanitizer = Arc::clone(&self.sanitizer);
        let llm = Arc::clone(&self.llm);
        let search = self.search.clone();
        let fetcher = self.fetcher.clone();
        let extractor = Arc::clone(&self.extractor);
        let store = Arc::clone(&self.store);
        let sink = self.sink.clone();

        async_stream::stream! {
            let cfg = config.load_full();

            // Log-only pre-flight: a manipulated user message is recorded
            // but still answered; the instructions tell the model to treat
            // context as data.
            if sanitizer.contains_injection(&request.message) {
                audit.record(SecurityEvent::new(
                    SecurityEventKind::InjectionAttempt,
                    "user_message",
                    &request.message,
                ));
            }

            let aggregator = Aggregator::new(
                Arc::clone(&sanitizer),
                Arc::clone(&audit),
                cfg.context.clone(),
            );
            let document = aggregator
                .gather(&session, &request.toggles, &request.message)
                .await;

            let roles = RoleSet::from_config(&cfg.roles);
            let profile = roles.select(&request.message);
            let instructions = roles.merged_instructions(profile);

            let now = Utc::now().format("%Y-%m-%d %H:%M").to_string();
            let system = match PromptBuilder::new().build_system(&SystemPromptParams {
                instructions: &instructions,
                capabilities: profile.capabilities,
                document: &document,
                current_date: &now,
            }) {
                Ok(system) => system,
                Err(error) => {
                    tracing::error!(%error, "prompt assembly failed");
                    yield ChatEvent::Meta { sources: document.sources.clone() };
                    yield ChatEvent::Error {
                        message: "The assistant could not complete this response. Please try again."
                            .to_string(),
                    };
                    return;
                }
            };

            let history: Vec<Turn> = request
                .history
                .iter()
                .map(|m| Turn {
                    role: match m.role {
                        MessageRole::User => TurnRole::User,
                        MessageRole::Assistant => TurnRole::Assistant,
                    },
                    content: m.content.clone(),
                })
                .collect();

            let generation_plan = GenerationPlan {
                system,
                history,
                user_message: request.message.clone(),
                sources: document.sources.clone(),
                capabilities: profile.capabilities,
                model: cfg.llm.model.clone(),
                temperature: cfg.llm.temperature,
                max_searches: if cfg.lookup.enable_search { cfg.lookup.max_searches } else { 0 },
                max_fetches: if cfg.lookup.enable_fetch { cfg.lookup.max_fetches } else { 0 },
            };

            let generator = ResponseGenerator::new(llm, search, fetcher, Arc::clone(&sanitizer));
            let inner = generator.stream(generation_plan, cancel);
            futures_util::pin_mut!(inner);

            let mut full_text = String::new();
            let mut terminal: Option<ChatEvent> = None;

            while let Some(event) = inner.next().await {
                if event.is_terminal() {
                    terminal = Some(event);
                    break;
                }
                if let ChatEvent::Content { ref content } = event {
                    full_text.push_str(content);
                }
                yield event;
            }
            // The generator guarantees a terminal event; the fallback is
            // unreachable in practice but keeps the contract airtight.
            let terminal = terminal.unwrap_or(ChatEvent::Done);

            // Extraction and persistence happen before the terminal event so
            // a client that sees `done` can immediately list its proposals.
            if matches!(terminal, ChatEvent::Done) && !full_text.is_empty() {
                let extraction = extractor.extract(&full_text);
                let mut refs = Vec::new();
                for action in &extraction.actions {
                    match store.create(action).await {
                        Ok(id) => refs.push(ActionRef {
                            id,
                            kind: action.kind(),
                        }),
                        Err(error) => {
                            tracing::warn!(%error, "failed to persist proposed action");
                        }
                    }
                }

                if let Some(ref sink) = sink {
                    let message = Message {
                        role: MessageRole::Assistant,
                        content: extraction.display_text,
                        sources: document.sources.clone(),
                        proposed_actions: refs,
                    };
                    if let Err(error) = sink.append(&message).await {
                        tracing::warn!(%error, "conversation sink append failed");
                    }
                }
            }

            yield terminal;
        }
    }
}
