use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for `adjutant`.
///
/// Each subsystem defines its own error variant. Library callers can match on
/// these to decide recovery strategy; internal code continues to use
/// `anyhow::Result` for ad-hoc context chains.
#[derive(Debug, Error)]
pub enum AdjutantError {
    // ── Config ───────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── LLM completion ──────────────────────────────────────────────────
    #[error("llm: {0}")]
    Llm(#[from] LlmError),

    // ── Context aggregation ─────────────────────────────────────────────
    #[error("context: {0}")]
    Context(#[from] ContextError),

    // ── Web lookup (search / fetch) ─────────────────────────────────────
    #[error("lookup: {0}")]
    Lookup(#[from] LookupError),

    // ── Proposed actions ────────────────────────────────────────────────
    #[error("action: {0}")]
    Action(#[from] ActionError),

    // ── Prompt / Template ───────────────────────────────────────────────
    #[error("prompt: {0}")]
    Prompt(#[from] PromptError),

    // ── Gateway ─────────────────────────────────────────────────────────
    #[error("gateway: {0}")]
    Gateway(#[from] GatewayError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("hot-reload failed: {0}")]
    HotReload(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── LLM completion errors ──────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("completion request failed: {0}")]
    Request(String),

    #[error("streaming error: {0}")]
    Streaming(String),

    #[error("completion returned no content")]
    EmptyResponse,
}

// ─── Context aggregation errors ─────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("provider {provider} failed: {message}")]
    Provider { provider: String, message: String },

    #[error("provider {provider} timed out after {secs}s")]
    Timeout { provider: String, secs: u64 },
}

// ─── Lookup errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("search failed: {0}")]
    Search(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("url blocked: {0}")]
    UrlBlocked(String),

    #[error("unsupported content type: {0}")]
    UnsupportedContent(String),
}

// ─── Action errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("store: {0}")]
    Store(String),

    #[error("execution failed for {kind}: {message}")]
    Execution { kind: String, message: String },

    #[error("no provider configured for {kind}")]
    ProviderUnavailable { kind: String },
}

// ─── Prompt / Template errors ───────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("template render failed: {0}")]
    Render(String),
}

// ─── Gateway errors ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("bind failed: {0}")]
    Bind(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, AdjutantError>;
