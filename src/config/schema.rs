use crate::roles::RolesConfig;
use anyhow::{Context, Result};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

// ── Top-level config ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Workspace directory - computed from home, not serialized
    #[serde(skip)]
    pub workspace_dir: PathBuf,
    /// Path to config.toml - computed from home, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub context: ContextConfig,

    #[serde(default)]
    pub lookup: LookupConfig,

    #[serde(default)]
    pub actions: ActionsConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub roles: RolesConfig,
}

// ── LLM completion service ───────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible completion endpoint.
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".into()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".into()
}

fn default_temperature() -> f64 {
    0.7
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key: None,
            model: default_llm_model(),
            temperature: default_temperature(),
        }
    }
}

// ── Context aggregation ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Hard cap on total assembled context characters.
    #[serde(default = "default_char_budget")]
    pub char_budget: usize,
    /// Top-k notes fragments pulled from the similarity index.
    #[serde(default = "default_notes_k")]
    pub notes_k: usize,
    #[serde(default = "default_tasks_n")]
    pub tasks_n: usize,
    #[serde(default = "default_events_n")]
    pub events_n: usize,
    #[serde(default = "default_mail_n")]
    pub mail_n: usize,
    /// Timeout for the notes similarity search.
    #[serde(default = "default_notes_timeout")]
    pub notes_timeout_secs: u64,
    /// Timeout for each of the tasks/calendar/mail reads.
    #[serde(default = "default_provider_timeout")]
    pub provider_timeout_secs: u64,
    /// Sources truncated first when the char budget is exceeded.
    #[serde(default = "default_truncation_order")]
    pub truncation_order: Vec<String>,
}

fn default_char_budget() -> usize {
    24_000
}

fn default_notes_k() -> usize {
    5
}

fn default_tasks_n() -> usize {
    10
}

fn default_events_n() -> usize {
    15
}

fn default_mail_n() -> usize {
    10
}

fn default_notes_timeout() -> u64 {
    15
}

fn default_provider_timeout() -> u64 {
    20
}

fn default_truncation_order() -> Vec<String> {
    vec![
        "email".into(),
        "calendar".into(),
        "tasks".into(),
        "notes".into(),
    ]
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            char_budget: default_char_budget(),
            notes_k: default_notes_k(),
            tasks_n: default_tasks_n(),
            events_n: default_events_n(),
            mail_n: default_mail_n(),
            notes_timeout_secs: default_notes_timeout(),
            provider_timeout_secs: default_provider_timeout(),
            truncation_order: default_truncation_order(),
        }
    }
}

// ── Web lookup (search / fetch directives) ───────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupConfig {
    #[serde(default = "default_true")]
    pub enable_search: bool,
    #[serde(default = "default_true")]
    pub enable_fetch: bool,
    /// SearxNG-style JSON search endpoint. Search is disabled when unset.
    #[serde(default)]
    pub search_endpoint: Option<String>,
    #[serde(default = "default_search_timeout")]
    pub search_timeout_secs: u64,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_fetch_max_chars")]
    pub fetch_max_chars: usize,
    #[serde(default = "default_search_results")]
    pub max_results: usize,
    /// Per-request directive budgets.
    #[serde(default = "default_directive_budget")]
    pub max_searches: usize,
    #[serde(default = "default_directive_budget")]
    pub max_fetches: usize,
}

fn default_true() -> bool {
    true
}

fn default_search_timeout() -> u64 {
    10
}

fn default_fetch_timeout() -> u64 {
    15
}

fn default_fetch_max_chars() -> usize {
    50_000
}

fn default_search_results() -> usize {
    5
}

fn default_directive_budget() -> usize {
    3
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            enable_search: true,
            enable_fetch: true,
            search_endpoint: None,
            search_timeout_secs: default_search_timeout(),
            fetch_timeout_secs: default_fetch_timeout(),
            fetch_max_chars: default_fetch_max_chars(),
            max_results: default_search_results(),
            max_searches: default_directive_budget(),
            max_fetches: default_directive_budget(),
        }
    }
}

// ── Action store ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionsConfig {
    /// Database path, defaults to `<workspace>/actions.db`.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    /// Terminal actions older than this are eligible for purge.
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
}

fn default_retention_hours() -> u64 {
    48
}

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            retention_hours: default_retention_hours(),
        }
    }
}

// ── Gateway ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_host")]
    pub host: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_gateway_host() -> String {
    "127.0.0.1".into()
}

fn default_gateway_port() -> u16 {
    3000
}

fn default_request_timeout() -> u64 {
    120
}

fn default_max_body_bytes() -> usize {
    131_072
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
            request_timeout_secs: default_request_timeout(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

// ── Load / init ──────────────────────────────────────────────────

impl Config {
    /// Load `~/.adjutant/config.toml`, writing the default config on first run.
    pub fn load_or_init() -> Result<Self> {
        let user_dirs = UserDirs::new().context("resolve home directory")?;
        let workspace = user_dirs.home_dir().join(".adjutant");
        Self::load_or_init_at(&workspace)
    }

    /// Load from an explicit workspace directory (used by tests and the CLI
    /// `--config` override).
    pub fn load_or_init_at(workspace: &Path) -> Result<Self> {
        let config_path = workspace.join("config.toml");

        let mut config = if config_path.exists() {
            let contents = fs::read_to_string(&config_path)
                .with_context(|| format!("read config at {}", config_path.display()))?;
            toml::from_str::<Self>(&contents)
                .with_context(|| format!("parse config at {}", config_path.display()))?
        } else {
            fs::create_dir_all(workspace)
                .with_context(|| format!("create workspace at {}", workspace.display()))?;
            let default = Self::default();
            let rendered =
                toml::to_string_pretty(&default).context("serialize default config")?;
            fs::write(&config_path, rendered)
                .with_context(|| format!("write default config to {}", config_path.display()))?;
            default
        };

        config.workspace_dir = workspace.to_path_buf();
        config.config_path = config_path;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.context.char_budget == 0 {
            anyhow::bail!("context.char_budget must be greater than zero");
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            anyhow::bail!("llm.temperature must be between 0.0 and 2.0");
        }
        if self.lookup.fetch_max_chars == 0 {
            anyhow::bail!("lookup.fetch_max_chars must be greater than zero");
        }
        Ok(())
    }

    /// Resolved action database path.
    pub fn actions_db_path(&self) -> PathBuf {
        self.actions
            .db_path
            .clone()
            .unwrap_or_else(|| self.workspace_dir.join("actions.db"))
    }
}
