use adjutant::actions::{ActionExecutor, ActionStore, ProviderWriters};
use adjutant::config::{Config, ConfigHandle};
use adjutant::llm::CompatClient;
use adjutant::lookup::{HttpPageFetcher, HttpWebSearch, PageFetcher, WebSearch};
use adjutant::pipeline::{Pipeline, PipelineParams};
use adjutant::security::{Sanitizer, TracingAudit};
use adjutant::sources::SessionContext;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "adjutant", version, about = "Personal AI assistant pipeline")]
struct Cli {
    /// Workspace directory holding config.toml (default: ~/.adjutant)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the chat/action gateway
    Serve,
    /// Purge terminal actions older than the retention window. Meant to be
    /// invoked by an external scheduler (cron or similar).
    Purge {
        /// Override the configured retention window, in hours
        #[arg(long)]
        hours: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let cli = Cli::parse();
    let config = match cli.config {
        Some(ref workspace) => Config::load_or_init_at(workspace)?,
        None => Config::load_or_init()?,
    };

    match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Purge { hours } => purge(config, hours).await,
    }
}

async fn serve(config: Config) -> Result<()> {
    let audit = Arc::new(TracingAudit);
    let sanitizer = Arc::new(Sanitizer::new(audit.clone())?);

    let store = Arc::new(ActionStore::open(&config.actions_db_path()).await?);
    let llm = Arc::new(CompatClient::new(&config.llm)?);

    let search: Option<Arc<dyn WebSearch>> = match config.lookup.search_endpoint {
        Some(ref endpoint) if config.lookup.enable_search => Some(Arc::new(HttpWebSearch::new(
            endpoint,
            &config.lookup,
            sanitizer.clone(),
        )?)),
        _ => None,
    };
    let fetcher: Option<Arc<dyn PageFetcher>> = if config.lookup.enable_fetch {
        Some(Arc::new(HttpPageFetcher::new(
            &config.lookup,
            sanitizer.clone(),
        )?))
    } else {
        None
    };

    let handle = ConfigHandle::new(config);

    let pipeline = Arc::new(Pipeline::new(PipelineParams {
        config: handle.clone(),
        audit,
        llm,
        search,
        fetcher,
        store,
        sink: None,
    })?);

    // Data providers are linked per deployment; an unlinked session answers
    // from the conversation alone and every source contributes nothing.
    let session = SessionContext::unlinked("local");
    let executor = Arc::new(ActionExecutor::new(ProviderWriters::default()));

    adjutant::gateway::serve(&handle, pipeline, executor, session).await
}

async fn purge(config: Config, hours: Option<u64>) -> Result<()> {
    let store = ActionStore::open(&config.actions_db_path()).await?;
    let window = chrono::Duration::hours(i64::try_from(
        hours.unwrap_or(config.actions.retention_hours),
    )?);

    let removed = store.purge_older_than(window).await?;
    tracing::info!(removed, "purged terminal actions");
    println!("purged {removed} terminal actions");
    Ok(())
}
