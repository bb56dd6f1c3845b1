use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use chorus_core::types::{
    AggregateRequest, AskRequest, Completion, FanoutRequest, ProviderId,
};
use chorus_core::{
    ExchangeStore, Orchestrator, ProviderClient, ProviderRegistry, ProviderStatus, SessionMemory,
    StatusProbe,
};
use chorus_gateway::GatewayServer;
use chorus_store::Archive;
use config::ChorusConfig;

#[derive(Parser)]
#[command(name = "chorus")]
#[command(version)]
#[command(about = "chorus — ask many model providers at once")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP gateway
    Serve,

    /// Send a one-shot prompt to one or more providers
    Ask {
        /// The prompt to send
        prompt: String,

        /// Provider to ask; repeat for a fan-out (defaults to the first configured provider)
        #[arg(short = 'p', long = "provider")]
        providers: Vec<String>,

        /// Merge all answers into one summary through this provider
        #[arg(long)]
        aggregate: Option<String>,

        /// Style instruction layered onto the system prompt
        #[arg(long)]
        style: Option<String>,

        /// Chat id for conversation memory and history grouping
        #[arg(long)]
        chat: Option<String>,
    },

    /// Probe every configured provider and report reachability
    Status,

    /// Full-text search over recorded prompts and completions
    Search {
        /// The query string
        query: String,

        /// Maximum number of hits
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Show every exchange recorded under a chat
    History {
        /// The chat id to list
        chat_id: String,
    },

    /// Initialize config directory and default config
    Init,

    /// Show current configuration with credentials masked
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Init => cmd_init().await,
        Commands::Config => cmd_config(&cli.config).await,
        Commands::Serve => cmd_serve(&cli.config).await,
        Commands::Ask {
            prompt,
            providers,
            aggregate,
            style,
            chat,
        } => cmd_ask(&cli.config, &prompt, &providers, &aggregate, &style, &chat).await,
        Commands::Status => cmd_status(&cli.config).await,
        Commands::Search { query, limit } => cmd_search(&cli.config, &query, limit).await,
        Commands::History { chat_id } => cmd_history(&cli.config, &chat_id).await,
    }
}

async fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        warn!("Config already exists at {}", config_path.display());
    } else {
        let default_config = include_str!("../../../config/default.toml");
        tokio::fs::write(&config_path, default_config).await?;
        info!("Created default config at {}", config_path.display());
    }

    println!("chorus initialized at {}", config_dir.display());
    println!(
        "Edit {} to configure your providers and API keys.",
        config_path.display()
    );
    Ok(())
}

async fn cmd_config(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = ChorusConfig::load(config_path)?;
    println!("{}", toml::to_string_pretty(&cfg.masked())?);
    Ok(())
}

async fn cmd_serve(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = ChorusConfig::load(config_path)?;
    info!("Starting chorus gateway...");

    let clients = build_clients(&cfg)?;
    let store = open_archive(&cfg)?;

    let orchestrator = Arc::new(Orchestrator::new(
        clients.clone(),
        Arc::clone(&store),
        chorus_core::OrchestratorConfig {
            global_deadline_secs: cfg.orchestrator.global_deadline_secs,
        },
    ));
    let probe = Arc::new(StatusProbe::new(clients));

    let bind = cfg.server.bind_addr()?;
    let server = GatewayServer::new(bind, orchestrator, probe, store);
    let handle = server.spawn();
    println!("chorus gateway running on http://{}", bind);
    println!("Press Ctrl+C to stop.");

    // Wait for shutdown signal
    signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down...");
    handle.abort();

    println!("chorus stopped.");
    Ok(())
}

async fn cmd_ask(
    config_path: &Option<PathBuf>,
    prompt: &str,
    providers: &[String],
    aggregate: &Option<String>,
    style: &Option<String>,
    chat: &Option<String>,
) -> Result<()> {
    let cfg = ChorusConfig::load(config_path)?;
    let clients = build_clients(&cfg)?;
    let store = open_archive(&cfg)?;
    let orchestrator = Orchestrator::new(
        clients,
        store,
        chorus_core::OrchestratorConfig {
            global_deadline_secs: cfg.orchestrator.global_deadline_secs,
        },
    );

    let requested: Vec<ProviderId> = providers.iter().map(|name| ProviderId::new(name)).collect();

    if let Some(aggregator) = aggregate {
        // Merge across every configured provider unless a subset was named.
        let providers = if requested.is_empty() {
            orchestrator.provider_ids()
        } else {
            requested
        };
        let reply = orchestrator
            .ask_aggregate(&AggregateRequest {
                prompt: prompt.to_string(),
                style: style.clone(),
                chat_id: chat.clone(),
                providers,
                aggregator: ProviderId::new(aggregator),
            })
            .await?;
        for completion in &reply.completions {
            print_completion(completion);
        }
        println!();
        println!("{}", reply.summary);
    } else if requested.len() > 1 {
        let reply = orchestrator
            .ask_multi(&FanoutRequest {
                prompt: prompt.to_string(),
                style: style.clone(),
                chat_id: chat.clone(),
                providers: requested,
            })
            .await?;
        for completion in &reply.completions {
            print_completion(completion);
        }
    } else {
        let provider = match requested.into_iter().next() {
            Some(id) => id,
            None => orchestrator
                .provider_ids()
                .into_iter()
                .next()
                .context("No providers configured")?,
        };
        let reply = orchestrator
            .ask(&AskRequest {
                prompt: prompt.to_string(),
                style: style.clone(),
                chat_id: chat.clone(),
                provider,
            })
            .await?;
        if let Some(text) = reply.completions.first().and_then(|c| c.text.as_deref()) {
            println!("{}", text);
        }
    }

    Ok(())
}

async fn cmd_status(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = ChorusConfig::load(config_path)?;
    let clients = build_clients(&cfg)?;
    let probe = StatusProbe::new(clients);

    let report = probe.check_all().await;
    println!("{:<16} {:<24} STATUS", "PROVIDER", "MODEL");
    for health in report {
        let status = match health.status {
            ProviderStatus::Available => "AVAILABLE",
            ProviderStatus::Unavailable => "UNAVAILABLE",
        };
        println!("{:<16} {:<24} {}", health.provider.as_str(), health.model, status);
    }
    Ok(())
}

async fn cmd_search(config_path: &Option<PathBuf>, query: &str, limit: usize) -> Result<()> {
    let cfg = ChorusConfig::load(config_path)?;
    let store = open_archive(&cfg)?;

    let hits = store.search(query, limit).await?;
    if hits.is_empty() {
        println!("No matches.");
        return Ok(());
    }
    for hit in hits {
        match &hit.provider {
            Some(provider) => println!("[{} {}] {}", hit.kind, provider, hit.snippet),
            None => println!("[{}] {}", hit.kind, hit.snippet),
        }
    }
    Ok(())
}

async fn cmd_history(config_path: &Option<PathBuf>, chat_id: &str) -> Result<()> {
    let cfg = ChorusConfig::load(config_path)?;
    let store = open_archive(&cfg)?;

    let prompts = store.prompts_for_chat(chat_id).await?;
    if prompts.is_empty() {
        println!("No history for chat '{}'.", chat_id);
        return Ok(());
    }
    for prompt in prompts {
        println!(
            "{} {}",
            prompt.created_at.format("%Y-%m-%d %H:%M:%S"),
            prompt.text
        );
        let completions = store.completions_for_prompt(&prompt.id).await?;
        for completion in completions {
            print_completion_indented(&completion);
        }
    }
    Ok(())
}

fn print_completion(completion: &Completion) {
    match &completion.text {
        Some(text) => println!("[{}] {}", completion.provider.as_str(), text),
        None => println!(
            "[{}] ({})",
            completion.provider.as_str(),
            completion.outcome
        ),
    }
}

fn print_completion_indented(completion: &Completion) {
    match &completion.text {
        Some(text) => println!("  [{}] {}", completion.provider.as_str(), text),
        None => println!(
            "  [{}] ({})",
            completion.provider.as_str(),
            completion.outcome
        ),
    }
}

fn build_clients(cfg: &ChorusConfig) -> Result<Vec<Arc<ProviderClient>>> {
    if cfg.providers.is_empty() {
        bail!(
            "No providers configured. Add [[providers]] entries to your config and retry."
        );
    }
    let registry = ProviderRegistry::new(cfg.providers.clone())?;
    let memory = Arc::new(SessionMemory::new(cfg.memory.max_messages));
    Ok(registry.build_clients(memory))
}

fn open_archive(cfg: &ChorusConfig) -> Result<Arc<dyn ExchangeStore>> {
    let db_path = shellexpand(&cfg.store.db_path);
    let index_path = shellexpand(&cfg.store.index_path);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::create_dir_all(&index_path)?;

    let archive = Archive::new(&db_path, &index_path)
        .context("Failed to open the exchange archive")?;
    Ok(Arc::new(archive))
}

// Utility: expand a leading ~ in paths. Env vars in the config are already
// expanded at load time.
fn shellexpand(s: &str) -> PathBuf {
    let mut result = s.to_string();
    if result.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            result = format!("{}{}", home.display(), &result[1..]);
        }
    }
    PathBuf::from(result)
}
