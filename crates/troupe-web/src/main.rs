//! Serve one agent over HTTP.
//!
//! Reads the API key from the `OPENROUTER_KEY` environment variable unless
//! the config file carries a credential.
//!
//! # Examples
//!
//! ```sh
//! # Agent described in a JSON file
//! troupe-web --config researcher.json --bind 0.0.0.0:8000
//!
//! # Ad-hoc agent from flags
//! troupe-web --name helper --model openai/gpt-4o --system "You are concise."
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use troupe::prelude::*;
use troupe_web::{WebConfig, spawn_web};

/// Serve a troupe agent over HTTP with server-sent events.
#[derive(Parser)]
#[command(name = "troupe-web")]
struct Cli {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:8000")]
    bind: SocketAddr,

    /// Agent config file (JSON). Flags below override its fields.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Agent name, used when no config file is given.
    #[arg(long, default_value = "assistant")]
    name: String,

    /// Model name.
    #[arg(long)]
    model: Option<String>,

    /// Model provider prefix.
    #[arg(long)]
    provider: Option<String>,

    /// System prompt.
    #[arg(long)]
    system: Option<String>,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

fn load_config(cli: &Cli) -> AgentResult<AgentConfig> {
    let mut config = match &cli.config {
        Some(path) => AgentConfig::load(path)?,
        None => AgentConfig::new(cli.name.clone(), ModelBinding::new(DEFAULT_MODEL)),
    };
    if let Some(model) = &cli.model {
        config.model.model_name = model.clone();
    }
    if let Some(provider) = &cli.provider {
        config.model = config.model.clone().with_provider(provider.clone());
    }
    if let Some(system) = &cli.system {
        config.system_prompt = system.clone();
    }
    Ok(config)
}

async fn build_agent(config: &AgentConfig) -> AgentResult<AgentRuntime<SystemPromptPersona>> {
    let persona =
        SystemPromptPersona::new(config.system_prompt.clone()).with_description(config.description.clone());
    let mut runtime = AgentRuntime::builder(config.metadata(), persona)
        .with_options(config.runtime_options()?)
        .build()?;

    if !config.tool_servers.is_empty() {
        let count = runtime.load_mcp_tools(&config.tool_servers).await?;
        info!("Loaded {count} remote tool(s)");
    }
    Ok(runtime)
}

async fn run(cli: Cli) -> Result<(), String> {
    let config = load_config(&cli).map_err(|e| e.to_string())?;
    let agent = build_agent(&config).await.map_err(|e| e.to_string())?;
    info!(
        "Serving agent '{}' on model {}",
        config.name,
        config.model.identifier()
    );

    let web = WebConfig { bind_addr: cli.bind };
    let addr = spawn_web(Arc::new(agent), web)
        .await
        .map_err(|e| format!("failed to bind {}: {e}", cli.bind))?;
    println!("POST http://{addr}/responses");

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("failed to wait for shutdown signal: {e}"))?;
    info!("Shutting down");
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
