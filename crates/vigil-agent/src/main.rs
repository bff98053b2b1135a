use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use vigil_agent::{Agent, AgentOptions, ExtensionRegistry};
use vigil_transport::MemoryTransport;
use vigil_types::Settings;

/// Vigil -- host monitoring agent.
#[derive(Parser, Debug)]
#[command(name = "vigil-agent", version, about)]
struct Cli {
    /// Path to the JSON settings file
    #[arg(long, short, default_value = "config.json")]
    config: PathBuf,

    /// Increase logging verbosity (RUST_LOG=debug)
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(long, short, global = true)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let raw = std::fs::read_to_string(&cli.config)
        .with_context(|| format!("failed to read settings file {}", cli.config.display()))?;
    let root = serde_json::from_str(&raw)
        .with_context(|| format!("invalid settings file {}", cli.config.display()))?;
    let settings = Settings::new(root);

    // Loopback broker: runnable without external infrastructure. A real
    // deployment swaps in a broker-backed Transport implementation.
    let transport = Arc::new(MemoryTransport::new());

    let agent = Agent::new(
        settings,
        transport,
        ExtensionRegistry::new(),
        AgentOptions::default(),
    )?;
    agent.start().await?;
    info!(version = vigil_agent::VERSION, "agent started");

    wait_for_shutdown_signal().await?;
    agent.stop().await;
    Ok(())
}

/// Block until SIGINT or SIGTERM.
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
    let mut terminate = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;

    tokio::select! {
        _ = interrupt.recv() => info!("interrupt received"),
        _ = terminate.recv() => info!("termination signal received"),
    }
    Ok(())
}
