use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use extension_host::{
    HOST_API_VERSION, HostConfig, ServiceRegistry,
    plugin::{PluginCatalog, PluginLoader},
    server::{Host, shutdown_signal},
};

/// Extension Host - loads extensions and serves their routers
#[derive(Parser, Debug)]
#[command(name = "extension-host")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load extensions and serve (default)
    Serve,

    /// Show discovered references and whether they would load, without invoking them
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let config = if let Some(config_path) = cli.config {
        info!(path = %config_path.display(), "Loading configuration");
        HostConfig::from_file(&config_path)?
    } else {
        HostConfig::from_env()?
    };

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::List { json } => list(&config, json),
        Commands::Serve => serve(config).await,
    }
}

fn list(config: &HostConfig, json: bool) -> anyhow::Result<()> {
    let loader = PluginLoader::new(
        Arc::new(PluginCatalog::from_inventory()),
        Arc::new(ServiceRegistry::new()),
    );
    let records = loader.preflight(&config.discovery());

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    println!("Host API version {HOST_API_VERSION}");
    for record in &records {
        let outcome = if record.outcome.is_loaded() {
            "ok".to_string()
        } else {
            serde_json::to_value(record.outcome)?
                .as_str()
                .unwrap_or("failed")
                .to_string()
        };
        println!(
            "{:<20} {:<12} {:<18} {}",
            outcome,
            record.kind.unwrap_or("-"),
            record.source.to_string(),
            record.reference
        );
        if let Some(ref error) = record.error {
            println!("    {error}");
        }
    }
    Ok(())
}

async fn serve(config: HostConfig) -> anyhow::Result<()> {
    let address = config.address();
    let socket_addr: SocketAddr = address
        .parse()
        .map_err(|e| anyhow!("Invalid server address '{}': {}", address, e))?;

    let host = Host::build(config);
    let report = host.state.report();
    info!(
        loaded = report.loaded().count(),
        failed = report.failed().count(),
        "Extensions loaded"
    );

    let listener = TcpListener::bind(&socket_addr).await?;
    host.run(listener, shutdown_signal()).await?;

    Ok(())
}
