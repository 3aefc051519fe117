#[cfg(feature = "cli")]
use affinity_engine::{config::Config, run_server};
#[cfg(feature = "cli")]
use clap::Parser;

/// Relationship-aware chat session server.
#[cfg(feature = "cli")]
#[derive(Debug, Parser)]
#[command(name = "affinity-engine", version, about)]
struct Cli {
    /// Overrides API_HOST
    #[arg(long)]
    host: Option<String>,
    /// Overrides API_PORT
    #[arg(long)]
    port: Option<u16>,
    /// Overrides DATABASE_PATH
    #[arg(long)]
    database: Option<std::path::PathBuf>,
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut cfg = Config::from_env()?;
    if let Some(host) = cli.host {
        cfg.api_host = host;
    }
    if let Some(port) = cli.port {
        cfg.api_port = port;
    }
    if let Some(database) = cli.database {
        cfg.database_path = database;
    }

    run_server(cfg).await
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
