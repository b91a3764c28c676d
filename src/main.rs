//! DenKV - Durable Replicated In-Memory Key-Value Store
//!
//! Binary entry point: `serve` runs a node from a configuration file,
//! `client` opens an interactive session against a running node.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use denkv::client::Client;
use denkv::config::{Config, LoggingConfig};
use denkv::error::{Error, Result};

/// DenKV - durable replicated in-memory key-value store
#[derive(Parser)]
#[command(name = "denkv")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a DenKV node
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "denkv.toml")]
        config: PathBuf,
    },

    /// Open an interactive client session
    Client {
        /// Server host
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Server port
        #[arg(long, default_value_t = 3223)]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config } => {
            let config = Config::from_file(&config)?;
            init_logging(&config.logging)?;
            tracing::info!("Starting DenKV node");
            denkv::app::run(config).await
        }
        Commands::Client { host, port } => Client::new(&host, port).run(),
    }
}

/// Install the tracing subscriber according to the logging config
fn init_logging(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));
    let json = config.format.eq_ignore_ascii_case("json");

    match config.output.as_str() {
        "stdout" | "" => {
            let builder = tracing_subscriber::fmt().with_env_filter(filter);
            if json {
                builder.json().init();
            } else {
                builder.init();
            }
        }
        path => {
            let file = std::fs::File::create(path)
                .map_err(|e| Error::Config(format!("cannot open log output {path:?}: {e}")))?;
            let builder = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false);
            if json {
                builder.json().init();
            } else {
                builder.init();
            }
        }
    }

    Ok(())
}
