//! reqlog - request-logging record service over an embedded SQLite store
//!
//! Serves user/post records and records every request it handles, with
//! endpoints to page and filter the recorded log.

use std::path::Path;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reqlog::config::{Config, Resolution};
use reqlog::storage::StoreCell;

#[derive(Parser)]
#[command(name = "reqlog")]
#[command(about = "Request-logging record service over an embedded SQLite store")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,

        /// Override listen address
        #[arg(short, long)]
        listen: Option<String>,

        /// Override database path (`memory` for an ephemeral store)
        #[arg(short, long)]
        database: Option<String>,
    },

    /// Validate configuration file
    Check {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },

    /// Open the store and apply pending migrations
    Migrate {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,

        /// Override database path
        #[arg(short, long)]
        database: Option<String>,
    },
}

/// Load `path` when it exists, otherwise defaults with env resolution.
fn load_config(path: &str) -> anyhow::Result<(Config, Resolution, bool)> {
    if Path::new(path).exists() {
        let (config, resolution) = Config::from_file(path)?;
        Ok((config, resolution, true))
    } else {
        let (config, resolution) = Config::from_env()?;
        Ok((config, resolution, false))
    }
}

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("reqlog={level},tower_http={level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config: config_path,
            listen,
            database,
        } => {
            let (mut config, resolution, from_file) = load_config(&config_path)?;
            init_tracing(&config.logging.level);
            log_source(&config_path, from_file);

            if let Some(addr) = listen {
                tracing::info!(listen = %addr, "Override listen address");
                config.server.listen = addr;
            }
            if let Some(path) = database {
                tracing::info!(database = %path, "Override database path");
                config.database.path = path;
            }
            tracing::info!(
                database = %config.database.path,
                source = %resolution.database_path,
                "Database location resolved"
            );

            let stores = StoreCell::new();
            let store = stores.get_or_open(&config.database).await?;
            reqlog::server::run_server(config, store).await
        }

        Commands::Check {
            config: config_path,
        } => {
            let (config, resolution, from_file) = load_config(&config_path)?;
            init_tracing(&config.logging.level);
            log_source(&config_path, from_file);

            println!("Configuration is valid.");
            println!("  listen:         {}", config.server.listen);
            println!(
                "  database:       {} ({})",
                config.database.path, resolution.database_path
            );
            println!("  read pool max:  {}", config.database.read_max_connections);
            println!("  max body bytes: {}", config.server.max_body_bytes);
            println!("  log requests:   {}", config.logging.log_requests);
            match &config.telemetry.endpoint {
                Some(endpoint) => println!(
                    "  telemetry:      {} (key: {})",
                    endpoint, resolution.telemetry_key
                ),
                None => println!("  telemetry:      disabled"),
            }
            Ok(())
        }

        Commands::Migrate {
            config: config_path,
            database,
        } => {
            let (mut config, _, from_file) = load_config(&config_path)?;
            init_tracing(&config.logging.level);
            log_source(&config_path, from_file);

            if let Some(path) = database {
                config.database.path = path;
            }
            let stores = StoreCell::new();
            let store = stores.get_or_open(&config.database).await?;
            tracing::info!(location = %store.location(), "Migrations applied");
            store.close().await;
            Ok(())
        }
    }
}

fn log_source(path: &str, from_file: bool) {
    if from_file {
        tracing::info!(config = %path, "Loaded configuration");
    } else {
        tracing::warn!(config = %path, "Config file not found, using defaults and environment");
    }
}
