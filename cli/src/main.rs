// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Veracity CLI
//!
//! The `veracity` binary runs the reality-check orchestrator.
//!
//! ## Commands
//!
//! - `veracity serve` - Run the HTTP server
//! - `veracity config show|validate` - Configuration management

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use veracity_core::application::StandardAnalysisService;
use veracity_core::domain::config::{ServiceConfig, StorageConfig};
use veracity_core::domain::credit::CreditLedger;
use veracity_core::domain::repository::AnalysisRepository;
use veracity_core::infrastructure::db::Database;
use veracity_core::infrastructure::providers::build_adapters;
use veracity_core::infrastructure::repositories::{
    InMemoryAnalysisRepository, InMemoryCreditLedger, PostgresAnalysisRepository,
    PostgresCreditLedger,
};
use veracity_core::presentation::api;

/// Veracity - multi-provider reality checks for AI responses
#[derive(Parser)]
#[command(name = "veracity")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "VERACITY_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// HTTP API host (overrides the configured value)
    #[arg(long, global = true, env = "VERACITY_HOST")]
    host: Option<String>,

    /// HTTP API port (overrides the configured value)
    #[arg(long, global = true, env = "VERACITY_PORT")]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "VERACITY_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve,

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration
    Show,
    /// Validate the configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    match cli.command {
        Some(Commands::Serve) => serve(cli).await,
        Some(Commands::Config { command }) => handle_config(command, cli.config),
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

fn load_config(path: Option<PathBuf>) -> Result<ServiceConfig> {
    let path = path.context("no configuration file given; pass --config or set VERACITY_CONFIG_PATH")?;
    ServiceConfig::load(&path)
}

async fn serve(cli: Cli) -> Result<()> {
    let config = load_config(cli.config)?;

    let (repository, ledger): (Arc<dyn AnalysisRepository>, Arc<dyn CreditLedger>) =
        match &config.storage {
            StorageConfig::InMemory => {
                info!("using in-memory storage; state is lost on restart");
                (
                    Arc::new(InMemoryAnalysisRepository::new()),
                    Arc::new(InMemoryCreditLedger::new()),
                )
            }
            StorageConfig::Postgres { connection_string } => {
                let db = Database::new(connection_string)
                    .await
                    .context("Failed to connect to PostgreSQL")?;
                db.migrate().await.context("Failed to run migrations")?;
                (
                    Arc::new(PostgresAnalysisRepository::new(db.clone())),
                    Arc::new(PostgresCreditLedger::new(db)),
                )
            }
        };

    let adapters = build_adapters(&config.providers)?;
    info!(
        providers = adapters.len(),
        cost = config.orchestrator.cost_per_analysis,
        "provider panel ready"
    );

    let service = Arc::new(StandardAnalysisService::new(
        repository,
        ledger,
        adapters,
        config.orchestrator.clone(),
    ));

    let host = cli.host.unwrap_or_else(|| config.server.host.clone());
    let port = cli.port.unwrap_or(config.server.port);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("listening on http://{}", addr);

    axum::serve(listener, api::app(service)).await?;
    Ok(())
}

fn handle_config(command: ConfigCommand, path: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            let config = load_config(path)?;
            println!("{}", serde_yaml::to_string(&config)?);
        }
        ConfigCommand::Validate => {
            let config = load_config(path)?;
            let enabled = config.providers.iter().filter(|p| p.enabled).count();
            println!(
                "{} {} enabled provider(s), storage: {}",
                "Configuration is valid.".green(),
                enabled,
                match config.storage {
                    StorageConfig::InMemory => "in-memory",
                    StorageConfig::Postgres { .. } => "postgres",
                }
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(yaml: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        file
    }

    #[test]
    fn load_config_reads_a_valid_manifest() {
        let file = write_config(
            r#"
storage:
  backend: in-memory
providers:
  - name: openai
    type: openai
    model: gpt-4o-mini
    api_key: literal-key
"#,
        );
        let config = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.providers.len(), 1);
    }

    #[test]
    fn load_config_rejects_an_invalid_manifest() {
        // No enabled providers fails validation at load time
        let file = write_config("providers: []\n");
        assert!(load_config(Some(file.path().to_path_buf())).is_err());
    }

    #[test]
    fn load_config_requires_a_path() {
        let err = load_config(None).unwrap_err();
        assert!(err.to_string().contains("VERACITY_CONFIG_PATH"));
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}
