//! # Command Line Interface
//!
//! `serve` runs the HTTP API with the rotation scheduler; the other commands
//! operate on the same key state and exit.

use chrono::Duration;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::api::start_api_server;
use crate::app::App;
use crate::config::{self, AppConfig};
use crate::keys::KeyType;
use crate::monitor::SecurityEventRepository;
use crate::observability::init_observability;
use crate::{APP_NAME, VERSION};

const CLI_ACTOR: &str = "cli";

#[derive(Parser)]
#[command(name = "keywarden")]
#[command(about = "Signing and encryption key rotation, token issuance and webhook verification")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Database URL override
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API and background maintenance (default)
    Serve,

    /// Rotate a key set now
    Rotate {
        /// signing or encryption
        #[arg(long, value_parser = parse_key_type)]
        key_type: KeyType,
    },

    /// Print the published JSON Web Key Set
    Jwks,

    /// Print key, secret store and security event status
    Status {
        /// Window for persisted event counts, in hours
        #[arg(long, default_value_t = 24)]
        since_hours: i64,
    },
}

fn parse_key_type(raw: &str) -> Result<KeyType, String> {
    raw.parse::<KeyType>().map_err(|e| e.to_string())
}

/// Run CLI commands
pub async fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = config::load()?;
    if let Some(url) = cli.database_url {
        config.database.url = url;
        config.validate()?;
    }
    if cli.verbose {
        config.observability.log_level = "debug".to_string();
    }
    init_observability(&config.observability);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Rotate { key_type } => {
            one_shot(config, |app| async move {
                let outcome = app.state.monitor.force_rotation(key_type, CLI_ACTOR).await?;
                print_json(&outcome)
            })
            .await
        }
        Commands::Jwks => one_shot(config, |app| async move { print_json(&app.state.keys.get_jwks()) }).await,
        Commands::Status { since_hours } => {
            one_shot(config, |app| async move {
                let since = app.state.clock.now() - Duration::hours(since_hours.max(1));
                let persisted =
                    SecurityEventRepository::new(app.state.pool.clone()).count_by_severity(since).await?;
                print_json(&StatusReport { live: app.state.monitor.status(), persisted_since: since, persisted })
            })
            .await
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusReport {
    live: crate::monitor::MonitorStatus,
    persisted_since: chrono::DateTime<chrono::Utc>,
    persisted: std::collections::BTreeMap<crate::monitor::Severity, u64>,
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    info!(app_name = APP_NAME, version = VERSION, "Starting keywarden");
    let server_config = config.server.clone();
    let mut app = App::from_config(config).await?;

    let shutdown = CancellationToken::new();
    let background = app.spawn_background(shutdown.clone());

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Shutdown signal listener failed");
        }
        info!("Shutdown signal received");
        signal.cancel();
    });

    let served = start_api_server(&server_config, app.state.clone(), shutdown.clone()).await;
    shutdown.cancel();
    for handle in background {
        if let Err(e) = handle.await {
            error!(error = %e, "Background task panicked");
        }
    }
    served?;
    Ok(())
}

/// Build the app, run `command`, then flush queued security events.
async fn one_shot<F, Fut>(config: AppConfig, command: F) -> anyhow::Result<()>
where
    F: FnOnce(App) -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<()>>,
{
    let mut app = App::from_config(config).await?;
    let shutdown = CancellationToken::new();
    let writer = app.spawn_event_writer(shutdown.clone());

    let result = command(app).await;

    shutdown.cancel();
    if let Some(writer) = writer {
        writer.await?;
    }
    result
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_rotate_parses_key_type_aliases() {
        let cli = Cli::try_parse_from(["keywarden", "rotate", "--key-type", "aes"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Rotate { key_type: KeyType::Encryption })));
        assert!(Cli::try_parse_from(["keywarden", "rotate", "--key-type", "rsa"]).is_err());
    }

    #[test]
    fn test_serve_is_default() {
        let cli = Cli::try_parse_from(["keywarden"]).unwrap();
        assert!(cli.command.is_none());
    }
}
