use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::adapters::PostgresEscrowStore;
use crate::config::Config;
use crate::ports::EscrowStore;
use crate::services::EscrowLedger;
use crate::{create_app, AppState};

#[derive(Parser)]
#[command(name = "escrow-core")]
#[command(about = "Escrow Core - escrow custody and dispute resolution", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the health endpoint server (default)
    Serve,

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Configuration validation
    Config,

    /// Escrow inspection commands
    #[command(subcommand)]
    Escrow(EscrowCommands),
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

#[derive(Subcommand)]
pub enum EscrowCommands {
    /// Print the number of escrows in each status
    Counts,
}

async fn connect_store(config: &Config) -> anyhow::Result<Arc<dyn EscrowStore>> {
    let pool = crate::db::create_pool(config).await?;
    Ok(Arc::new(PostgresEscrowStore::new(pool)))
}

pub async fn handle_serve(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::create_pool(config).await?;
    crate::db::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    let store: Arc<dyn EscrowStore> = Arc::new(PostgresEscrowStore::new(pool));
    let app = create_app(AppState::new(store));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::create_pool(config).await?;

    tracing::info!("Running database migrations...");
    crate::db::run_migrations(&pool).await?;

    tracing::info!("Database migrations completed");
    println!("✓ Database migrations completed");

    Ok(())
}

pub fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");

    if config.database_max_connections == 0 {
        anyhow::bail!("DATABASE_MAX_CONNECTIONS must be at least 1");
    }

    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!("  Database URL: {}", mask_password(&config.database_url));
    println!("  Database Max Connections: {}", config.database_max_connections);
    println!("  Log Format: {}", config.log_format);

    tracing::info!("Configuration is valid");
    println!("✓ Configuration is valid");

    Ok(())
}

pub async fn handle_escrow_counts(config: &Config) -> anyhow::Result<()> {
    let ledger = EscrowLedger::new(connect_store(config).await?);
    let counts = ledger.status_counts().await?;

    println!("{:<16} {:>8}", "Status", "Count");
    println!("{}", "-".repeat(25));
    for entry in counts {
        println!("{:<16} {:>8}", entry.status.as_str(), entry.count);
    }

    Ok(())
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(slash_pos) = url[..colon_pos].rfind("//") {
                let prefix = &url[..slash_pos + 2];
                let user = &url[slash_pos + 2..colon_pos];
                let suffix = &url[at_pos..];
                return format!("{}{}:****{}", prefix, user, suffix);
            }
        }
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_mask_password() {
        assert_eq!(
            mask_password("postgres://escrow:s3cret@db:5432/escrow"),
            "postgres://escrow:****@db:5432/escrow"
        );
        assert_eq!(
            mask_password("postgres://localhost/escrow"),
            "postgres://localhost/escrow"
        );
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_escrow_counts() {
        let cli = Cli::try_parse_from(["escrow-core", "escrow", "counts"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Escrow(EscrowCommands::Counts))
        ));
    }

    #[test]
    fn test_no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["escrow-core"]).unwrap();
        assert!(cli.command.is_none());
    }
}
