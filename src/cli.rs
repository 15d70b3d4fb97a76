use clap::{Parser, Subcommand};
use sqlx::PgPool;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::adapters::{BroadcastEventPublisher, GatewayRegistry, PostgresTransactionRepository};
use crate::config::Config;
use crate::services::{BillingService, OutboxDispatcher};
use crate::{create_app, AppState};

#[derive(Parser)]
#[command(name = "billing-core")]
#[command(about = "Billing Core - payment transaction engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Ask gateways for the status of stale pending transactions
    Reconcile {
        /// Only transactions created more than this many minutes ago
        #[arg(long, default_value_t = 30)]
        older_than_mins: i64,

        /// Maximum number of transactions to check
        #[arg(long, default_value_t = 100)]
        limit: i64,
    },

    /// Configuration validation
    Config,
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

fn build_service(config: &Config, pool: PgPool) -> (BillingService, Arc<PostgresTransactionRepository>) {
    let repo = Arc::new(PostgresTransactionRepository::new(pool));
    let gateways = GatewayRegistry::from_settings(&config.gateways, config.billing.gateway_timeout);
    let service = BillingService::new(repo.clone(), gateways, config.billing.clone());
    (service, repo)
}

pub async fn handle_serve(config: Config) -> anyhow::Result<()> {
    let pool = crate::db::create_pool(&config).await?;
    crate::db::run_migrations(&pool).await?;

    let report = crate::startup::check_readiness(&config, &pool).await;
    report.log();
    if !report.is_ready() {
        report.print();
        anyhow::bail!("Startup readiness checks failed");
    }

    let (billing, repo) = build_service(&config, pool);
    tracing::info!(gateways = ?billing.gateways().configured(), "Gateways registered");

    let publisher = Arc::new(BroadcastEventPublisher::default());
    let _outbox = OutboxDispatcher::new(repo, publisher, config.outbox.clone()).spawn();

    let app = create_app(AppState::new(billing).with_request_body_logging(config.log_request_body));
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

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

pub async fn handle_reconcile(config: &Config, older_than_mins: i64, limit: i64) -> anyhow::Result<()> {
    if older_than_mins < 0 || limit <= 0 {
        anyhow::bail!("--older-than-mins must be >= 0 and --limit must be > 0");
    }

    let pool = crate::db::create_pool(config).await?;
    let (billing, _) = build_service(config, pool);

    let report = billing
        .reconcile(chrono::Duration::minutes(older_than_mins), limit)
        .await?;

    tracing::info!(
        checked = report.checked,
        updated = report.updated,
        unchanged = report.unchanged,
        failed = report.failed,
        "Reconciliation finished"
    );
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}

pub async fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");

    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!("  Database URL: {}", mask_password(&config.database_url));
    println!("  Log Format: {:?}", config.log_format);
    println!("  Log Request Body: {}", config.log_request_body);
    println!(
        "  Gateway timeout: {}s, retries: {}",
        config.billing.gateway_timeout.as_secs(),
        config.billing.gateway_retry_attempts
    );

    let pool = crate::db::create_pool(config).await?;
    let report = crate::startup::check_readiness(config, &pool).await;
    report.print();

    if !report.is_ready() {
        anyhow::bail!("Configuration is invalid");
    }

    tracing::info!("Configuration is valid");
    println!("✓ Configuration is valid");

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
