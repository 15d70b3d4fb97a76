use crate::config::Config;
use crate::domain::Gateway;
use anyhow::{Context, Result};
use sqlx::PgPool;

const BILLING_TABLES: &[&str] = &["billing_transactions", "billing_outbox"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckLevel {
    Ok,
    Warn,
    Fail,
}

#[derive(Debug, Clone)]
pub struct Check {
    pub name: String,
    pub level: CheckLevel,
    pub detail: String,
}

impl Check {
    fn from_result(name: impl Into<String>, result: Result<String>) -> Self {
        match result {
            Ok(detail) => Self {
                name: name.into(),
                level: CheckLevel::Ok,
                detail,
            },
            Err(e) => Self {
                name: name.into(),
                level: CheckLevel::Fail,
                detail: format!("{:#}", e),
            },
        }
    }

    fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            level: CheckLevel::Warn,
            detail: detail.into(),
        }
    }
}

/// Readiness of the billing engine before it starts taking traffic.
/// Warnings are printed but do not block startup.
pub struct ReadinessReport {
    pub gateways: Vec<Gateway>,
    pub checks: Vec<Check>,
}

impl ReadinessReport {
    pub fn is_ready(&self) -> bool {
        self.checks.iter().all(|check| check.level != CheckLevel::Fail)
    }

    pub fn print(&self) {
        println!("\n=== Billing readiness ===");
        for check in &self.checks {
            let mark = match check.level {
                CheckLevel::Ok => "ok  ",
                CheckLevel::Warn => "warn",
                CheckLevel::Fail => "FAIL",
            };
            println!("[{}] {:<12} {}", mark, check.name, check.detail);
        }
        println!(
            "gateways: {}",
            self.gateways
                .iter()
                .map(Gateway::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        );
        println!("=========================\n");
    }

    pub fn log(&self) {
        for check in &self.checks {
            match check.level {
                CheckLevel::Ok => tracing::debug!(check = %check.name, detail = %check.detail, "Readiness check passed"),
                CheckLevel::Warn => tracing::warn!(check = %check.name, detail = %check.detail, "Readiness check warning"),
                CheckLevel::Fail => tracing::error!(check = %check.name, detail = %check.detail, "Readiness check failed"),
            }
        }
    }
}

pub async fn check_readiness(config: &Config, pool: &PgPool) -> ReadinessReport {
    let mut checks = vec![Check::from_result("settings", check_settings(config))];
    checks.push(Check::from_result("database", check_database(pool).await));
    checks.push(Check::from_result("schema", check_schema(pool).await));
    checks.extend(gateway_warnings(config));

    ReadinessReport {
        gateways: configured_gateways(config),
        checks,
    }
}

/// Gateways that will be registered; cash needs no credentials.
pub fn configured_gateways(config: &Config) -> Vec<Gateway> {
    let sections = &config.gateways;
    let mut gateways = vec![Gateway::Cash];
    if sections.click.is_some() {
        gateways.push(Gateway::Click);
    }
    if sections.payme.is_some() {
        gateways.push(Gateway::Payme);
    }
    if sections.octo.is_some() {
        gateways.push(Gateway::Octo);
    }
    if sections.stripe.is_some() {
        gateways.push(Gateway::Stripe);
    }
    if sections.integrator.is_some() {
        gateways.push(Gateway::Integrator);
    }
    gateways
}

fn check_settings(config: &Config) -> Result<String> {
    let url = url::Url::parse(&config.database_url).context("DATABASE_URL is not a valid URL")?;
    if !matches!(url.scheme(), "postgres" | "postgresql") {
        anyhow::bail!("DATABASE_URL must be a postgres URL");
    }
    if config.server_port == 0 {
        anyhow::bail!("SERVER_PORT must be greater than 0");
    }
    if config.db_max_connections == 0 {
        anyhow::bail!("DB_MAX_CONNECTIONS must be at least 1");
    }
    if config.billing.gateway_retry_attempts == 0 {
        anyhow::bail!("BILLING_GATEWAY_RETRY_ATTEMPTS must be at least 1");
    }
    if config.outbox.batch_size <= 0 {
        anyhow::bail!("OUTBOX_BATCH_SIZE must be positive");
    }

    Ok(format!(
        "conflict retries {}, gateway attempts {}, outbox batch {}",
        config.billing.max_conflict_retries,
        config.billing.gateway_retry_attempts,
        config.outbox.batch_size
    ))
}

async fn check_database(pool: &PgPool) -> Result<String> {
    let version: String = sqlx::query_scalar("SHOW server_version")
        .fetch_one(pool)
        .await
        .context("database unreachable")?;
    Ok(format!("postgres {}", version))
}

async fn check_schema(pool: &PgPool) -> Result<String> {
    for table in BILLING_TABLES {
        let present: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
            .bind(*table)
            .fetch_one(pool)
            .await
            .with_context(|| format!("failed to look up {}", table))?;
        if !present {
            anyhow::bail!("table {} is missing, run `billing-core db migrate`", table);
        }
    }
    Ok(BILLING_TABLES.join(", "))
}

/// Configurations that start fine but will not settle payments on their own.
fn gateway_warnings(config: &Config) -> Vec<Check> {
    let mut warnings = Vec::new();
    if let Some(octo) = &config.gateways.octo {
        if octo.notify_url.is_none() {
            warnings.push(Check::warn(
                "octo",
                "OCTO_NOTIFY_URL unset, payments settle only through reconciliation",
            ));
        }
        if octo.test {
            warnings.push(Check::warn("octo", "test mode, no real money moves"));
        }
    }
    if let Some(stripe) = &config.gateways.stripe {
        if stripe.secret_key.expose().starts_with("sk_test_") {
            warnings.push(Check::warn("stripe", "test secret key in use"));
        }
    }
    warnings
}
