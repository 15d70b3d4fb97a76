use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// A credential that never shows up in `Debug` output or logs.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString(****)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => anyhow::bail!("LOG_FORMAT must be 'pretty' or 'json', got '{}'", other),
        }
    }
}

/// Retry and timeout policy of the billing orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingSettings {
    pub max_conflict_retries: u32,
    pub gateway_timeout: Duration,
    pub gateway_retry_attempts: u32,
    pub gateway_retry_base: Duration,
}

impl Default for BillingSettings {
    fn default() -> Self {
        Self {
            max_conflict_retries: 3,
            gateway_timeout: Duration::from_secs(15),
            gateway_retry_attempts: 3,
            gateway_retry_base: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxSettings {
    pub poll_interval: Duration,
    pub batch_size: i64,
}

impl Default for OutboxSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            batch_size: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClickConfig {
    pub service_id: i64,
    pub merchant_id: i64,
    pub merchant_user_id: i64,
    pub secret_key: SecretString,
    pub base_url: String,
    pub checkout_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymeConfig {
    pub merchant_id: String,
    pub user: String,
    pub secret_key: SecretString,
    pub checkout_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OctoConfig {
    pub shop_id: i32,
    pub secret: SecretString,
    pub unique_key: SecretString,
    pub base_url: String,
    pub notify_url: Option<String>,
    pub return_url: Option<String>,
    pub test: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StripeConfig {
    pub secret_key: SecretString,
    pub signing_secret: SecretString,
    pub base_url: String,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegratorConfig {
    pub signing_secret: SecretString,
}

/// Optional per-gateway credentials. A gateway is only registered when its section is present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewaySettings {
    pub click: Option<ClickConfig>,
    pub payme: Option<PaymeConfig>,
    pub octo: Option<OctoConfig>,
    pub stripe: Option<StripeConfig>,
    pub integrator: Option<IntegratorConfig>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub db_max_connections: u32,
    pub log_format: LogFormat,
    /// Log sanitized request bodies up to 1 KiB.
    pub log_request_body: bool,
    pub billing: BillingSettings,
    pub outbox: OutboxSettings,
    pub gateways: GatewaySettings,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok(); // Load .env file if present
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup, so parsing is testable without the process env.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(&lookup);

        let billing_defaults = BillingSettings::default();
        let outbox_defaults = OutboxSettings::default();

        Ok(Config {
            server_port: env.parse_or("SERVER_PORT", 3000)?,
            database_url: env.required("DATABASE_URL")?,
            db_max_connections: env.parse_or("DB_MAX_CONNECTIONS", 5)?,
            log_format: env.parse_or("LOG_FORMAT", LogFormat::Pretty)?,
            log_request_body: env.parse_or("LOG_REQUEST_BODY", false)?,
            billing: BillingSettings {
                max_conflict_retries: env
                    .parse_or("BILLING_MAX_CONFLICT_RETRIES", billing_defaults.max_conflict_retries)?,
                gateway_timeout: Duration::from_secs(env.parse_or(
                    "BILLING_GATEWAY_TIMEOUT_SECS",
                    billing_defaults.gateway_timeout.as_secs(),
                )?),
                gateway_retry_attempts: env.parse_or(
                    "BILLING_GATEWAY_RETRY_ATTEMPTS",
                    billing_defaults.gateway_retry_attempts,
                )?,
                gateway_retry_base: Duration::from_millis(env.parse_or(
                    "BILLING_GATEWAY_RETRY_BASE_MS",
                    billing_defaults.gateway_retry_base.as_millis() as u64,
                )?),
            },
            outbox: OutboxSettings {
                poll_interval: Duration::from_millis(env.parse_or(
                    "OUTBOX_POLL_INTERVAL_MS",
                    outbox_defaults.poll_interval.as_millis() as u64,
                )?),
                batch_size: env.parse_or("OUTBOX_BATCH_SIZE", outbox_defaults.batch_size)?,
            },
            gateways: GatewaySettings {
                click: click_section(&env)?,
                payme: payme_section(&env)?,
                octo: octo_section(&env)?,
                stripe: stripe_section(&env)?,
                integrator: env
                    .optional("INTEGRATOR_SIGNING_SECRET")
                    .map(|secret| IntegratorConfig {
                        signing_secret: SecretString::new(secret),
                    }),
            },
        })
    }
}

struct Lookup<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Lookup<'_, F> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn required(&self, key: &str) -> Result<String> {
        self.optional(key)
            .with_context(|| format!("{} must be set", key))
    }

    fn secret(&self, key: &str) -> Result<SecretString> {
        self.required(key).map(SecretString::new)
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.optional(key) {
            Some(raw) => raw
                .parse()
                .map_err(|e| anyhow::anyhow!("{} is invalid: {}", key, e)),
            None => Ok(default),
        }
    }

    fn parse_required<T>(&self, key: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.required(key)?
            .parse()
            .map_err(|e| anyhow::anyhow!("{} is invalid: {}", key, e))
    }

    fn url_or(&self, key: &str, default: &str) -> Result<String> {
        let value = self.optional(key).unwrap_or_else(|| default.to_string());
        validate_url(key, &value)?;
        Ok(value.trim_end_matches('/').to_string())
    }

    fn optional_url(&self, key: &str) -> Result<Option<String>> {
        self.optional(key)
            .map(|value| validate_url(key, &value).map(|_| value))
            .transpose()
    }
}

fn validate_url(key: &str, value: &str) -> Result<()> {
    let parsed = Url::parse(value).with_context(|| format!("{} is not a valid URL", key))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        anyhow::bail!("{} must be an http(s) URL", key);
    }
    Ok(())
}

fn click_section<F: Fn(&str) -> Option<String>>(env: &Lookup<'_, F>) -> Result<Option<ClickConfig>> {
    if env.optional("CLICK_SECRET_KEY").is_none() {
        return Ok(None);
    }
    Ok(Some(ClickConfig {
        service_id: env.parse_required("CLICK_SERVICE_ID")?,
        merchant_id: env.parse_required("CLICK_MERCHANT_ID")?,
        merchant_user_id: env.parse_or("CLICK_MERCHANT_USER_ID", 0)?,
        secret_key: env.secret("CLICK_SECRET_KEY")?,
        base_url: env.url_or("CLICK_BASE_URL", "https://api.click.uz")?,
        checkout_url: env.url_or("CLICK_CHECKOUT_URL", "https://my.click.uz/services/pay")?,
    }))
}

fn payme_section<F: Fn(&str) -> Option<String>>(env: &Lookup<'_, F>) -> Result<Option<PaymeConfig>> {
    if env.optional("PAYME_SECRET_KEY").is_none() {
        return Ok(None);
    }
    Ok(Some(PaymeConfig {
        merchant_id: env.required("PAYME_MERCHANT_ID")?,
        user: env.optional("PAYME_USER").unwrap_or_else(|| "Paycom".to_string()),
        secret_key: env.secret("PAYME_SECRET_KEY")?,
        checkout_url: env.url_or("PAYME_CHECKOUT_URL", "https://checkout.paycom.uz")?,
    }))
}

fn octo_section<F: Fn(&str) -> Option<String>>(env: &Lookup<'_, F>) -> Result<Option<OctoConfig>> {
    if env.optional("OCTO_SECRET").is_none() {
        return Ok(None);
    }
    Ok(Some(OctoConfig {
        shop_id: env.parse_required("OCTO_SHOP_ID")?,
        secret: env.secret("OCTO_SECRET")?,
        unique_key: env.secret("OCTO_UNIQUE_KEY")?,
        base_url: env.url_or("OCTO_BASE_URL", "https://secure.octo.uz")?,
        notify_url: env.optional_url("OCTO_NOTIFY_URL")?,
        return_url: env.optional_url("OCTO_RETURN_URL")?,
        test: env.parse_or("OCTO_TEST", false)?,
    }))
}

fn stripe_section<F: Fn(&str) -> Option<String>>(env: &Lookup<'_, F>) -> Result<Option<StripeConfig>> {
    if env.optional("STRIPE_SECRET_KEY").is_none() {
        return Ok(None);
    }
    let success_url = env.required("STRIPE_SUCCESS_URL")?;
    validate_url("STRIPE_SUCCESS_URL", &success_url)?;
    let cancel_url = env.required("STRIPE_CANCEL_URL")?;
    validate_url("STRIPE_CANCEL_URL", &cancel_url)?;
    Ok(Some(StripeConfig {
        secret_key: env.secret("STRIPE_SECRET_KEY")?,
        signing_secret: env.secret("STRIPE_SIGNING_SECRET")?,
        base_url: env.url_or("STRIPE_BASE_URL", "https://api.stripe.com")?,
        success_url,
        cancel_url,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn applies_defaults() {
        let config = config_from(&[("DATABASE_URL", "postgres://localhost/billing")]).unwrap();
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(!config.log_request_body);
        assert_eq!(config.db_max_connections, 5);
        assert_eq!(config.billing, BillingSettings::default());
        assert_eq!(config.outbox.batch_size, 50);
        assert_eq!(config.gateways, GatewaySettings::default());
    }

    #[test]
    fn requires_database_url() {
        let err = config_from(&[]).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn parses_gateway_sections() {
        let config = config_from(&[
            ("DATABASE_URL", "postgres://localhost/billing"),
            ("LOG_FORMAT", "json"),
            ("LOG_REQUEST_BODY", "true"),
            ("BILLING_MAX_CONFLICT_RETRIES", "5"),
            ("CLICK_SECRET_KEY", "click-secret"),
            ("CLICK_SERVICE_ID", "101"),
            ("CLICK_MERCHANT_ID", "202"),
            ("STRIPE_SECRET_KEY", "sk_test"),
            ("STRIPE_SIGNING_SECRET", "whsec"),
            ("STRIPE_SUCCESS_URL", "https://shop.example/ok"),
            ("STRIPE_CANCEL_URL", "https://shop.example/cancel"),
        ])
        .unwrap();

        assert_eq!(config.log_format, LogFormat::Json);
        assert!(config.log_request_body);
        assert_eq!(config.billing.max_conflict_retries, 5);
        let click = config.gateways.click.unwrap();
        assert_eq!(click.service_id, 101);
        assert_eq!(click.secret_key.expose(), "click-secret");
        assert_eq!(click.base_url, "https://api.click.uz");
        assert!(config.gateways.stripe.is_some());
        assert!(config.gateways.payme.is_none());
    }

    #[test]
    fn incomplete_gateway_section_is_an_error() {
        let err = config_from(&[
            ("DATABASE_URL", "postgres://localhost/billing"),
            ("OCTO_SECRET", "secret"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("OCTO_SHOP_ID"));
    }

    #[test]
    fn rejects_invalid_urls() {
        let err = config_from(&[
            ("DATABASE_URL", "postgres://localhost/billing"),
            ("PAYME_SECRET_KEY", "secret"),
            ("PAYME_MERCHANT_ID", "m-1"),
            ("PAYME_CHECKOUT_URL", "not a url"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("PAYME_CHECKOUT_URL"));
    }

    #[test]
    fn secrets_are_redacted_in_debug_output() {
        let secret = SecretString::new("super-secret");
        assert_eq!(format!("{:?}", secret), "SecretString(****)");
        assert!(!format!("{:?}", IntegratorConfig { signing_secret: secret }).contains("super"));
    }
}
