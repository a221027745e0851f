use std::{collections::HashMap, env, time::Duration};

use chrono::Duration as ChronoDuration;
use log::*;
use loan_payment_engine::{db_types::PaymentProvider, lpe_api::payment_kinds::DEFAULT_MAX_TRANSFER_ATTEMPTS};
use lpg_common::{env_flag, Secret};

const DEFAULT_LPG_HOST: &str = "127.0.0.1";
const DEFAULT_LPG_PORT: u16 = 8460;
const DEFAULT_OUTBOX_POLL_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_STALE_STEP_TIMEOUT_MINS: i64 = 60;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub webhook: WebhookConfig,
    /// How often the outbox relay looks for new events
    pub outbox_poll_interval: Duration,
    /// How often the reconciliation sweep runs
    pub reconcile_interval: Duration,
    /// How long a transfer may stay pending before its step is reported as stale
    pub stale_step_timeout: ChronoDuration,
    pub max_transfer_attempts: i64,
    /// Providers serviced by the ACH adapter. The rest go to the mock network.
    pub ach_providers: Vec<PaymentProvider>,
}

#[derive(Clone, Debug)]
pub struct WebhookConfig {
    /// The key for networks that do not have one of their own
    pub hmac_secret: Secret<String>,
    pub provider_secrets: HashMap<PaymentProvider, Secret<String>>,
    /// If false, webhook signatures are not checked at all. **DANGER**
    pub hmac_checks: bool,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self { hmac_secret: Secret::default(), provider_secrets: HashMap::new(), hmac_checks: true }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_LPG_HOST.to_string(),
            port: DEFAULT_LPG_PORT,
            database_url: String::default(),
            webhook: WebhookConfig::default(),
            outbox_poll_interval: DEFAULT_OUTBOX_POLL_INTERVAL,
            reconcile_interval: DEFAULT_RECONCILE_INTERVAL,
            stale_step_timeout: ChronoDuration::minutes(DEFAULT_STALE_STEP_TIMEOUT_MINS),
            max_transfer_attempts: DEFAULT_MAX_TRANSFER_ATTEMPTS,
            ach_providers: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env::var("LPG_HOST").ok().unwrap_or_else(|| DEFAULT_LPG_HOST.into());
        let port = env::var("LPG_PORT")
            .map(|s| {
                s.parse::<u16>().unwrap_or_else(|e| {
                    error!(
                        "🪛️ {s} is not a valid port for LPG_PORT. {e} Using the default, {DEFAULT_LPG_PORT}, instead."
                    );
                    DEFAULT_LPG_PORT
                })
            })
            .ok()
            .unwrap_or(DEFAULT_LPG_PORT);
        let database_url = env::var("LPG_DATABASE_URL").ok().unwrap_or_else(|| {
            error!("🪛️ LPG_DATABASE_URL is not set. Please set it to the URL for the LPG database.");
            String::default()
        });
        let webhook = WebhookConfig::from_env_or_defaults();
        let outbox_poll_interval =
            parse_env("LPG_OUTBOX_POLL_INTERVAL", "ms").map(Duration::from_millis).unwrap_or(DEFAULT_OUTBOX_POLL_INTERVAL);
        let reconcile_interval =
            parse_env("LPG_RECONCILE_INTERVAL", "s").map(Duration::from_secs).unwrap_or(DEFAULT_RECONCILE_INTERVAL);
        let stale_step_timeout = parse_env::<i64>("LPG_STALE_STEP_TIMEOUT", "minutes")
            .map(ChronoDuration::minutes)
            .unwrap_or_else(|| ChronoDuration::minutes(DEFAULT_STALE_STEP_TIMEOUT_MINS));
        let max_transfer_attempts = parse_env::<i64>("LPG_MAX_TRANSFER_ATTEMPTS", "attempts")
            .filter(|n| {
                if *n < 1 {
                    warn!("🪛️ LPG_MAX_TRANSFER_ATTEMPTS must be at least 1. Using the default.");
                }
                *n >= 1
            })
            .unwrap_or(DEFAULT_MAX_TRANSFER_ATTEMPTS);
        let ach_providers = env::var("LPG_ACH_PROVIDERS").map(|s| parse_providers(&s)).unwrap_or_default();
        Self {
            host,
            port,
            database_url,
            webhook,
            outbox_poll_interval,
            reconcile_interval,
            stale_step_timeout,
            max_transfer_attempts,
            ach_providers,
        }
    }
}

impl WebhookConfig {
    pub fn new(hmac_secret: &str) -> Self {
        Self { hmac_secret: Secret::new(hmac_secret.to_string()), ..Default::default() }
    }

    pub fn with_provider_secret(mut self, provider: PaymentProvider, secret: &str) -> Self {
        self.provider_secrets.insert(provider, Secret::new(secret.to_string()));
        self
    }

    /// The key that webhooks from `provider` must be signed with.
    pub fn key_for(&self, provider: Option<PaymentProvider>) -> &Secret<String> {
        provider.and_then(|p| self.provider_secrets.get(&p)).unwrap_or(&self.hmac_secret)
    }

    pub fn from_env_or_defaults() -> Self {
        let hmac_secret = env::var("LPG_WEBHOOK_HMAC_SECRET").ok().unwrap_or_else(|| {
            error!(
                "🪛️ LPG_WEBHOOK_HMAC_SECRET is not set. Please set it to the key the transfer networks sign their \
                 webhooks with."
            );
            String::default()
        });
        let provider_secrets = PaymentProvider::ALL
            .iter()
            .filter_map(|p| {
                let name = format!("LPG_WEBHOOK_HMAC_SECRET_{}", p.to_string().to_uppercase());
                let secret = env::var(&name).ok().filter(|s| !s.is_empty())?;
                info!("🪛️ Webhooks from {p} are checked with the key in {name}");
                Some((*p, Secret::new(secret)))
            })
            .collect();
        let hmac_checks = env_flag("LPG_WEBHOOK_HMAC_CHECKS", true);
        if !hmac_checks {
            warn!("🚨️ Webhook HMAC checks are DISABLED. Anyone can post transfer updates to this server.");
        }
        Self { hmac_secret: Secret::new(hmac_secret), provider_secrets, hmac_checks }
    }
}

fn parse_env<T>(name: &str, unit: &str) -> Option<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    env::var(name)
        .map_err(|_| info!("🪛️ {name} is not set. Using the default value."))
        .and_then(|s| s.parse::<T>().map_err(|e| warn!("🪛️ Invalid configuration value for {name} ({unit}). {e}")))
        .ok()
}

/// Parses a comma-separated list of providers. Unknown names are skipped.
pub fn parse_providers(s: &str) -> Vec<PaymentProvider> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .filter_map(|p| {
            p.to_lowercase()
                .parse::<PaymentProvider>()
                .map_err(|e| warn!("🪛️ Ignoring unknown provider in LPG_ACH_PROVIDERS. {e}"))
                .ok()
        })
        .collect()
}
