use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub bind_address: String,
    /// "simulated" runs an in-process ledger, "remote" talks to a gateway
    pub ledger_mode: String,
    pub ledger_gateway_url: String,
    pub ledger_timeout_ms: u64,
    pub notify_webhook_url: Option<String>,
    pub reconcile: ReconcileConfig,
}

/// Tuning knobs for the reconciliation engine
#[derive(Debug, Deserialize, Clone)]
pub struct ReconcileConfig {
    pub worker_count: usize,
    pub poll_interval_ms: u64,
    pub batch_size: i64,
    pub lease_ttl_secs: i64,
    pub max_attempts: i32,
    pub retry_base_delay_ms: i64,
    pub retry_max_delay_ms: i64,
    pub submitted_stale_secs: i64,
    pub sweep_interval_secs: u64,
    pub duplicate_debounce_secs: i64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            poll_interval_ms: 1_000,
            batch_size: 32,
            lease_ttl_secs: 60,
            max_attempts: 5,
            retry_base_delay_ms: 2_000,
            retry_max_delay_ms: 300_000,
            submitted_stale_secs: 3_600,
            sweep_interval_secs: 30,
            duplicate_debounce_secs: 600,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let defaults = ReconcileConfig::default();
        Ok(Self {
            database_url: std::env::var("DATABASE_URL").ok(),
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            ledger_mode: std::env::var("LEDGER_MODE").unwrap_or_else(|_| "simulated".to_string()),
            ledger_gateway_url: std::env::var("LEDGER_GATEWAY_URL")
                .unwrap_or_else(|_| "http://localhost:9090".to_string()),
            ledger_timeout_ms: env_parsed("LEDGER_TIMEOUT_MS", 10_000)?,
            notify_webhook_url: std::env::var("NOTIFY_WEBHOOK_URL").ok(),
            reconcile: ReconcileConfig {
                worker_count: env_parsed("RECONCILE_WORKERS", defaults.worker_count)?,
                poll_interval_ms: env_parsed("RECONCILE_POLL_INTERVAL_MS", defaults.poll_interval_ms)?,
                batch_size: env_parsed("RECONCILE_BATCH_SIZE", defaults.batch_size)?,
                lease_ttl_secs: env_parsed("RECONCILE_LEASE_TTL_SECS", defaults.lease_ttl_secs)?,
                max_attempts: env_parsed("RECONCILE_MAX_ATTEMPTS", defaults.max_attempts)?,
                retry_base_delay_ms: env_parsed("RETRY_BASE_DELAY_MS", defaults.retry_base_delay_ms)?,
                retry_max_delay_ms: env_parsed("RETRY_MAX_DELAY_MS", defaults.retry_max_delay_ms)?,
                submitted_stale_secs: env_parsed("SUBMITTED_STALE_SECS", defaults.submitted_stale_secs)?,
                sweep_interval_secs: env_parsed("SWEEP_INTERVAL_SECS", defaults.sweep_interval_secs)?,
                duplicate_debounce_secs: env_parsed(
                    "DUPLICATE_DEBOUNCE_SECS",
                    defaults.duplicate_debounce_secs,
                )?,
            },
        })
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> Result<T, config::ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| config::ConfigError::Message(format!("invalid value for {}: {}", key, raw))),
        Err(_) => Ok(default),
    }
}
