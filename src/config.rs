use std::time::Duration;

use crate::domain::order::DEFAULT_PENDING_TIMEOUT_HOURS;
use crate::store::PostgresConfig;
use crate::utils::retry::RetryConfig;

/// Process configuration, read from the environment (and `.env` via dotenvy in main)
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Postgres connection string; the in-memory store is used when absent
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub db_acquire_timeout_ms: u64,
    pub metrics_port: u16,
    pub stale_order_hours: i64,
    pub checkout_max_attempts: u32,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unparsable values fall back to defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            db_max_connections: lookup("DB_MAX_CONNECTIONS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            db_acquire_timeout_ms: lookup("DB_ACQUIRE_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(30_000),
            metrics_port: lookup("METRICS_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(9090),
            stale_order_hours: lookup("STALE_ORDER_HOURS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_PENDING_TIMEOUT_HOURS),
            checkout_max_attempts: lookup("CHECKOUT_MAX_ATTEMPTS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
        }
    }

    pub fn postgres(&self) -> PostgresConfig {
        PostgresConfig {
            max_connections: self.db_max_connections,
            acquire_timeout: Duration::from_millis(self.db_acquire_timeout_ms),
            ..PostgresConfig::default()
        }
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig::for_transactions(self.checkout_max_attempts)
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::hours(self.stale_order_hours)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
