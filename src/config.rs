//! Environment-driven configuration

use std::time::Duration;

use crate::sweep::SweepConfig;

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub nats_url: Option<String>,
    pub nats_subject_prefix: String,
    pub sweep_interval_secs: u64,
    pub abandoned_cart_days: i64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env_parsed("PORT", 8083),
            nats_url: std::env::var("NATS_URL").ok(),
            nats_subject_prefix: std::env::var("NATS_SUBJECT_PREFIX")
                .unwrap_or_else(|_| "commerce".to_string()),
            sweep_interval_secs: env_parsed("SWEEP_INTERVAL_SECS", 300),
            abandoned_cart_days: env_parsed("ABANDONED_CART_DAYS", 30),
        }
    }

    pub fn sweep(&self) -> SweepConfig {
        SweepConfig {
            interval: Duration::from_secs(self.sweep_interval_secs),
            abandoned_cart_age: chrono::Duration::days(self.abandoned_cart_days),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
