//! Environment-driven runtime settings

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Runtime knobs, all overridable through the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Run the browser without a visible window.
    pub headless: bool,
    /// Upper bound on navigation plus page readiness.
    pub nav_timeout: Duration,
    /// Scrape attempts per product before giving up.
    pub max_attempts: u32,
    /// Fixed part of the between-attempt backoff.
    pub backoff_base: Duration,
    /// Random part added on top of the base backoff.
    pub backoff_jitter: Duration,
    /// Shortest pause between two products during a refresh pass.
    pub refresh_delay_min: Duration,
    /// Longest pause between two products during a refresh pass.
    pub refresh_delay_max: Duration,
    pub database_url: String,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            headless: env_or("PW_HEADLESS", true),
            nav_timeout: Duration::from_secs(env_or("PW_NAV_TIMEOUT_SECS", 30)),
            max_attempts: env_or("PW_MAX_ATTEMPTS", 2),
            backoff_base: Duration::from_secs(env_or("PW_BACKOFF_BASE_SECS", 30)),
            backoff_jitter: Duration::from_secs(env_or("PW_BACKOFF_JITTER_SECS", 30)),
            refresh_delay_min: Duration::from_secs(env_or("PW_REFRESH_DELAY_MIN_SECS", 2)),
            refresh_delay_max: Duration::from_secs(env_or("PW_REFRESH_DELAY_MAX_SECS", 4)),
            database_url: env::var("PW_DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:data/pricewatch.db".to_string()),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
