use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    /// Bound the executor applies to calls made without a deadline
    #[serde(default = "DatabaseConfig::default_timeout_ms")]
    pub query_timeout_ms: u64,
    /// Bound on opening and pinging the database at startup
    #[serde(default = "DatabaseConfig::default_timeout_ms")]
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: String,
}

impl DatabaseConfig {
    const fn default_timeout_ms() -> u64 {
        3000
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_source(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_source<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").unwrap_or_else(|| "sqlite://urls.db".to_string());

        let query_timeout_ms = parse_timeout(&lookup, "DATABASE_QUERY_TIMEOUT_MS")?;
        let connect_timeout_ms = parse_timeout(&lookup, "DATABASE_CONNECT_TIMEOUT_MS")?;

        let level = lookup("LOG_LEVEL")
            .map(|v| v.to_lowercase())
            .unwrap_or_else(|| "info".to_string());

        Ok(Config {
            database: DatabaseConfig {
                url: database_url,
                query_timeout_ms,
                connect_timeout_ms,
            },
            log: LogConfig { level },
        })
    }
}

fn parse_timeout<F>(lookup: &F, key: &str) -> anyhow::Result<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(DatabaseConfig::default_timeout_ms());
    };
    let millis = raw
        .trim()
        .parse::<u64>()
        .with_context(|| format!("{key} must be a whole number of milliseconds, got '{raw}'"))?;
    if millis == 0 {
        bail!("{key} must be greater than zero");
    }
    Ok(millis)
}
