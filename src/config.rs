use std::str::FromStr;

use anyhow::{bail, Context};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> anyhow::Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => bail!("unknown STORE_BACKEND {other:?}, expected postgres or memory"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub database_url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Seller-name substring that marks marketplace-partner rows.
    pub marketplace_token: String,
    pub ranking_limit: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            marketplace_token: "meli".to_string(),
            ranking_limit: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub backend: StoreBackend,
    pub store: StoreConfig,
    pub pipeline: PipelineConfig,
    pub workers: usize,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = PipelineConfig::default();
        let backend = match lookup("STORE_BACKEND") {
            Some(value) => value.parse()?,
            None => StoreBackend::Postgres,
        };
        let workers: usize = parse_or(&lookup, "WORKER_COUNT", 2)?;
        if workers == 0 {
            bail!("WORKER_COUNT must be at least 1");
        }

        Ok(Self {
            backend,
            store: StoreConfig {
                database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
                max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 5)?,
            },
            pipeline: PipelineConfig {
                marketplace_token: lookup("MARKETPLACE_TOKEN")
                    .filter(|token| !token.trim().is_empty())
                    .unwrap_or(defaults.marketplace_token),
                ranking_limit: parse_or(&lookup, "RANKING_LIMIT", defaults.ranking_limit)?,
            },
            workers,
        })
    }
}

fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{name} has an invalid value {raw:?}")),
        None => Ok(default),
    }
}
