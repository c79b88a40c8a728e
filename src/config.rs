use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub reindex: ReindexConfig,
    #[serde(default)]
    pub document: DocumentConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Identity recorded on every metric sample. Defaults to `<host>:<pid>`.
    #[serde(default)]
    pub worker_name: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_max_connections() -> u32 {
    8
}
fn default_busy_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReindexConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub throttle_ms: u64,
    #[serde(default = "default_resource_budget_bytes")]
    pub resource_budget_bytes: u64,
    #[serde(default = "default_lease_timeout_secs")]
    pub lease_timeout_secs: u64,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default = "default_progress_interval_secs")]
    pub progress_interval_secs: u64,
}

impl Default for ReindexConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            workers: default_workers(),
            throttle_ms: 0,
            resource_budget_bytes: default_resource_budget_bytes(),
            lease_timeout_secs: default_lease_timeout_secs(),
            max_attempts: None,
            progress_interval_secs: default_progress_interval_secs(),
        }
    }
}

fn default_batch_size() -> usize {
    1000
}
fn default_workers() -> usize {
    1
}
fn default_resource_budget_bytes() -> u64 {
    268_435_456
}
fn default_lease_timeout_secs() -> u64 {
    3600
}
fn default_progress_interval_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocumentConfig {
    #[serde(default = "default_max_terms")]
    pub max_terms: usize,
    /// Lexeme bytes buffered per document before it is truncated.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            max_terms: default_max_terms(),
            max_bytes: default_max_bytes(),
        }
    }
}

fn default_max_terms() -> usize {
    10_000
}

fn default_max_bytes() -> usize {
    crate::document::DEFAULT_MAX_BYTES
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Config pointing at `db_path` with every other setting at its default.
    pub fn with_db_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
                max_connections: default_max_connections(),
                busy_timeout_ms: default_busy_timeout_ms(),
            },
            reindex: ReindexConfig::default(),
            document: DocumentConfig::default(),
            logging: LoggingConfig::default(),
            worker_name: None,
        }
    }

    pub fn worker_name(&self) -> String {
        self.worker_name.clone().unwrap_or_else(|| {
            let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
            format!("{}:{}", host, std::process::id())
        })
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.db.max_connections == 0 {
        anyhow::bail!("db.max_connections must be >= 1");
    }

    if config.reindex.batch_size == 0 {
        anyhow::bail!("reindex.batch_size must be >= 1");
    }
    if config.reindex.workers == 0 {
        anyhow::bail!("reindex.workers must be >= 1");
    }
    if config.reindex.resource_budget_bytes == 0 {
        anyhow::bail!("reindex.resource_budget_bytes must be > 0");
    }
    if config.reindex.progress_interval_secs == 0 {
        anyhow::bail!("reindex.progress_interval_secs must be > 0");
    }
    if config.reindex.max_attempts == Some(0) {
        anyhow::bail!("reindex.max_attempts must be >= 1 when set");
    }

    if config.document.max_terms == 0 {
        anyhow::bail!("document.max_terms must be > 0");
    }
    if config.document.max_bytes == 0 {
        anyhow::bail!("document.max_bytes must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &str) -> Result<Config> {
        let content = format!("{}\n[db]\npath = \"/tmp/dsi.sqlite\"\n", extra);
        let config: Config = toml::from_str(&content)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn defaults_apply_when_sections_missing() {
        let config = parse("").unwrap();
        assert_eq!(config.reindex.batch_size, 1000);
        assert_eq!(config.reindex.workers, 1);
        assert_eq!(config.reindex.resource_budget_bytes, 268_435_456);
        assert_eq!(config.reindex.max_attempts, None);
        assert_eq!(config.document.max_terms, 10_000);
        assert_eq!(config.document.max_bytes, 1024 * 1024);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn rejects_zero_batch_size() {
        let err = parse("[reindex]\nbatch_size = 0\n").unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn rejects_zero_max_attempts() {
        let err = parse("[reindex]\nmax_attempts = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_attempts"));
    }

    #[test]
    fn rejects_zero_max_terms() {
        let err = parse("[document]\nmax_terms = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_terms"));
    }

    #[test]
    fn explicit_worker_name_wins() {
        let config = parse("worker_name = \"janitor-1\"\n").unwrap();
        assert_eq!(config.worker_name(), "janitor-1");
    }
}
