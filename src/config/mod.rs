//! Typed configuration.
//!
//! Resolution order: built-in defaults, then an optional TOML file, then
//! environment variables. Loads once at startup and fails fast on invalid
//! values. Sensitive values are wrapped in `SecretString` to prevent log leaks.

mod file;

use crate::error::{Error, Result};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use file::FileConfig;

/// Default config file, read from the working directory when present.
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

#[derive(Debug)]
pub struct Config {
    pub engine: EngineConfig,
    pub broker: BrokerConfig,
    pub pipeline: PipelineConfig,
    pub worker: WorkerConfig,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

/// Workflow engine REST API.
#[derive(Debug)]
pub struct EngineConfig {
    pub base_url: String,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub request_timeout: Duration,
}

/// Broker transport and stream names.
#[derive(Debug)]
pub struct BrokerConfig {
    /// Postgres (pgmq) connection string. When unset, records are only logged.
    pub database_url: Option<SecretString>,
    pub processes_stream: String,
    pub events_stream: String,
    pub decisions_stream: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointBackend {
    File,
    Postgres,
}

impl std::str::FromStr for CheckpointBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "file" => Ok(Self::File),
            "postgres" => Ok(Self::Postgres),
            other => Err(Error::Config(format!("unknown checkpoint backend: {other}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub poll_interval: Duration,
    pub batch_size: usize,
    pub checkpoint: CheckpointBackend,
    pub checkpoint_path: PathBuf,
    /// Name under which the watermark is persisted.
    pub checkpoint_name: String,
    pub publish_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub max_tasks: usize,
    pub lock_duration: Duration,
    pub tick: Duration,
    pub concurrency: usize,
    pub use_priority: bool,
    /// Topics to subscribe to. Empty means every registered handler's topic.
    pub topics: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineConfig {
                base_url: "http://localhost:8080/engine-rest".to_string(),
                username: None,
                password: None,
                request_timeout: Duration::from_secs(30),
            },
            broker: BrokerConfig {
                database_url: None,
                processes_stream: "fluxnova-processes".to_string(),
                events_stream: "fluxnova-events".to_string(),
                decisions_stream: "fluxnova-decisions".to_string(),
            },
            pipeline: PipelineConfig {
                poll_interval: Duration::from_secs(10),
                batch_size: 100,
                checkpoint: CheckpointBackend::File,
                checkpoint_path: PathBuf::from("fluxnova-cdc.checkpoint.json"),
                checkpoint_name: "fluxnova-history".to_string(),
                publish_attempts: 3,
            },
            worker: WorkerConfig {
                worker_id: format!("fluxnova-worker-{}", uuid::Uuid::new_v4()),
                max_tasks: 10,
                lock_duration: Duration::from_millis(30_000),
                tick: Duration::from_secs(1),
                concurrency: 4,
                use_priority: true,
                topics: Vec::new(),
            },
            otel_endpoint: None,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration: defaults, then the TOML file (if it exists), then
    /// environment variables.
    ///
    /// An explicitly given path must exist; the default `config.toml` is
    /// optional. In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        let file = match path {
            Some(p) => Some(FileConfig::read(p)?),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Some(FileConfig::read(default)?)
                } else {
                    None
                }
            }
        };
        if let Some(file) = file {
            file.apply(&mut config)?;
        }

        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables only (no file).
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = non_empty(var("FLUXNOVA_BASE_URL")) {
            self.engine.base_url = v;
        }
        if let Some(v) = non_empty(var("FLUXNOVA_USERNAME")) {
            self.engine.username = Some(v);
        }
        if let Some(v) = non_empty(var("FLUXNOVA_PASSWORD")) {
            self.engine.password = Some(SecretString::from(v));
        }
        if let Some(v) = non_empty(var("DATABASE_URL")) {
            self.broker.database_url = Some(SecretString::from(v));
        }
        if let Some(v) = non_empty(var("CHECKPOINT_PATH")) {
            self.pipeline.checkpoint_path = PathBuf::from(v);
        }
        if let Some(v) = non_empty(var("POLL_INTERVAL_SECS")) {
            self.pipeline.poll_interval = Duration::from_secs(parse_var("POLL_INTERVAL_SECS", &v)?);
        }
        if let Some(v) = non_empty(var("BATCH_SIZE")) {
            self.pipeline.batch_size = parse_var("BATCH_SIZE", &v)?;
        }
        if let Some(v) = non_empty(var("WORKER_ID")) {
            self.worker.worker_id = v;
        }
        if let Some(v) = non_empty(var("OTEL_ENDPOINT")) {
            self.otel_endpoint = Some(v);
        }
        if let Some(v) = non_empty(var("LOG_LEVEL")) {
            self.log_level = v;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.engine.base_url.is_empty() {
            return Err(Error::Config("engine base_url must not be empty".to_string()));
        }
        if self.pipeline.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".to_string()));
        }
        if self.pipeline.poll_interval.is_zero() {
            return Err(Error::Config("poll interval must be positive".to_string()));
        }
        if self.pipeline.publish_attempts == 0 {
            return Err(Error::Config("publish_attempts must be at least 1".to_string()));
        }
        if self.worker.lock_duration.is_zero() || self.worker.tick.is_zero() {
            return Err(Error::Config(
                "worker lock duration and tick must be positive".to_string(),
            ));
        }
        if self.worker.max_tasks == 0 || self.worker.concurrency == 0 {
            return Err(Error::Config(
                "worker max_tasks and concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("environment variable {name} has invalid value {value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn env_overrides_defaults() {
        let vars: HashMap<&str, &str> = [
            ("FLUXNOVA_BASE_URL", "http://engine:8080/engine-rest"),
            ("BATCH_SIZE", "25"),
            ("POLL_INTERVAL_SECS", "3"),
            ("LOG_LEVEL", ""),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.engine.base_url, "http://engine:8080/engine-rest");
        assert_eq!(config.pipeline.batch_size, 25);
        assert_eq!(config.pipeline.poll_interval, Duration::from_secs(3));
        // empty values are ignored
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn invalid_numeric_env_is_a_config_error() {
        let mut config = Config::default();
        let err = config
            .apply_env(|name| (name == "BATCH_SIZE").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn zero_batch_size_fails_validation() {
        let mut config = Config::default();
        config.pipeline.batch_size = 0;
        assert!(config.validate().is_err());
    }
}
