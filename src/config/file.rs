//! TOML config file overlay.
//!
//! Every field is optional; only the ones present override the defaults.

use super::{CheckpointBackend, Config};
use crate::error::{Error, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub worker: WorkerSection,
    pub otel_endpoint: Option<String>,
    pub log_level: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSection {
    pub base_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerSection {
    pub database_url: Option<String>,
    pub processes_stream: Option<String>,
    pub events_stream: Option<String>,
    pub decisions_stream: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineSection {
    pub poll_interval_secs: Option<u64>,
    pub batch_size: Option<usize>,
    pub checkpoint: Option<String>,
    pub checkpoint_path: Option<PathBuf>,
    pub checkpoint_name: Option<String>,
    pub publish_attempts: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerSection {
    pub worker_id: Option<String>,
    pub max_tasks: Option<usize>,
    pub lock_duration_ms: Option<u64>,
    pub tick_ms: Option<u64>,
    pub concurrency: Option<usize>,
    pub use_priority: Option<bool>,
    pub topics: Option<Vec<String>>,
}

impl FileConfig {
    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        Self::parse(&content)
            .map_err(|e| Error::Config(format!("bad config file {}: {e}", path.display())))
    }

    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn apply(self, config: &mut Config) -> Result<()> {
        let FileConfig {
            engine,
            broker,
            pipeline,
            worker,
            otel_endpoint,
            log_level,
        } = self;

        if let Some(v) = engine.base_url {
            config.engine.base_url = v;
        }
        if let Some(v) = engine.username {
            config.engine.username = Some(v);
        }
        if let Some(v) = engine.password {
            config.engine.password = Some(SecretString::from(v));
        }
        if let Some(v) = engine.request_timeout_secs {
            config.engine.request_timeout = Duration::from_secs(v);
        }

        if let Some(v) = broker.database_url {
            config.broker.database_url = Some(SecretString::from(v));
        }
        if let Some(v) = broker.processes_stream {
            config.broker.processes_stream = v;
        }
        if let Some(v) = broker.events_stream {
            config.broker.events_stream = v;
        }
        if let Some(v) = broker.decisions_stream {
            config.broker.decisions_stream = v;
        }

        if let Some(v) = pipeline.poll_interval_secs {
            config.pipeline.poll_interval = Duration::from_secs(v);
        }
        if let Some(v) = pipeline.batch_size {
            config.pipeline.batch_size = v;
        }
        if let Some(v) = pipeline.checkpoint {
            config.pipeline.checkpoint = v.parse::<CheckpointBackend>()?;
        }
        if let Some(v) = pipeline.checkpoint_path {
            config.pipeline.checkpoint_path = v;
        }
        if let Some(v) = pipeline.checkpoint_name {
            config.pipeline.checkpoint_name = v;
        }
        if let Some(v) = pipeline.publish_attempts {
            config.pipeline.publish_attempts = v;
        }

        if let Some(v) = worker.worker_id {
            config.worker.worker_id = v;
        }
        if let Some(v) = worker.max_tasks {
            config.worker.max_tasks = v;
        }
        if let Some(v) = worker.lock_duration_ms {
            config.worker.lock_duration = Duration::from_millis(v);
        }
        if let Some(v) = worker.tick_ms {
            config.worker.tick = Duration::from_millis(v);
        }
        if let Some(v) = worker.concurrency {
            config.worker.concurrency = v;
        }
        if let Some(v) = worker.use_priority {
            config.worker.use_priority = v;
        }
        if let Some(v) = worker.topics {
            config.worker.topics = v;
        }

        if otel_endpoint.is_some() {
            config.otel_endpoint = otel_endpoint;
        }
        if let Some(v) = log_level {
            config.log_level = v;
        }
        Ok(())
    }
}
