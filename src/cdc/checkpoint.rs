//! Watermark persistence between process restarts.
//!
//! Restart semantics are an explicit load at startup and a save after each
//! cycle whose records have been handed to the publisher.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::model::Watermark;

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Stored watermark, or `None` if this checkpoint was never saved.
    async fn load(&self, name: &str) -> Result<Option<Watermark>>;

    /// Persist forward progress. Implementations never move a stored
    /// watermark backwards.
    async fn save(&self, name: &str, watermark: &Watermark) -> Result<()>;

    /// Operator reset: overwrite unconditionally (may rewind or clear).
    async fn reset(&self, name: &str, watermark: &Watermark) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CheckpointFile {
    checkpoints: BTreeMap<String, Watermark>,
}

/// JSON file holding named watermarks. Writes go to a temp file that is
/// renamed over the original.
pub struct FileCheckpointStore {
    path: PathBuf,
    // serializes read-modify-write cycles within this process
    lock: Mutex<()>,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<CheckpointFile> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                Error::Decode(format!("bad checkpoint file {}: {e}", self.path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(CheckpointFile::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, file: &CheckpointFile) -> Result<()> {
        let body = serde_json::to_string_pretty(file)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, name: &str) -> Result<Option<Watermark>> {
        let _guard = self.lock.lock().await;
        Ok(self.read().await?.checkpoints.get(name).copied())
    }

    async fn save(&self, name: &str, watermark: &Watermark) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut file = self.read().await?;
        let entry = file.checkpoints.entry(name.to_string()).or_default();
        *entry = entry.advance(*watermark);
        self.write(&file).await
    }

    async fn reset(&self, name: &str, watermark: &Watermark) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut file = self.read().await?;
        file.checkpoints.insert(name.to_string(), *watermark);
        self.write(&file).await
    }
}
