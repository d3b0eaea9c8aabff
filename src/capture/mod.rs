//! Fine-tuning capture store
//!
//! Remote outputs that clear the capture bar are appended to a durable
//! JSONL log, one stream per artifact kind. Records are written once and
//! never rewritten or deleted here; a training pipeline consumes them out
//! of band.

use crate::policy::ArtifactKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::info;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture log IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("capture record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One training example harvested from a qualifying remote success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FineTuningRecord {
    pub timestamp: DateTime<Utc>,
    pub artifact: ArtifactKind,
    pub prompt_summary: String,
    pub output: String,
    pub score: u8,
    pub backend_id: String,
}

/// Append-only JSONL log directory, one file per artifact kind.
#[derive(Debug, Clone)]
pub struct CaptureStore {
    dir: PathBuf,
}

impl CaptureStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, kind: ArtifactKind) -> PathBuf {
        self.dir.join(format!("{kind}.jsonl"))
    }

    /// Append one record to the kind's stream, creating the directory and
    /// file on first use.
    pub async fn append(&self, record: &FineTuningRecord) -> Result<(), CaptureError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(record.artifact))
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        info!(
            artifact = %record.artifact,
            backend = %record.backend_id,
            score = record.score,
            "fine-tuning record captured"
        );
        Ok(())
    }

    /// The most recent `limit` records for a kind, oldest first. A stream
    /// that was never written reads as empty.
    pub async fn tail(
        &self,
        kind: ArtifactKind,
        limit: usize,
    ) -> Result<Vec<FineTuningRecord>, CaptureError> {
        let path = self.path_for(kind);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            records.push(serde_json::from_str(line)?);
        }

        let skip = records.len().saturating_sub(limit);
        Ok(records.split_off(skip))
    }
}
