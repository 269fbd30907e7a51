//! Append-only JSONL run log. One run record per agent, one final cost record per
//! pipeline run.

use std::path::{Path, PathBuf};

use dynamate_core::messages::Message;
use dynamate_core::tools::ToolDefinition;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Format of every timestamp the pipeline writes (local time).
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, thiserror::Error)]
pub enum RunLogError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub fn timestamp_now() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Everything an agent saw and produced during one run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub timestamp: String,
    pub agent: String,
    pub model: String,
    pub temperature: f64,
    pub tools: Vec<ToolDefinition>,
    pub messages: Vec<Message>,
    pub files_created: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FinalRecord {
    pub timestamp_final: String,
    pub total_completion_cost: f64,
}

impl FinalRecord {
    pub fn now(total_completion_cost: f64) -> Self {
        Self {
            timestamp_final: timestamp_now(),
            total_completion_cost,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RunLog {
    path: PathBuf,
}

impl RunLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single JSON line, creating the file and its
    /// directory on first use.
    pub async fn append<T: Serialize>(&self, record: &T) -> Result<(), RunLogError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let io = |source| RunLogError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io)?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(io)?;
        file.write_all(line.as_bytes()).await.map_err(io)?;
        file.flush().await.map_err(io)?;
        debug!(path = %self.path.display(), bytes = line.len(), "run log record appended");
        Ok(())
    }
}

/// Names of the regular files directly inside `dir`, sorted. Missing directory
/// yields an empty list.
pub async fn sandbox_files(dir: &Path) -> Vec<String> {
    let mut names = Vec::new();
    let Ok(mut reader) = tokio::fs::read_dir(dir).await else {
        return names;
    };
    while let Ok(Some(entry)) = reader.next_entry().await {
        if entry.file_type().await.is_ok_and(|t| t.is_file()) {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    names
}
