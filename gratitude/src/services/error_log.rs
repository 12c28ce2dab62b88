//! Error log
//!
//! Capped ring buffer of user-visible error records, persisted as JSON in
//! the data directory. The oldest records are evicted past the capacity.

use crate::config::ERROR_LOG_CAPACITY;
use crate::error::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;

/// One recorded error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Epoch milliseconds
    pub t: i64,
    /// Message
    pub m: String,
    /// Stack or source chain, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<String>,
}

/// Shared error log; clones append to the same buffer
#[derive(Clone)]
pub struct ErrorLog {
    records: Arc<Mutex<VecDeque<ErrorRecord>>>,
    capacity: usize,
    path: Option<PathBuf>,
}

impl ErrorLog {
    /// In-memory log
    pub fn new() -> Self {
        Self::with_capacity(ERROR_LOG_CAPACITY, None)
    }

    pub fn with_capacity(capacity: usize, path: Option<PathBuf>) -> Self {
        Self {
            records: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
            path,
        }
    }

    /// Load a persisted log. A missing or corrupt file yields an empty log.
    pub async fn load(path: PathBuf) -> Self {
        let log = Self::with_capacity(ERROR_LOG_CAPACITY, Some(path.clone()));

        match fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str::<Vec<ErrorRecord>>(&content) {
                Ok(saved) => {
                    let mut records = log.records.lock().await;
                    let skip = saved.len().saturating_sub(log.capacity);
                    records.extend(saved.into_iter().skip(skip));
                }
                Err(e) => tracing::warn!("Discarding unreadable error log {:?}: {}", path, e),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to read error log {:?}: {}", path, e),
        }

        log
    }

    /// Record an error, evicting the oldest beyond capacity
    pub async fn append(&self, message: impl Into<String>, stack: Option<String>) {
        // Held across the write so snapshots reach the file in order
        let mut records = self.records.lock().await;
        records.push_back(ErrorRecord {
            t: Utc::now().timestamp_millis(),
            m: message.into(),
            s: stack,
        });
        while records.len() > self.capacity {
            records.pop_front();
        }

        let snapshot: Vec<ErrorRecord> = records.iter().cloned().collect();
        self.persist(&snapshot).await;
    }

    /// Record an application error with its display text
    pub async fn append_error(&self, err: &crate::error::AppError) {
        self.append(err.to_string(), Some(format!("{:?}", err))).await;
    }

    /// Copy of the records, oldest first
    pub async fn list(&self) -> Vec<ErrorRecord> {
        self.records.lock().await.iter().cloned().collect()
    }

    pub async fn clear(&self) {
        let mut records = self.records.lock().await;
        records.clear();
        self.persist(&[]).await;
    }

    // Persistence is best-effort: the log must never fail the caller
    async fn persist(&self, records: &[ErrorRecord]) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(e) = write_records(path, records).await {
            tracing::warn!("Failed to persist error log {:?}: {}", path, e);
        }
    }
}

impl Default for ErrorLog {
    fn default() -> Self {
        Self::new()
    }
}

async fn write_records(path: &std::path::Path, records: &[ErrorRecord]) -> Result<()> {
    let content = serde_json::to_string(records)?;
    fs::write(path, content).await?;
    Ok(())
}
