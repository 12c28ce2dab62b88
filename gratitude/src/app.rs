//! Application state and initialization
//!
//! Everything the app needs is constructed here from a data directory and
//! torn down through [`AppState::close`]. Tests build isolated instances per
//! case instead of sharing globals.

use crate::config::{DATABASE_FILE, ERROR_LOG_FILE};
use crate::database::{create_memory_pool, create_pool, Repository};
use crate::error::Result;
use crate::services::{ErrorLog, JournalService, SettingsService, TransferService};
use std::path::{Path, PathBuf};

/// Central application state holding all services
#[derive(Clone)]
pub struct AppState {
    pub app_data_dir: Option<PathBuf>,
    pub repo: Repository,
    pub settings: SettingsService,
    pub journal: JournalService,
    pub transfer: TransferService,
    pub errors: ErrorLog,
}

impl AppState {
    /// Open (creating if needed) the app data under `app_data_dir`
    pub async fn open(app_data_dir: &Path) -> Result<Self> {
        tracing::info!("Initializing application");
        tracing::info!("App data directory: {:?}", app_data_dir);

        tokio::fs::create_dir_all(app_data_dir).await?;

        let pool = create_pool(&app_data_dir.join(DATABASE_FILE)).await?;
        let errors = ErrorLog::load(app_data_dir.join(ERROR_LOG_FILE)).await;
        let state = Self::assemble(Repository::new(pool), errors, Some(app_data_dir.to_path_buf())).await?;

        tracing::info!("Application initialized successfully");
        Ok(state)
    }

    /// Fully in-memory state; nothing touches disk
    pub async fn in_memory() -> Result<Self> {
        let pool = create_memory_pool().await?;
        Self::assemble(Repository::new(pool), ErrorLog::new(), None).await
    }

    async fn assemble(repo: Repository, errors: ErrorLog, app_data_dir: Option<PathBuf>) -> Result<Self> {
        let settings = SettingsService::new(repo.clone());
        settings.load().await?;

        let journal = JournalService::new(repo.clone(), settings.clone());
        let transfer = TransferService::new(repo.clone(), settings.clone(), journal.clone());

        Ok(Self {
            app_data_dir,
            repo,
            settings,
            journal,
            transfer,
            errors,
        })
    }

    /// Forget any unlocked key and close the database
    pub async fn close(&self) {
        self.journal.lock().await;
        self.repo.close().await;
        tracing::info!("Application closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_creates_data_files() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("tiny-gratitude");

        let state = AppState::open(&dir).await.unwrap();
        state.journal.save_day("2024-03-01", "Sunny walk", None).await.unwrap();
        state.errors.append("boom", None).await;
        state.close().await;

        assert!(dir.join("db.sqlite").exists());
        assert!(dir.join("errors.json").exists());

        let reopened = AppState::open(&dir).await.unwrap();
        let entry = reopened.journal.get_day("2024-03-01").await.unwrap().unwrap();
        assert_eq!(entry.entry, "Sunny walk");
        assert_eq!(reopened.errors.list().await.len(), 1);
        reopened.close().await;
    }

    #[tokio::test]
    async fn test_in_memory_instances_are_isolated() {
        let a = AppState::in_memory().await.unwrap();
        let b = AppState::in_memory().await.unwrap();

        a.journal.save_day("2024-03-01", "Only in a", None).await.unwrap();
        assert!(b.journal.get_day("2024-03-01").await.unwrap().is_none());
    }
}
