//! Settings service
//!
//! In-memory observable cache of the settings singleton, kept in sync with
//! the store. Writes reach the store before the cache publishes them.

use crate::database::{Repository, Settings, SettingsPatch};
use crate::error::Result;
use crate::observable::{Observable, Subscription};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// Service for managing application settings
#[derive(Clone)]
pub struct SettingsService {
    repo: Repository,
    cache: Observable<Settings>,
    // Held by every writer of the settings row or of the encryption state
    write_lock: Arc<Mutex<()>>,
}

impl SettingsService {
    pub fn new(repo: Repository) -> Self {
        Self {
            repo,
            cache: Observable::new(Settings::default()),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Load settings from the store (creating defaults if absent) and publish
    pub async fn load(&self) -> Result<Settings> {
        let settings = self.repo.get_settings().await?;
        self.cache.set(settings.clone());
        Ok(settings)
    }

    /// Re-read after out-of-band writes such as import or encryption passes
    pub async fn reload(&self) -> Result<Settings> {
        tracing::debug!("Reloading settings from store");
        self.load().await
    }

    /// Last known settings; defaults until [`load`](Self::load) has run
    pub fn get(&self) -> Settings {
        self.cache.get()
    }

    /// Merge a patch onto the stored value, persist, then publish.
    ///
    /// The stored row is the base, so a cache that was never loaded or is
    /// behind an encryption pass cannot write stale fields back.
    pub async fn update(&self, patch: SettingsPatch) -> Result<Settings> {
        let _guard = self.write_lock.lock().await;

        let next = patch.apply(&self.repo.get_settings().await?);
        next.validate()?;

        // No optimistic publish: a failed write leaves the cache untouched
        self.repo.put_settings(&next).await?;
        self.cache.set(next.clone());

        tracing::info!("Settings updated");
        Ok(next)
    }

    /// Exclusive access for writes that touch the settings row outside
    /// [`update`](Self::update), such as encryption passes and imports
    pub(crate) async fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }

    /// Observe settings; the listener fires immediately and on every change
    pub fn subscribe<F>(&self, listener: F) -> Result<Subscription>
    where
        F: Fn(&Settings) + Send + Sync + 'static,
    {
        self.cache.subscribe(listener)
    }
}
