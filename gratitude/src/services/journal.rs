//! Journal service
//!
//! Day-oriented operations on top of the repository: validation, timestamps,
//! and routing entry content through the crypto module when the store is
//! encrypted. Encryption is store-wide; switching it on or off rewrites
//! every row in one transaction instead of leaving mixed storage behind.

use crate::config::{CRYPTO_SALT_KEY, ENTRY_SCHEMA_VERSION, MAX_ENTRY_LENGTH, SETTINGS_KEY};
use crate::crypto::{self, JournalKey};
use crate::database::{entry_length, parse_ymd, ymd_from_date, Entry, EntryContent, Repository, SettingRecord};
use crate::error::{AppError, Result};
use crate::services::SettingsService;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{Local, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Service for day entries
#[derive(Clone)]
pub struct JournalService {
    repo: Repository,
    settings: SettingsService,
    key: Arc<RwLock<Option<JournalKey>>>,
}

impl JournalService {
    pub fn new(repo: Repository, settings: SettingsService) -> Self {
        Self {
            repo,
            settings,
            key: Arc::new(RwLock::new(None)),
        }
    }

    /// Save the entry for a day: created on first save, updated in place after.
    ///
    /// Returns the plaintext view of what was stored.
    pub async fn save_day(&self, ymd: &str, text: &str, mood: Option<&str>) -> Result<Entry> {
        parse_ymd(ymd)?;

        let text = text.trim();
        if text.is_empty() {
            return Err(AppError::Validation("Entry must not be empty".to_string()));
        }
        let len = entry_length(text);
        if len > MAX_ENTRY_LENGTH {
            return Err(AppError::Validation(format!(
                "Entry is {} characters, the limit is {}",
                len, MAX_ENTRY_LENGTH
            )));
        }
        let mood = mood
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string);

        let now = Utc::now().timestamp_millis();
        let plain = match self.repo.get_by_day(ymd).await? {
            Some(prev) => Entry {
                id: prev.id,
                ymd: ymd.to_string(),
                entry: text.to_string(),
                mood,
                created_at: prev.created_at,
                // Strictly increasing even for two saves in the same millisecond
                edited_at: now.max(prev.edited_at + 1),
                iv: None,
                schema_version: ENTRY_SCHEMA_VERSION,
            },
            None => Entry {
                id: Uuid::new_v4().to_string(),
                ymd: ymd.to_string(),
                entry: text.to_string(),
                mood,
                created_at: now,
                edited_at: now,
                iv: None,
                schema_version: ENTRY_SCHEMA_VERSION,
            },
        };

        // The mode cannot flip between the check and the write
        let _guard = self.settings.lock_writes().await;
        let stored = if self.repo.get_settings().await?.encryption {
            let key = self.current_key().await?;
            seal(&key, &plain)?
        } else {
            plain.clone()
        };

        self.repo.upsert(&stored).await?;

        tracing::info!("Saved entry for {}", ymd);
        Ok(plain)
    }

    /// Entry for a day, decrypted
    pub async fn get_day(&self, ymd: &str) -> Result<Option<Entry>> {
        match self.repo.get_by_day(ymd).await? {
            Some(stored) => Ok(Some(self.open(stored).await?)),
            None => Ok(None),
        }
    }

    /// Entries in `[start, end]` ascending by day, decrypted
    pub async fn list_range(&self, start_ymd: &str, end_ymd: &str) -> Result<Vec<Entry>> {
        let stored = self.repo.list_by_range(start_ymd, end_ymd).await?;
        self.open_all(stored).await
    }

    /// All entries oldest first, decrypted
    pub async fn list_all(&self) -> Result<Vec<Entry>> {
        let stored = self.repo.list_all().await?;
        self.open_all(stored).await
    }

    /// Delete an entry; unknown ids are ignored
    pub async fn delete(&self, id: &str) -> Result<()> {
        tracing::info!("Deleting entry: {}", id);
        self.repo.delete(id).await
    }

    /// Whether the unfilled-today indicator should show
    pub async fn needs_nudge(&self, today_ymd: &str) -> Result<bool> {
        if !self.repo.get_settings().await?.badge_nudges {
            return Ok(false);
        }
        Ok(self.repo.get_by_day(today_ymd).await?.is_none())
    }

    pub async fn is_unlocked(&self) -> bool {
        self.key.read().await.is_some()
    }

    /// Derive the key from the stored salt and check it against stored data
    pub async fn unlock(&self, passcode: &str) -> Result<()> {
        let salt = self
            .load_salt()
            .await?
            .ok_or_else(|| AppError::Validation("Encryption has never been enabled".to_string()))?;

        let key = crypto::derive_key_async(passcode.to_string(), salt).await?;

        if let Some(sample) = self.repo.first_encrypted().await? {
            unseal(&key, &sample)?;
        }

        *self.key.write().await = Some(key);
        tracing::info!("Journal unlocked");
        Ok(())
    }

    /// Forget the key
    pub async fn lock(&self) {
        *self.key.write().await = None;
        tracing::info!("Journal locked");
    }

    /// Encrypt every plaintext entry and switch the store to encrypted mode.
    ///
    /// Rows and the settings flag change in one transaction.
    pub async fn enable_encryption(&self, passcode: &str) -> Result<()> {
        let _guard = self.settings.lock_writes().await;

        let mut settings = self.repo.get_settings().await?;
        if settings.encryption {
            return Err(AppError::Validation("Encryption is already enabled".to_string()));
        }

        let mut records = Vec::new();
        let salt = match self.load_salt().await? {
            Some(salt) => salt,
            None => {
                let salt = crypto::generate_salt();
                records.push(SettingRecord {
                    key: CRYPTO_SALT_KEY.to_string(),
                    value: serde_json::Value::String(STANDARD.encode(&salt)),
                });
                salt
            }
        };

        let key = crypto::derive_key_async(passcode.to_string(), salt).await?;

        let mut sealed = Vec::new();
        for entry in self.repo.list_all().await? {
            if entry.is_encrypted() {
                // Already sealed rows must open with this key, or we would mix keys
                unseal(&key, &entry)?;
                continue;
            }
            sealed.push(seal(&key, &entry)?);
        }

        settings.encryption = true;
        records.push(SettingRecord {
            key: SETTINGS_KEY.to_string(),
            value: serde_json::to_value(&settings)?,
        });

        self.repo.apply_batch(&sealed, &records).await?;
        *self.key.write().await = Some(key);
        self.settings.reload().await?;

        tracing::info!("Encryption enabled, {} entries encrypted", sealed.len());
        Ok(())
    }

    /// Decrypt every entry and switch the store back to plaintext.
    ///
    /// Requires an unlocked key.
    pub async fn disable_encryption(&self) -> Result<()> {
        let _guard = self.settings.lock_writes().await;

        let mut settings = self.repo.get_settings().await?;
        if !settings.encryption {
            return Err(AppError::Validation("Encryption is not enabled".to_string()));
        }
        let key = self.current_key().await?;

        let mut opened = Vec::new();
        for entry in self.repo.list_all().await? {
            if entry.is_encrypted() {
                opened.push(unseal(&key, &entry)?);
            }
        }

        settings.encryption = false;
        let records = vec![SettingRecord {
            key: SETTINGS_KEY.to_string(),
            value: serde_json::to_value(&settings)?,
        }];

        self.repo.apply_batch(&opened, &records).await?;
        self.lock().await;
        self.settings.reload().await?;

        tracing::info!("Encryption disabled, {} entries decrypted", opened.len());
        Ok(())
    }

    /// Sealed rows must open with the unlocked key; a locked journal
    /// cannot tell and accepts them
    pub(crate) async fn check_sealed(&self, entries: &[Entry]) -> Result<()> {
        let Some(key) = self.key.read().await.clone() else {
            return Ok(());
        };
        for entry in entries.iter().filter(|e| e.is_encrypted()) {
            unseal(&key, entry)?;
        }
        Ok(())
    }

    async fn current_key(&self) -> Result<JournalKey> {
        self.key.read().await.clone().ok_or(AppError::KeyRequired)
    }

    async fn load_salt(&self) -> Result<Option<Vec<u8>>> {
        let Some(value) = self.repo.get_setting(CRYPTO_SALT_KEY).await? else {
            return Ok(None);
        };
        let encoded = value
            .as_str()
            .ok_or_else(|| AppError::CannotDecrypt("Stored salt is not a string".to_string()))?;
        let salt = STANDARD
            .decode(encoded)
            .map_err(|_| AppError::CannotDecrypt("Stored salt is not valid base64".to_string()))?;
        Ok(Some(salt))
    }

    async fn open(&self, stored: Entry) -> Result<Entry> {
        if !stored.is_encrypted() {
            return Ok(stored);
        }
        let key = self.current_key().await?;
        unseal(&key, &stored)
    }

    async fn open_all(&self, stored: Vec<Entry>) -> Result<Vec<Entry>> {
        if !stored.iter().any(Entry::is_encrypted) {
            return Ok(stored);
        }
        let key = self.current_key().await?;
        stored
            .into_iter()
            .map(|e| if e.is_encrypted() { unseal(&key, &e) } else { Ok(e) })
            .collect()
    }
}

/// Today's day key in local time
pub fn today_ymd() -> String {
    ymd_from_date(Local::now().date_naive())
}

fn seal(key: &JournalKey, plain: &Entry) -> Result<Entry> {
    let content = EntryContent {
        entry: plain.entry.clone(),
        mood: plain.mood.clone(),
    };
    let payload = crypto::encrypt_json(key, &content)?;

    Ok(Entry {
        entry: payload.ciphertext,
        mood: None,
        iv: Some(payload.iv),
        ..plain.clone()
    })
}

fn unseal(key: &JournalKey, stored: &Entry) -> Result<Entry> {
    let iv = stored
        .iv
        .as_deref()
        .ok_or_else(|| AppError::CannotDecrypt(format!("Entry {} is not encrypted", stored.ymd)))?;
    let content: EntryContent = crypto::decrypt_json(key, iv, &stored.entry)?;

    Ok(Entry {
        entry: content.entry,
        mood: content.mood,
        iv: None,
        ..stored.clone()
    })
}
