//! Export / import service
//!
//! Serializes both tables to a single JSON document and merges such a
//! document back in. Import validates the whole document before writing
//! and applies it in one transaction. The merged store must still be all
//! plaintext or all ciphertext under one salt, or nothing is written.

use crate::config::{CRYPTO_SALT_KEY, KNOWN_SETTING_KEYS, SETTINGS_KEY};
use crate::database::{Entry, ExportDocument, Repository, Settings};
use crate::error::{AppError, Result};
use crate::services::{JournalService, SettingsService};
use std::collections::HashSet;
use std::path::Path;
use tokio::fs;

/// Counts of what an import wrote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub entries: usize,
    pub settings: usize,
}

/// Export/import service
#[derive(Clone)]
pub struct TransferService {
    repo: Repository,
    settings: SettingsService,
    journal: JournalService,
}

fn mode(encrypted: bool) -> &'static str {
    if encrypted {
        "encrypted"
    } else {
        "plaintext"
    }
}

impl TransferService {
    pub fn new(repo: Repository, settings: SettingsService, journal: JournalService) -> Self {
        Self {
            repo,
            settings,
            journal,
        }
    }

    /// Snapshot of all entries (as stored) and all settings rows
    pub async fn export(&self) -> Result<ExportDocument> {
        let doc = self.repo.export_all().await?;
        tracing::info!(
            "Exported {} entries and {} settings rows",
            doc.greats.len(),
            doc.settings.len()
        );
        Ok(doc)
    }

    pub async fn export_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.export().await?)?)
    }

    /// Write the export to a file, via a temp file and rename
    pub async fn export_to_file(&self, path: &Path) -> Result<()> {
        let json = self.export_json().await?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, json.as_bytes()).await?;
        fs::rename(&temp_path, path).await?;

        tracing::info!("Export written to {:?}", path);
        Ok(())
    }

    /// Merge a document: rows sharing a day are overwritten, not duplicated
    pub async fn import(&self, mut doc: ExportDocument) -> Result<ImportSummary> {
        for entry in &mut doc.greats {
            // Older exports carry no editedAt
            if entry.edited_at == 0 {
                entry.edited_at = entry.created_at;
            }
            entry.validate()?;
        }

        for record in &doc.settings {
            if !KNOWN_SETTING_KEYS.contains(&record.key.as_str()) {
                return Err(AppError::Validation(format!(
                    "Unknown setting key in import: {}",
                    record.key
                )));
            }
        }

        let mut seen = HashSet::new();
        for entry in &doc.greats {
            if !seen.insert(entry.ymd.as_str()) {
                return Err(AppError::Validation(format!(
                    "Import has two entries for {}",
                    entry.ymd
                )));
            }
        }

        let guard = self.settings.lock_writes().await;
        let key_stale = self.check_encryption_mode(&doc).await?;
        self.repo.apply_batch(&doc.greats, &doc.settings).await?;
        drop(guard);

        if key_stale {
            // Mode or salt changed under the unlocked key
            self.journal.lock().await;
        }
        self.settings.reload().await?;

        let summary = ImportSummary {
            entries: doc.greats.len(),
            settings: doc.settings.len(),
        };
        tracing::info!("Imported {} entries and {} settings rows", summary.entries, summary.settings);
        Ok(summary)
    }

    /// Reject a document whose rows, flag or salt would leave mixed storage.
    ///
    /// Returns true when the unlocked key no longer matches the store.
    async fn check_encryption_mode(&self, doc: &ExportDocument) -> Result<bool> {
        let current = self.repo.get_settings().await?;
        let encrypted = match doc.settings.iter().find(|r| r.key == SETTINGS_KEY) {
            Some(record) => Settings::from_stored(&record.value).encryption,
            None => current.encryption,
        };

        if let Some(entry) = doc.greats.iter().find(|e| e.is_encrypted() != encrypted) {
            return Err(AppError::Validation(format!(
                "Entry for {} is {} but the journal would be {}",
                entry.ymd,
                mode(entry.is_encrypted()),
                mode(encrypted)
            )));
        }

        let incoming: HashSet<&str> = doc.greats.iter().map(|e| e.ymd.as_str()).collect();
        let kept: Vec<Entry> = self
            .repo
            .list_all()
            .await?
            .into_iter()
            .filter(|e| !incoming.contains(e.ymd.as_str()))
            .collect();
        if let Some(entry) = kept.iter().find(|e| e.is_encrypted() != encrypted) {
            return Err(AppError::Validation(format!(
                "Import would leave the {} entry for {} in a {} journal",
                mode(entry.is_encrypted()),
                entry.ymd,
                mode(encrypted)
            )));
        }

        let stored_salt = self.repo.get_setting(CRYPTO_SALT_KEY).await?;
        let incoming_salt = doc
            .settings
            .iter()
            .find(|r| r.key == CRYPTO_SALT_KEY)
            .map(|r| &r.value);
        if doc.greats.iter().any(Entry::is_encrypted) && incoming_salt.is_none() {
            return Err(AppError::Validation(
                "Encrypted entries must come with the salt they were sealed under".to_string(),
            ));
        }

        let salt_changes = matches!(incoming_salt, Some(salt) if Some(salt) != stored_salt.as_ref());
        if salt_changes && kept.iter().any(Entry::is_encrypted) {
            return Err(AppError::Validation(
                "Import replaces the salt of entries it does not replace".to_string(),
            ));
        }
        if !salt_changes {
            self.journal.check_sealed(&doc.greats).await?;
        }

        Ok(salt_changes || encrypted != current.encryption)
    }

    pub async fn import_json(&self, json: &str) -> Result<ImportSummary> {
        let doc: ExportDocument = serde_json::from_str(json)
            .map_err(|e| AppError::Validation(format!("Malformed import document: {}", e)))?;
        self.import(doc).await
    }

    pub async fn import_from_file(&self, path: &Path) -> Result<ImportSummary> {
        tracing::info!("Importing from {:?}", path);
        let json = fs::read_to_string(path).await?;
        self.import_json(&json).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{create_memory_pool, Theme};
    use crate::services::JournalService;
    use tempfile::TempDir;

    async fn create_test_services() -> (JournalService, TransferService) {
        let repo = Repository::new(create_memory_pool().await.unwrap());
        let settings = SettingsService::new(repo.clone());
        let journal = JournalService::new(repo.clone(), settings.clone());
        (journal.clone(), TransferService::new(repo, settings, journal))
    }

    #[tokio::test]
    async fn test_export_then_import_into_fresh_store() {
        let (journal, transfer) = create_test_services().await;
        journal.save_day("2024-03-01", "one", Some("🌿")).await.unwrap();
        journal.save_day("2024-03-02", "two", None).await.unwrap();
        let json = transfer.export_json().await.unwrap();

        let (journal2, transfer2) = create_test_services().await;
        let summary = transfer2.import_json(&json).await.unwrap();

        assert_eq!(summary.entries, 2);
        assert_eq!(journal2.list_all().await.unwrap(), journal.list_all().await.unwrap());
    }

    #[tokio::test]
    async fn test_import_overwrites_matching_days() {
        let (journal, transfer) = create_test_services().await;
        journal.save_day("2024-03-01", "local", None).await.unwrap();

        let json = r#"{
            "greats": [
                { "id": "other", "ymd": "2024-03-01", "entry": "imported", "createdAt": 1, "editedAt": 2, "v": 1 },
                { "id": "new", "ymd": "2024-03-05", "entry": "legacy", "createdAt": 5, "v": 1 }
            ],
            "settings": [ { "key": "settings", "value": { "theme": "midnight", "badgeNudges": false } } ]
        }"#;
        transfer.import_json(json).await.unwrap();

        let all = journal.list_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(journal.get_day("2024-03-01").await.unwrap().unwrap().entry, "imported");

        let legacy = journal.get_day("2024-03-05").await.unwrap().unwrap();
        assert_eq!(legacy.edited_at, legacy.created_at);

        // The settings cache picked up the imported row
        assert_eq!(transfer.settings.get().theme, Theme::Midnight);
        assert!(!transfer.settings.get().badge_nudges);
    }

    #[tokio::test]
    async fn test_invalid_import_writes_nothing() {
        let (journal, transfer) = create_test_services().await;

        let too_long = format!(
            r#"{{ "greats": [
                {{ "id": "a", "ymd": "2024-03-01", "entry": "fine", "createdAt": 1, "v": 1 }},
                {{ "id": "b", "ymd": "2024-03-02", "entry": "{}", "createdAt": 1, "v": 1 }}
            ] }}"#,
            "x".repeat(300)
        );
        assert!(matches!(transfer.import_json(&too_long).await, Err(AppError::Validation(_))));

        assert!(matches!(transfer.import_json("{ not json").await, Err(AppError::Validation(_))));

        let unknown_key = r#"{ "settings": [ { "key": "telemetry", "value": true } ] }"#;
        assert!(matches!(transfer.import_json(unknown_key).await, Err(AppError::Validation(_))));

        let duplicate_day = r#"{ "greats": [
            { "id": "a", "ymd": "2024-03-01", "entry": "x", "createdAt": 1, "v": 1 },
            { "id": "b", "ymd": "2024-03-01", "entry": "y", "createdAt": 1, "v": 1 }
        ] }"#;
        assert!(matches!(transfer.import_json(duplicate_day).await, Err(AppError::Validation(_))));

        assert!(journal.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_export_to_file_and_back() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("out").join("export.json");

        let (journal, transfer) = create_test_services().await;
        journal.save_day("2024-03-01", "on disk", None).await.unwrap();
        transfer.export_to_file(&path).await.unwrap();
        assert!(path.exists());

        let (journal2, transfer2) = create_test_services().await;
        transfer2.import_from_file(&path).await.unwrap();
        assert_eq!(journal2.get_day("2024-03-01").await.unwrap().unwrap().entry, "on disk");
    }

    #[tokio::test]
    async fn test_encrypted_rows_export_as_ciphertext() {
        let (journal, transfer) = create_test_services().await;
        journal.save_day("2024-03-01", "secret", None).await.unwrap();
        journal.enable_encryption("pass").await.unwrap();

        let doc = transfer.export().await.unwrap();
        assert!(doc.greats[0].iv.is_some());
        assert_ne!(doc.greats[0].entry, "secret");
        assert!(doc.settings.iter().any(|r| r.key == "crypto_salt"));

        // The salt travels with the data, so the passcode still opens it elsewhere
        let (journal2, transfer2) = create_test_services().await;
        transfer2.import(doc).await.unwrap();
        journal2.unlock("pass").await.unwrap();
        assert_eq!(journal2.get_day("2024-03-01").await.unwrap().unwrap().entry, "secret");
    }

    async fn encrypted_store() -> (JournalService, TransferService) {
        let (journal, transfer) = create_test_services().await;
        journal.save_day("2024-03-01", "sealed one", None).await.unwrap();
        journal.save_day("2024-03-02", "sealed two", None).await.unwrap();
        journal.enable_encryption("pass").await.unwrap();
        (journal, transfer)
    }

    /// Every stored row is ciphertext exactly when the flag says so
    async fn assert_single_mode(transfer: &TransferService) {
        let encrypted = transfer.repo.get_settings().await.unwrap().encryption;
        for entry in transfer.repo.list_all().await.unwrap() {
            assert_eq!(entry.is_encrypted(), encrypted, "entry {}", entry.ymd);
        }
    }

    #[tokio::test]
    async fn test_plaintext_rows_rejected_by_encrypted_store() {
        let (journal, transfer) = encrypted_store().await;

        let json = r#"{ "greats": [
            { "id": "p", "ymd": "2024-03-09", "entry": "plain", "createdAt": 1, "v": 1 }
        ] }"#;
        assert!(matches!(transfer.import_json(json).await, Err(AppError::Validation(_))));

        assert_eq!(transfer.repo.list_all().await.unwrap().len(), 2);
        assert_eq!(journal.get_day("2024-03-01").await.unwrap().unwrap().entry, "sealed one");
        assert_single_mode(&transfer).await;
    }

    #[tokio::test]
    async fn test_plaintext_export_cannot_strand_ciphertext() {
        let (journal, transfer) = encrypted_store().await;

        // A plaintext export that covers only one of the two sealed days
        let (source, source_transfer) = create_test_services().await;
        source.save_day("2024-03-01", "from elsewhere", None).await.unwrap();
        let json = source_transfer.export_json().await.unwrap();

        assert!(matches!(transfer.import_json(&json).await, Err(AppError::Validation(_))));
        assert!(transfer.repo.get_settings().await.unwrap().encryption);
        assert!(journal.is_unlocked().await);
        assert_single_mode(&transfer).await;
    }

    #[tokio::test]
    async fn test_salt_swap_rejected_while_sealed_rows_remain() {
        let (_journal, transfer) = encrypted_store().await;
        let stored_salt = transfer.repo.get_setting(CRYPTO_SALT_KEY).await.unwrap();

        let (other, other_transfer) = create_test_services().await;
        other.save_day("2024-04-01", "other salt", None).await.unwrap();
        other.enable_encryption("pass").await.unwrap();
        let doc = other_transfer.export().await.unwrap();

        assert!(matches!(transfer.import(doc).await, Err(AppError::Validation(_))));
        assert_eq!(transfer.repo.get_setting(CRYPTO_SALT_KEY).await.unwrap(), stored_salt);
        assert!(transfer.repo.get_by_day("2024-04-01").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sealed_rows_need_their_salt() {
        let (_journal, transfer) = encrypted_store().await;
        let mut doc = transfer.export().await.unwrap();
        doc.settings.retain(|r| r.key != CRYPTO_SALT_KEY);

        assert!(matches!(transfer.import(doc).await, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_rows_sealed_under_another_passcode_rejected() {
        let (journal, transfer) = encrypted_store().await;
        let salt = transfer.repo.get_setting(CRYPTO_SALT_KEY).await.unwrap().unwrap();

        // Same salt, different passcode
        let (other, other_transfer) = create_test_services().await;
        other_transfer
            .import(ExportDocument {
                greats: Vec::new(),
                settings: vec![crate::database::SettingRecord {
                    key: CRYPTO_SALT_KEY.to_string(),
                    value: salt,
                }],
            })
            .await
            .unwrap();
        other.save_day("2024-03-05", "wrong key", None).await.unwrap();
        other.enable_encryption("different").await.unwrap();
        let doc = other_transfer.export().await.unwrap();

        assert!(matches!(transfer.import(doc).await, Err(AppError::CannotDecrypt(_))));
        assert!(transfer.repo.get_by_day("2024-03-05").await.unwrap().is_none());
        assert!(journal.is_unlocked().await);
    }

    #[tokio::test]
    async fn test_full_plaintext_replacement_locks_the_key() {
        let (journal, transfer) = encrypted_store().await;

        let (source, source_transfer) = create_test_services().await;
        source.save_day("2024-03-01", "plain one", None).await.unwrap();
        source.save_day("2024-03-02", "plain two", None).await.unwrap();
        let json = source_transfer.export_json().await.unwrap();

        transfer.import_json(&json).await.unwrap();

        assert!(!transfer.settings.get().encryption);
        assert!(!journal.is_unlocked().await);
        assert_eq!(journal.get_day("2024-03-02").await.unwrap().unwrap().entry, "plain two");
        assert_single_mode(&transfer).await;
    }
}
