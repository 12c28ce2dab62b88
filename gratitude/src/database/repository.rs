//! Repository layer for database operations
//!
//! Durable storage for day entries and the settings rows.
//! Every operation is a single statement or a single transaction, so a
//! failed write never leaves a partially applied change behind.

use super::models::*;
use crate::config::SETTINGS_KEY;
use crate::error::Result;
use sqlx::{Sqlite, SqlitePool};

/// Insert-or-overwrite keyed by day.
///
/// An existing row keeps its `id` and `created_at`; `edited_at` never
/// drops below `created_at`. Reusing an id on a different day violates
/// the primary key and fails without touching either row.
const UPSERT_ENTRY_SQL: &str = r#"
    INSERT INTO greats (id, ymd, entry, mood, created_at, edited_at, iv, schema_version)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(ymd) DO UPDATE SET
        entry = excluded.entry,
        mood = excluded.mood,
        edited_at = MAX(excluded.edited_at, greats.created_at),
        iv = excluded.iv,
        schema_version = excluded.schema_version
"#;

const UPSERT_SETTING_SQL: &str = r#"
    INSERT INTO settings (key, value) VALUES (?, ?)
    ON CONFLICT(key) DO UPDATE SET value = excluded.value
"#;

/// Repository for database operations
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Close the underlying pool, waiting for in-flight operations
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Insert an entry for an unseen day, or overwrite the day's row
    pub async fn upsert(&self, entry: &Entry) -> Result<()> {
        entry.validate()?;
        write_entry(&self.pool, entry).await?;

        tracing::debug!("Upserted entry for {}", entry.ymd);
        Ok(())
    }

    /// Get the entry for a day via the unique day index
    pub async fn get_by_day(&self, ymd: &str) -> Result<Option<Entry>> {
        parse_ymd(ymd)?;

        let entry = sqlx::query_as::<_, Entry>("SELECT * FROM greats WHERE ymd = ?")
            .bind(ymd)
            .fetch_optional(&self.pool)
            .await?;

        Ok(entry)
    }

    /// Any one encrypted entry, used to check a key before trusting it
    pub async fn first_encrypted(&self) -> Result<Option<Entry>> {
        let entry = sqlx::query_as::<_, Entry>(
            "SELECT * FROM greats WHERE iv IS NOT NULL ORDER BY created_at ASC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(entry)
    }

    /// Entries with `start <= ymd <= end`, ascending by day
    pub async fn list_by_range(&self, start_ymd: &str, end_ymd: &str) -> Result<Vec<Entry>> {
        parse_ymd(start_ymd)?;
        parse_ymd(end_ymd)?;

        let entries = sqlx::query_as::<_, Entry>(
            r#"
            SELECT * FROM greats
            WHERE ymd BETWEEN ? AND ?
            ORDER BY ymd ASC
            "#,
        )
        .bind(start_ymd)
        .bind(end_ymd)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    /// All entries, oldest first
    pub async fn list_all(&self) -> Result<Vec<Entry>> {
        let entries = sqlx::query_as::<_, Entry>(
            r#"
            SELECT * FROM greats
            ORDER BY created_at ASC, ymd ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    /// Delete an entry. Deleting an unknown id is a no-op.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let rows = sqlx::query("DELETE FROM greats WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if rows == 0 {
            tracing::debug!("Delete of absent entry ignored: {}", id);
        } else {
            tracing::debug!("Deleted entry: {}", id);
        }
        Ok(())
    }

    /// Read a raw settings row as JSON
    pub async fn get_setting(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let raw: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(raw.map(|text| parse_setting_text(key, &text)))
    }

    /// Write a raw settings row
    pub async fn set_setting(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        write_setting(&self.pool, key, value).await?;

        tracing::debug!("Set setting: {}", key);
        Ok(())
    }

    /// Read the settings singleton.
    ///
    /// Absent row: defaults are written and returned. Missing or
    /// unreadable fields fall back to their defaults.
    pub async fn get_settings(&self) -> Result<Settings> {
        match self.get_setting(SETTINGS_KEY).await? {
            Some(value) => Ok(Settings::from_stored(&value)),
            None => {
                tracing::info!("Settings row not found, creating default settings");
                let defaults = Settings::default();
                self.put_settings(&defaults).await?;
                Ok(defaults)
            }
        }
    }

    /// Replace the settings singleton
    pub async fn put_settings(&self, settings: &Settings) -> Result<()> {
        settings.validate()?;
        let value = serde_json::to_value(settings)?;
        self.set_setting(SETTINGS_KEY, &value).await
    }

    /// Snapshot both tables
    pub async fn export_all(&self) -> Result<ExportDocument> {
        let greats = self.list_all().await?;

        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM settings ORDER BY key ASC")
                .fetch_all(&self.pool)
                .await?;

        let settings = rows
            .into_iter()
            .map(|(key, text)| SettingRecord {
                value: parse_setting_text(&key, &text),
                key,
            })
            .collect();

        Ok(ExportDocument { greats, settings })
    }

    /// Write many entries and settings rows in one transaction.
    ///
    /// Every entry is validated before anything is written; any failure
    /// rolls the whole batch back.
    pub async fn apply_batch(&self, entries: &[Entry], settings: &[SettingRecord]) -> Result<()> {
        for entry in entries {
            entry.validate()?;
        }

        let mut tx = self.pool.begin().await?;

        for entry in entries {
            write_entry(&mut *tx, entry).await?;
        }
        for record in settings {
            write_setting(&mut *tx, &record.key, &record.value).await?;
        }

        tx.commit().await?;

        tracing::info!(
            "Applied batch of {} entries and {} settings rows",
            entries.len(),
            settings.len()
        );
        Ok(())
    }
}

async fn write_entry<'e, E>(executor: E, entry: &Entry) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(UPSERT_ENTRY_SQL)
        .bind(&entry.id)
        .bind(&entry.ymd)
        .bind(&entry.entry)
        .bind(&entry.mood)
        .bind(entry.created_at)
        .bind(entry.edited_at)
        .bind(&entry.iv)
        .bind(entry.schema_version)
        .execute(executor)
        .await?;
    Ok(())
}

async fn write_setting<'e, E>(executor: E, key: &str, value: &serde_json::Value) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let text = serde_json::to_string(value)?;
    sqlx::query(UPSERT_SETTING_SQL)
        .bind(key)
        .bind(text)
        .execute(executor)
        .await?;
    Ok(())
}

fn parse_setting_text(key: &str, text: &str) -> serde_json::Value {
    serde_json::from_str(text).unwrap_or_else(|_| {
        tracing::warn!("Setting {} is not JSON, keeping it as text", key);
        serde_json::Value::String(text.to_string())
    })
}

// Test-only lookups that bypass the day index
#[cfg(test)]
impl Repository {
    pub(crate) async fn get_by_id(&self, id: &str) -> Result<Option<Entry>> {
        let entry = sqlx::query_as::<_, Entry>("SELECT * FROM greats WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(entry)
    }

    pub(crate) async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM greats")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ENTRY_SCHEMA_VERSION;
    use crate::database::create_memory_pool;
    use crate::error::AppError;
    use serde_json::json;

    async fn create_test_repo() -> Repository {
        Repository::new(create_memory_pool().await.unwrap())
    }

    fn entry(id: &str, ymd: &str, text: &str, at: i64) -> Entry {
        Entry {
            id: id.to_string(),
            ymd: ymd.to_string(),
            entry: text.to_string(),
            mood: None,
            created_at: at,
            edited_at: at,
            iv: None,
            schema_version: ENTRY_SCHEMA_VERSION,
        }
    }

    #[tokio::test]
    async fn test_upsert_and_get_by_day() {
        let repo = create_test_repo().await;

        let mut e = entry("a", "2024-03-01", "Walked outside", 100);
        e.mood = Some("🌿".to_string());
        repo.upsert(&e).await.unwrap();

        let fetched = repo.get_by_day("2024-03-01").await.unwrap();
        assert_eq!(fetched, Some(e));
        assert_eq!(repo.get_by_day("2024-03-02").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_upsert_same_day_keeps_one_row() {
        let repo = create_test_repo().await;

        repo.upsert(&entry("a", "2024-03-01", "first", 100)).await.unwrap();
        // Different id, same day: overwrites the day's row
        repo.upsert(&entry("b", "2024-03-01", "second", 200)).await.unwrap();

        assert_eq!(repo.count().await.unwrap(), 1);
        let row = repo.get_by_day("2024-03-01").await.unwrap().unwrap();
        assert_eq!(row.id, "a");
        assert_eq!(row.entry, "second");
        assert_eq!(row.created_at, 100);
        assert_eq!(row.edited_at, 200);
    }

    #[tokio::test]
    async fn test_failed_upsert_leaves_rows_intact() {
        let repo = create_test_repo().await;

        repo.upsert(&entry("a", "2024-03-01", "one", 100)).await.unwrap();
        repo.upsert(&entry("b", "2024-03-02", "two", 100)).await.unwrap();

        // Id "a" already belongs to another day
        let result = repo.upsert(&entry("a", "2024-03-05", "clash", 200)).await;
        assert!(matches!(result, Err(AppError::Database(_))));

        assert_eq!(repo.get_by_id("a").await.unwrap().unwrap().entry, "one");
        assert_eq!(repo.get_by_id("b").await.unwrap().unwrap().entry, "two");
        assert!(repo.get_by_day("2024-03-05").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_rejects_invalid_before_store() {
        let repo = create_test_repo().await;

        let too_long = entry("a", "2024-03-01", &"x".repeat(281), 1);
        assert!(matches!(repo.upsert(&too_long).await, Err(AppError::Validation(_))));

        let bad_day = entry("a", "2024-13-01", "x", 1);
        assert!(matches!(repo.upsert(&bad_day).await, Err(AppError::Validation(_))));

        assert_eq!(repo.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_by_range_inclusive_and_ordered() {
        let repo = create_test_repo().await;

        for (id, ymd, at) in [("c", "2024-03-03", 1), ("a", "2024-03-01", 3), ("b", "2024-03-02", 2), ("d", "2024-03-04", 4)] {
            repo.upsert(&entry(id, ymd, "x", at)).await.unwrap();
        }

        let days: Vec<String> = repo
            .list_by_range("2024-03-01", "2024-03-03")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.ymd)
            .collect();
        assert_eq!(days, vec!["2024-03-01", "2024-03-02", "2024-03-03"]);

        assert!(repo.list_by_range("2024-03-05", "2024-03-01").await.unwrap().is_empty());
        assert!(repo.list_by_range("bad", "2024-03-01").await.is_err());
    }

    #[tokio::test]
    async fn test_list_all_by_created_at() {
        let repo = create_test_repo().await;

        repo.upsert(&entry("b", "2024-03-01", "x", 300)).await.unwrap();
        repo.upsert(&entry("a", "2024-03-05", "x", 100)).await.unwrap();
        repo.upsert(&entry("c", "2024-03-03", "x", 200)).await.unwrap();

        let ids: Vec<String> = repo.list_all().await.unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let repo = create_test_repo().await;

        repo.upsert(&entry("a", "2024-03-01", "x", 1)).await.unwrap();
        repo.delete("a").await.unwrap();
        repo.delete("a").await.unwrap();
        repo.delete("never-existed").await.unwrap();

        assert_eq!(repo.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_settings_defaults_created_on_first_read() {
        let repo = create_test_repo().await;

        assert_eq!(repo.get_setting(SETTINGS_KEY).await.unwrap(), None);

        let settings = repo.get_settings().await.unwrap();
        assert_eq!(settings, Settings::default());

        // Now persisted
        assert!(repo.get_setting(SETTINGS_KEY).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_settings_partial_row_fills_defaults() {
        let repo = create_test_repo().await;

        repo.set_setting(SETTINGS_KEY, &json!({ "encryption": true, "theme": "midnight" }))
            .await
            .unwrap();

        let settings = repo.get_settings().await.unwrap();
        assert!(settings.encryption);
        assert_eq!(settings.theme, Theme::Midnight);
        assert!(settings.badge_nudges);
    }

    #[tokio::test]
    async fn test_put_settings() {
        let repo = create_test_repo().await;

        let settings = Settings {
            theme: Theme::Daylight,
            reminder_hour: Some(20),
            badge_nudges: false,
            encryption: false,
            typeface: Typeface::PairB,
        };
        repo.put_settings(&settings).await.unwrap();
        assert_eq!(repo.get_settings().await.unwrap(), settings);

        let invalid = Settings {
            reminder_hour: Some(30),
            ..Settings::default()
        };
        assert!(repo.put_settings(&invalid).await.is_err());
        assert_eq!(repo.get_settings().await.unwrap(), settings);
    }

    #[tokio::test]
    async fn test_apply_batch_is_all_or_nothing() {
        let repo = create_test_repo().await;

        repo.upsert(&entry("a", "2024-03-01", "keep", 1)).await.unwrap();

        // The last row reuses id "a" on another day, after two good writes
        let batch = vec![
            entry("x", "2024-04-01", "new", 5),
            entry("y", "2024-04-02", "new", 5),
            entry("a", "2024-04-03", "clash", 5),
        ];
        let settings = vec![SettingRecord {
            key: SETTINGS_KEY.to_string(),
            value: json!({ "theme": "midnight" }),
        }];

        assert!(repo.apply_batch(&batch, &settings).await.is_err());
        assert_eq!(repo.count().await.unwrap(), 1);
        assert_eq!(repo.get_setting(SETTINGS_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_export_all() {
        let repo = create_test_repo().await;

        repo.upsert(&entry("a", "2024-03-01", "x", 1)).await.unwrap();
        repo.get_settings().await.unwrap();

        let doc = repo.export_all().await.unwrap();
        assert_eq!(doc.greats.len(), 1);
        assert_eq!(doc.settings.len(), 1);
        assert_eq!(doc.settings[0].key, SETTINGS_KEY);
        assert_eq!(doc.settings[0].value["badgeNudges"], true);
    }
}
