//! Database models
//!
//! Rust structs representing stored records.
//! All models use serde with the camelCase wire names of the export format.

use crate::config::{ENTRY_SCHEMA_VERSION, MAX_ENTRY_LENGTH, MAX_REMINDER_HOUR};
use crate::error::{AppError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One day's great thing.
///
/// When `iv` is present the row is encrypted: `entry` holds the base64
/// ciphertext of an [`EntryContent`] and `mood` is empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub id: String,
    pub ymd: String,
    pub entry: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood: Option<String>,
    pub created_at: i64,
    /// Older exports omit it; import normalizes 0 to `created_at`
    #[serde(default)]
    pub edited_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
    #[serde(rename = "v", alias = "schemaVersion", default = "default_schema_version")]
    pub schema_version: i64,
}

fn default_schema_version() -> i64 {
    ENTRY_SCHEMA_VERSION
}

impl Entry {
    pub fn is_encrypted(&self) -> bool {
        self.iv.is_some()
    }

    /// Check the row invariants before it reaches the store
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(AppError::Validation("Entry id must not be empty".to_string()));
        }
        parse_ymd(&self.ymd)?;

        // Ciphertext is longer than its plaintext; the cap applies before encryption
        if !self.is_encrypted() {
            check_entry_length(&self.entry)?;
        }

        if self.created_at > self.edited_at {
            return Err(AppError::Validation(format!(
                "Entry {} has createdAt after editedAt",
                self.ymd
            )));
        }
        Ok(())
    }
}

/// The part of an entry that is encrypted at rest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryContent {
    pub entry: String,
    #[serde(default)]
    pub mood: Option<String>,
}

/// Parse a `YYYY-MM-DD` day key into a calendar date
pub fn parse_ymd(ymd: &str) -> Result<NaiveDate> {
    let bytes = ymd.as_bytes();
    let shaped = bytes.len() == 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| i == 4 || i == 7 || b.is_ascii_digit());

    if !shaped {
        return Err(AppError::Validation(format!("Malformed day key: {:?}", ymd)));
    }

    NaiveDate::parse_from_str(ymd, "%Y-%m-%d")
        .map_err(|_| AppError::Validation(format!("Not a calendar day: {}", ymd)))
}

/// Day key for a date
pub fn ymd_from_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Entry length in UTF-16 code units
pub fn entry_length(text: &str) -> usize {
    text.encode_utf16().count()
}

fn check_entry_length(text: &str) -> Result<()> {
    let len = entry_length(text);
    if len > MAX_ENTRY_LENGTH {
        return Err(AppError::Validation(format!(
            "Entry is {} characters, the limit is {}",
            len, MAX_ENTRY_LENGTH
        )));
    }
    Ok(())
}

/// Colour theme
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    System,
    Daylight,
    Midnight,
}

/// Presentation typeface pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Typeface {
    #[default]
    #[serde(rename = "pairA")]
    PairA,
    #[serde(rename = "pairB")]
    PairB,
}

/// Application settings (singleton row)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub theme: Theme,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reminder_hour: Option<u8>,
    #[serde(default = "default_true")]
    pub badge_nudges: bool,
    #[serde(default)]
    pub encryption: bool,
    #[serde(default)]
    pub typeface: Typeface,
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            theme: Theme::System,
            reminder_hour: None,
            badge_nudges: true,
            encryption: false,
            typeface: Typeface::PairA,
        }
    }
}

impl Settings {
    /// Build settings from a stored JSON value.
    ///
    /// Each field that is missing or unreadable falls back to its default,
    /// so one bad field never discards the rest (notably `encryption`).
    pub fn from_stored(value: &serde_json::Value) -> Self {
        let mut settings = Settings::default();
        let Some(map) = value.as_object() else {
            tracing::warn!("Stored settings are not an object, using defaults");
            return settings;
        };

        fn field<T: serde::de::DeserializeOwned>(
            map: &serde_json::Map<String, serde_json::Value>,
            name: &str,
        ) -> Option<T> {
            let raw = map.get(name)?;
            match serde_json::from_value(raw.clone()) {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!("Ignoring unreadable setting {}: {}", name, e);
                    None
                }
            }
        }

        if let Some(theme) = field(map, "theme") {
            settings.theme = theme;
        }
        if let Some(hour) = field::<u8>(map, "reminderHour") {
            if hour <= MAX_REMINDER_HOUR {
                settings.reminder_hour = Some(hour);
            }
        }
        if let Some(nudges) = field(map, "badgeNudges") {
            settings.badge_nudges = nudges;
        }
        if let Some(encryption) = field(map, "encryption") {
            settings.encryption = encryption;
        }
        if let Some(typeface) = field(map, "typeface") {
            settings.typeface = typeface;
        }
        settings
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(hour) = self.reminder_hour {
            if hour > MAX_REMINDER_HOUR {
                return Err(AppError::Validation(format!(
                    "Reminder hour must be 0-{}, got {}",
                    MAX_REMINDER_HOUR, hour
                )));
            }
        }
        Ok(())
    }
}

/// Partial settings update merged onto the last known value.
///
/// `encryption` is absent on purpose: it only changes through the
/// journal's encryption passes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(default)]
    pub theme: Option<Theme>,
    /// `Some(None)` clears the reminder; JSON `null` maps to it
    #[serde(default, deserialize_with = "present_or_null")]
    pub reminder_hour: Option<Option<u8>>,
    #[serde(default)]
    pub badge_nudges: Option<bool>,
    #[serde(default)]
    pub typeface: Option<Typeface>,
}

/// Distinguish a present `null` from an absent field
fn present_or_null<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl SettingsPatch {
    pub fn apply(&self, base: &Settings) -> Settings {
        let mut next = base.clone();
        if let Some(theme) = self.theme {
            next.theme = theme;
        }
        if let Some(hour) = self.reminder_hour {
            next.reminder_hour = hour;
        }
        if let Some(nudges) = self.badge_nudges {
            next.badge_nudges = nudges;
        }
        if let Some(typeface) = self.typeface {
            next.typeface = typeface;
        }
        next
    }
}

/// Raw settings-table row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingRecord {
    pub key: String,
    pub value: serde_json::Value,
}

/// Full export of both tables
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExportDocument {
    #[serde(default)]
    pub greats: Vec<Entry>,
    #[serde(default)]
    pub settings: Vec<SettingRecord>,
}
