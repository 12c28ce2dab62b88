//! Application configuration constants
//!
//! Central location for all configuration constants, resource limits,
//! and validation boundaries used throughout the application.

// ===== Entry Limits =====

/// Maximum entry length, counted in UTF-16 code units after trimming
pub const MAX_ENTRY_LENGTH: usize = 280;

/// Current stored-row schema tag
pub const ENTRY_SCHEMA_VERSION: i64 = 1;

// ===== Settings Storage =====

/// Key of the singleton settings row
pub const SETTINGS_KEY: &str = "settings";

/// Key of the row holding the base64 key-derivation salt
pub const CRYPTO_SALT_KEY: &str = "crypto_salt";

/// Setting keys accepted by import
pub const KNOWN_SETTING_KEYS: &[&str] = &[SETTINGS_KEY, CRYPTO_SALT_KEY];

/// Latest hour accepted for `reminderHour`
pub const MAX_REMINDER_HOUR: u8 = 23;

/// Hour (UTC) used for the calendar reminder when settings carry none
pub const DEFAULT_REMINDER_HOUR_UTC: u8 = 17;

/// Upper bound on listeners attached to one observable value.
/// Leaked subscriptions surface as an error instead of unbounded growth.
pub const MAX_LISTENERS: usize = 64;

// ===== Cryptography =====

/// PBKDF2-HMAC-SHA256 rounds used to stretch the passcode
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Salt size in bytes (128 bits)
pub const SALT_SIZE: usize = 16;

/// AES-GCM nonce size in bytes (96 bits)
pub const NONCE_SIZE: usize = 12;

// ===== Error Log =====

/// Retained error records; the oldest are evicted first
pub const ERROR_LOG_CAPACITY: usize = 200;

/// File name of the persisted error log inside the data directory
pub const ERROR_LOG_FILE: &str = "errors.json";

// ===== Offline Agent =====

/// Prefix shared by every cache namespace this agent owns
pub const CACHE_PREFIX: &str = "tg-cache-";

/// Shell documents tried, in order, for offline navigations
pub const DEFAULT_SHELL_PATHS: &[&str] = &["/", "/index.html"];

// ===== Files =====

/// Database file name inside the data directory
pub const DATABASE_FILE: &str = "db.sqlite";

/// Directory name (under the platform data dir) used by the CLI
pub const APP_DIR_NAME: &str = "tiny-gratitude";
