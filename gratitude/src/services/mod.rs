//! Services module
//!
//! Business logic services that coordinate between callers and the repository.

pub mod error_log;
pub mod journal;
pub mod reminder;
pub mod settings;
pub mod transfer;

pub use error_log::{ErrorLog, ErrorRecord};
pub use journal::{today_ymd, JournalService};
pub use reminder::daily_reminder_ics;
pub use settings::SettingsService;
pub use transfer::{ImportSummary, TransferService};
