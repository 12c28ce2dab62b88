//! Calendar reminder
//!
//! Builds a daily-repeating iCalendar event that a calendar client can
//! import, so reminders work without the app running or any network.

use crate::config::MAX_REMINDER_HOUR;
use crate::error::{AppError, Result};
use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

/// Daily VEVENT starting at `hour_utc:00` of `now`'s UTC day
pub fn daily_reminder_ics(
    title: &str,
    description: &str,
    hour_utc: u8,
    now: DateTime<Utc>,
) -> Result<String> {
    if hour_utc > MAX_REMINDER_HOUR {
        return Err(AppError::Validation(format!(
            "Reminder hour must be 0-{}, got {}",
            MAX_REMINDER_HOUR, hour_utc
        )));
    }

    let start = Utc
        .from_utc_datetime(&now.date_naive().and_hms_opt(hour_utc as u32, 0, 0).ok_or_else(|| {
            AppError::Generic(format!("Invalid reminder hour {}", hour_utc))
        })?);

    let lines = [
        "BEGIN:VCALENDAR".to_string(),
        "VERSION:2.0".to_string(),
        "PRODID:-//Tiny Gratitude//EN".to_string(),
        "CALSCALE:GREGORIAN".to_string(),
        "BEGIN:VEVENT".to_string(),
        format!("UID:{}", Uuid::new_v4()),
        format!("DTSTAMP:{}", format_ics_date(now)),
        format!("DTSTART:{}", format_ics_date(start)),
        "RRULE:FREQ=DAILY".to_string(),
        format!("SUMMARY:{}", escape_ics(title)),
        format!("DESCRIPTION:{}", escape_ics(description)),
        "END:VEVENT".to_string(),
        "END:VCALENDAR".to_string(),
    ];

    Ok(lines.join("\r\n"))
}

fn format_ics_date(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%SZ").to_string()
}

fn escape_ics(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('\n', "\\n")
        .replace(',', "\\,")
        .replace(';', "\\;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 15).unwrap()
    }

    #[test]
    fn test_daily_event() {
        let ics = daily_reminder_ics("Tiny Gratitude", "Add one great thing", 17, fixed_now()).unwrap();

        let lines: Vec<&str> = ics.split("\r\n").collect();
        assert_eq!(lines.first(), Some(&"BEGIN:VCALENDAR"));
        assert_eq!(lines.last(), Some(&"END:VCALENDAR"));
        assert!(lines.contains(&"DTSTAMP:20240301T093015Z"));
        assert!(lines.contains(&"DTSTART:20240301T170000Z"));
        assert!(lines.contains(&"RRULE:FREQ=DAILY"));
        assert!(lines.iter().any(|l| l.starts_with("UID:")));
    }

    #[test]
    fn test_text_is_escaped() {
        let ics = daily_reminder_ics("a,b;c", "line\\one\nline two", 0, fixed_now()).unwrap();
        assert!(ics.contains("SUMMARY:a\\,b\\;c"));
        assert!(ics.contains("DESCRIPTION:line\\\\one\\nline two"));
    }

    #[test]
    fn test_hour_out_of_range() {
        assert!(daily_reminder_ics("t", "d", 24, fixed_now()).is_err());
    }
}
