// ⏰ Temporal helpers - export timestamps and report dates
// All export times are naive UTC wall-clock times

use anyhow::{anyhow, Result};
use chrono::{NaiveDate, NaiveDateTime, Timelike};

/// Date format used in every report column
pub const REPORT_DATE_FORMAT: &str = "%d.%m.%Y";

/// Parse an export timestamp.
///
/// Date-only formats are accepted and mean midnight.
pub fn parse_timestamp(raw: &str, format: &str) -> Result<NaiveDateTime> {
    let raw = raw.trim();
    NaiveDateTime::parse_from_str(raw, format)
        .or_else(|_| NaiveDate::parse_from_str(raw, format).map(|d| d.and_time(chrono::NaiveTime::MIN)))
        .map_err(|e| anyhow!("Unparsable timestamp `{}` (expected {}): {}", raw, format, e))
}

/// Drop seconds and sub-seconds
pub fn truncate_to_minute(timestamp: NaiveDateTime) -> NaiveDateTime {
    timestamp
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(timestamp)
}

pub fn format_report_date(timestamp: NaiveDateTime) -> String {
    timestamp.format(REPORT_DATE_FORMAT).to_string()
}
