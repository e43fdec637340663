//! Parsed log record and its derived batch identifier.

use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Datelike as _, FixedOffset, NaiveDate, Timelike as _};

/// Identifier of a 5-minute batch window, formatted `%Y_%m_%d%H%M` with no
/// separator between the day and the hour (see design note in `SPEC_FULL.md`
/// §9 — the source format string has no such separator even though a
/// rendering artifact in one worked example suggests otherwise).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct BatchId(String);

impl BatchId {
    /// Build a `BatchId` from `time_local` floored to the nearest 5 minutes.
    #[must_use]
    pub fn from_time(time_local: DateTime<FixedOffset>) -> Self {
        let floored_minute = (time_local.minute() / 5) * 5;
        let floored = time_local
            .with_minute(floored_minute)
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(time_local);
        Self(format!(
            "{:04}_{:02}_{:02}{:02}{:02}",
            floored.year(),
            floored.month(),
            floored.day(),
            floored.hour(),
            floored.minute()
        ))
    }

    /// Wrap an already-formatted id, e.g. when reading one back from a store.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 10 characters: the `YYYY_MM_DD` date key, used as the suffix of
    /// the daily indices (`log_metadata_<date_key>`, …).
    #[must_use]
    pub fn date_key(&self) -> &str {
        &self.0[..10.min(self.0.len())]
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One parsed Nginx access-log line (`sentinel` log_format, §6.1).
///
/// `None` in an optional field means the field was empty (`""`) or the `-`
/// sentinel (used for `http_referer`) in the source line.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub remote_addr: IpAddr,
    pub remote_user: Option<String>,
    pub time_local: DateTime<FixedOffset>,
    pub request: Option<String>,
    pub status: u16,
    pub request_length: i64,
    pub body_bytes_sent: i64,
    pub http_referer: Option<String>,
    pub http_user_agent: Option<String>,
    /// `round(float_seconds * 1000)` truncated towards zero, per §4.1.
    pub request_time_ms: i64,
    pub batch_id: BatchId,
    pub date: NaiveDate,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone as _;

    fn dt(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(y, mo, d, h, mi, s)
            .unwrap()
    }

    #[test]
    fn batch_id_floors_to_five_minutes() {
        let t = dt(2024, 6, 1, 12, 37, 54);
        assert_eq!(BatchId::from_time(t).as_str(), "2024_06_011235");
    }

    #[test]
    fn batch_id_on_exact_boundary_is_unchanged() {
        let t = dt(2024, 6, 1, 12, 40, 0);
        assert_eq!(BatchId::from_time(t).as_str(), "2024_06_011240");
    }

    #[test]
    fn date_key_is_first_ten_chars() {
        let id = BatchId::from_time(dt(2024, 6, 1, 12, 37, 54));
        assert_eq!(id.date_key(), "2024_06_01");
    }
}
