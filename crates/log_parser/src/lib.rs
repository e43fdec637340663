// Rust guideline compliant 2026-02-16

//! Log record parser (C1).
//!
//! Splits one trimmed Nginx access-log line on the literal two-character
//! delimiter `||` into the ten fields of the `sentinel` log_format (§6.1) and
//! derives the record's 5-minute `batch_id`. Pure and synchronous: no ports,
//! no config, no adapters. Failures are per-line (§7 `ParseError`) — the
//! collector logs and skips, never aborting the batch.

use std::net::IpAddr;
use std::str::FromStr as _;

use chrono::{DateTime, FixedOffset};
use domain::{BatchId, LogRecord};

const DELIMITER: &str = "||";
const FIELD_COUNT: usize = 10;
const TIME_FORMAT: &str = "%d/%b/%Y:%H:%M:%S %z";

#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    #[error("expected {FIELD_COUNT} fields separated by '||', found {found}")]
    WrongFieldCount { found: usize },
    #[error("invalid remote_addr {0:?}")]
    InvalidRemoteAddr(String),
    #[error("invalid time_local {0:?}: expected format '{TIME_FORMAT}'")]
    InvalidTimeLocal(String),
    #[error("invalid status {0:?}")]
    InvalidStatus(String),
    #[error("invalid request_length {0:?}")]
    InvalidRequestLength(String),
    #[error("invalid body_bytes_sent {0:?}")]
    InvalidBodyBytesSent(String),
    #[error("invalid request_time {0:?}")]
    InvalidRequestTime(String),
}

/// Only `""` denotes an absent field (§3). A literal `-` is kept as-is: it
/// is Nginx's own placeholder for "no referer", not a parser-level absence
/// marker, and downstream stages (§6.1, the aggregator's empty-referer
/// count) distinguish it from a genuinely empty string.
fn empty_to_none(field: &str) -> Option<String> {
    if field.is_empty() { None } else { Some(field.to_owned()) }
}

/// Parse one trimmed log line into a [`LogRecord`].
///
/// # Errors
///
/// Returns [`ParseError`] if the line does not split into exactly
/// [`FIELD_COUNT`] parts, or if any required field fails to parse.
pub fn parse_line(line: &str) -> Result<LogRecord, ParseError> {
    let fields: Vec<&str> = line.split(DELIMITER).collect();
    if fields.len() != FIELD_COUNT {
        return Err(ParseError::WrongFieldCount { found: fields.len() });
    }
    let [remote_addr, remote_user, time_local, request, status, request_length, body_bytes_sent, http_referer, http_user_agent, request_time] =
        fields[..] else {
            return Err(ParseError::WrongFieldCount { found: fields.len() });
        };

    let remote_addr = IpAddr::from_str(remote_addr)
        .map_err(|_err| ParseError::InvalidRemoteAddr(remote_addr.to_owned()))?;

    let time_local: DateTime<FixedOffset> = DateTime::parse_from_str(time_local, TIME_FORMAT)
        .map_err(|_err| ParseError::InvalidTimeLocal(time_local.to_owned()))?;

    let status: u16 = status
        .parse()
        .map_err(|_err| ParseError::InvalidStatus(status.to_owned()))?;

    let request_length: i64 = request_length
        .parse()
        .map_err(|_err| ParseError::InvalidRequestLength(request_length.to_owned()))?;

    let body_bytes_sent: i64 = body_bytes_sent
        .parse()
        .map_err(|_err| ParseError::InvalidBodyBytesSent(body_bytes_sent.to_owned()))?;

    let request_time_seconds: f64 = request_time
        .parse()
        .map_err(|_err| ParseError::InvalidRequestTime(request_time.to_owned()))?;
    // Truncated, not rounded: the source takes `int(float * 1000)` (§4.1).
    let request_time_ms = (request_time_seconds * 1000.0).trunc() as i64;

    let batch_id = BatchId::from_time(time_local);
    let date = time_local.date_naive();

    Ok(LogRecord {
        remote_addr,
        remote_user: empty_to_none(remote_user),
        time_local,
        request: empty_to_none(request),
        status,
        request_length,
        body_bytes_sent,
        http_referer: empty_to_none(http_referer),
        http_user_agent: empty_to_none(http_user_agent),
        request_time_ms,
        batch_id,
        date,
    })
}
