//! Memento label and datetime formats
//!
//! Two renderings of a version instant exist on the wire:
//!
//! - **Label**: path segment under `fcr:versions`. `yyyyMMddHHmmss` in UTC.
//!   When a memento falls in the same second as the one before it, the label
//!   carries a six-digit microsecond suffix (`yyyyMMddHHmmssffffff`), so that
//!   every memento has a distinct, stable label.
//! - **RFC 1123**: `Memento-Datetime` and `Accept-Datetime` header values,
//!   e.g. `Tue, 29 Aug 2017 15:47:50 GMT`. Second granularity.

use chrono::{NaiveDateTime, TimeZone, Utc};

use crate::error::{RepositoryError, Result};
use crate::timestamp::Timestamp;

/// chrono pattern for the 14-digit label
pub const LABEL_FORMAT: &str = "%Y%m%d%H%M%S";

/// chrono pattern for RFC 1123 dates
pub const RFC_1123_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

const SHORT_LABEL_LEN: usize = 14;
const PRECISE_LABEL_LEN: usize = 20;

/// Check a memento label's shape without looking anything up
pub fn validate_label(label: &str) -> Result<()> {
    parse_label(label).map(|_| ())
}

/// Parse a label back to the instant it denotes
///
/// A 14-digit label denotes the start of its second.
pub fn parse_label(label: &str) -> Result<Timestamp> {
    let malformed = || RepositoryError::InvalidDatetime(format!("Malformed memento label: {}", label));

    if !label.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    let (secs_part, micros) = match label.len() {
        SHORT_LABEL_LEN => (label, 0u64),
        PRECISE_LABEL_LEN => {
            let micros = label[SHORT_LABEL_LEN..].parse::<u64>().map_err(|_| malformed())?;
            (&label[..SHORT_LABEL_LEN], micros)
        }
        _ => return Err(malformed()),
    };
    let naive = NaiveDateTime::parse_from_str(secs_part, LABEL_FORMAT).map_err(|_| malformed())?;
    let secs = Utc.from_utc_datetime(&naive).timestamp();
    if secs < 0 {
        return Err(malformed());
    }
    Ok(Timestamp::from_micros((secs as u64) * 1_000_000 + micros))
}

/// Render a label; `precise` appends the microsecond suffix
pub fn format_label(ts: Timestamp, precise: bool) -> String {
    let secs = ts.to_datetime().format(LABEL_FORMAT).to_string();
    if precise {
        format!("{}{:06}", secs, ts.subsec_micros())
    } else {
        secs
    }
}

/// Labels for an ascending version chain, one per entry
///
/// An entry gets a precise label only when it shares its second with the
/// entry immediately before it.
pub fn labels_for(versions: &[Timestamp]) -> Vec<String> {
    versions
        .iter()
        .enumerate()
        .map(|(i, ts)| {
            let precise = i > 0 && versions[i - 1].as_secs() == ts.as_secs();
            format_label(*ts, precise)
        })
        .collect()
}

/// Find the instant in an ascending chain that carries `label`
pub fn find_by_label(versions: &[Timestamp], label: &str) -> Option<Timestamp> {
    labels_for(versions)
        .into_iter()
        .zip(versions.iter())
        .find(|(l, _)| l == label)
        .map(|(_, ts)| *ts)
}

/// Render `Memento-Datetime`
pub fn format_rfc1123(ts: Timestamp) -> String {
    ts.to_datetime().format(RFC_1123_FORMAT).to_string()
}

/// Parse `Accept-Datetime` / `Memento-Datetime`
///
/// The weekday must agree with the date.
pub fn parse_rfc1123(value: &str) -> Result<Timestamp> {
    let naive = NaiveDateTime::parse_from_str(value.trim(), RFC_1123_FORMAT).map_err(|e| {
        RepositoryError::InvalidDatetime(format!(
            "Invalid RFC 1123 datetime '{}': {}",
            value, e
        ))
    })?;
    let dt = Utc.from_utc_datetime(&naive);
    if dt.timestamp() < 0 {
        return Err(RepositoryError::InvalidDatetime(format!(
            "Datetime before epoch: {}",
            value
        )));
    }
    Ok(Timestamp::from_datetime(dt))
}
