//! Duration - Human-readable durations for configs and flags
//!
//! Accepts `250ms`, `30s`, `5m`, `1h` and compounds such as `1m30s`.
//! `us` and `ns` cover sub-millisecond parts. A bare integer is read as seconds.

use std::time::Duration;

use thiserror::Error;

/// Error returned when a duration string cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationParseError {
    #[error("empty duration")]
    Empty,

    #[error("expected a number at position {position} in {input:?}")]
    MissingNumber { input: String, position: usize },

    #[error("unknown unit {unit:?} in {input:?} (expected ns, us, ms, s, m or h)")]
    UnknownUnit { input: String, unit: String },

    #[error("duration {0:?} is too large")]
    Overflow(String),
}

/// Parse a duration such as `30s`, `1m30s` or `250ms`
pub fn parse_duration(input: &str) -> Result<Duration, DurationParseError> {
    let text = input.trim();
    if text.is_empty() {
        return Err(DurationParseError::Empty);
    }

    if text.bytes().all(|b| b.is_ascii_digit()) {
        let secs: u64 = text
            .parse()
            .map_err(|_| DurationParseError::Overflow(input.to_string()))?;
        return Ok(Duration::from_secs(secs));
    }

    let bytes = text.as_bytes();
    let mut total = Duration::ZERO;
    let mut pos = 0;

    while pos < bytes.len() {
        let number_start = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
        if pos == number_start {
            return Err(DurationParseError::MissingNumber {
                input: input.to_string(),
                position: number_start,
            });
        }
        let amount: u64 = text[number_start..pos]
            .parse()
            .map_err(|_| DurationParseError::Overflow(input.to_string()))?;

        let unit_start = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_alphabetic() {
            pos += 1;
        }
        let unit = &text[unit_start..pos];
        let part = match unit {
            "ns" => Some(Duration::from_nanos(amount)),
            "us" => Some(Duration::from_micros(amount)),
            "ms" => Some(Duration::from_millis(amount)),
            "s" => Some(Duration::from_secs(amount)),
            "m" => amount.checked_mul(60).map(Duration::from_secs),
            "h" => amount.checked_mul(3600).map(Duration::from_secs),
            _ => {
                return Err(DurationParseError::UnknownUnit {
                    input: input.to_string(),
                    unit: unit.to_string(),
                });
            }
        };

        total = part
            .and_then(|p| total.checked_add(p))
            .ok_or_else(|| DurationParseError::Overflow(input.to_string()))?;
    }

    Ok(total)
}

/// Format a duration in the same notation `parse_duration` accepts
pub fn format_duration(duration: Duration) -> String {
    if duration.is_zero() {
        return "0s".to_string();
    }

    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let secs = total_secs % 60;
    let nanos = duration.subsec_nanos();
    let millis = nanos / 1_000_000;
    let micros = (nanos / 1_000) % 1_000;
    let nanos = nanos % 1_000;

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{}h", hours));
    }
    if minutes > 0 {
        out.push_str(&format!("{}m", minutes));
    }
    if secs > 0 {
        out.push_str(&format!("{}s", secs));
    }
    if millis > 0 {
        out.push_str(&format!("{}ms", millis));
    }
    if micros > 0 {
        out.push_str(&format!("{}us", micros));
    }
    if nanos > 0 {
        out.push_str(&format!("{}ns", nanos));
    }
    out
}

/// Serde adapter for `Duration` fields written as human-readable strings
pub mod serde_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    use super::{format_duration, parse_duration};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Secs(u64),
    }

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
            Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
        }
    }
}
