//! Serde adapter for human-readable durations (`"30s"`, `"15m"`, `"4h"`, `"250ms"`).
//!
//! Bare integers are read as seconds.

use std::time::Duration;

use serde::{self, Deserialize, Deserializer, Serializer};

use crate::duration::format_duration;

/// Serialize a `Duration` as a compact human-readable string (e.g. `"1h30m"`).
///
/// # Errors
///
/// Returns a serialization error if the serializer fails.
pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format_duration(*duration))
}

/// Deserialize a human-readable duration string.
///
/// # Errors
///
/// Returns a deserialization error if the string cannot be parsed as a duration.
pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(s) => parse_duration(&s).map_err(serde::de::Error::custom),
    }
}

/// Parse a duration such as `"90s"`, `"15m"`, `"1h30m"` or `"250ms"`.
///
/// # Errors
///
/// Returns a description of the problem when the input is not a duration.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut digits = String::new();
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let value: u64 = digits
            .parse()
            .map_err(|_| format!("invalid duration: {input}"))?;
        digits.clear();

        let unit = match c {
            'h' => Duration::from_secs(value * 3600),
            'm' if chars.peek() == Some(&'s') => {
                chars.next();
                Duration::from_millis(value)
            }
            'm' => Duration::from_secs(value * 60),
            's' => Duration::from_secs(value),
            other => return Err(format!("invalid duration unit '{other}' in {input}")),
        };
        total += unit;
    }

    if !digits.is_empty() {
        return Err(format!("missing unit in duration: {input}"));
    }
    Ok(total)
}
