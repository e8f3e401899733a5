//! Schedule-string parsing
//!
//! Callers hand `publish` a Unix timestamp; this module turns the strings
//! humans actually type into one. Supports relative durations ("30m", "2h",
//! "1 day") via humantime and natural language ("tomorrow", "next friday
//! 10am") via chrono-english.

use chrono::{DateTime, Duration, Utc};

use crate::error::{EngineError, Result};

/// Parse a schedule string into a UTC time.
///
/// # Errors
///
/// Returns `EngineError::InvalidInput` when the string is empty or matches
/// no supported format.
pub fn parse_schedule(input: &str) -> Result<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return Err(EngineError::InvalidInput(
            "Schedule string cannot be empty".to_string(),
        ));
    }

    if let Ok(duration) = parse_duration(input) {
        return Ok(Utc::now() + duration);
    }

    if let Ok(dt) = parse_natural_language(input) {
        return Ok(dt);
    }

    Err(EngineError::InvalidInput(format!(
        "Could not parse schedule string: {}",
        input
    )))
}

/// Convenience: parse straight to a Unix timestamp for `publish`.
pub fn parse_schedule_timestamp(input: &str) -> Result<i64> {
    parse_schedule(input).map(|dt| dt.timestamp())
}

fn parse_duration(input: &str) -> Result<Duration> {
    let std_duration = humantime::parse_duration(input)
        .map_err(|_| EngineError::InvalidInput(format!("Could not parse duration: {}", input)))?;

    Duration::try_seconds(std_duration.as_secs() as i64)
        .ok_or_else(|| EngineError::InvalidInput("Duration out of range".to_string()))
}

fn parse_natural_language(input: &str) -> Result<DateTime<Utc>> {
    chrono_english::parse_date_string(input, Utc::now(), chrono_english::Dialect::Us)
        .map_err(|e| EngineError::InvalidInput(format!("Could not parse time: {}", e)))
}
