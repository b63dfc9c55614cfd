//! # Feature: Time Parser
//!
//! Turns a two-token expression like `10 min` or `2 hours` into an absolute
//! unix timestamp (seconds).
//!
//! - **Version**: 1.0.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false

use chrono::Utc;

const MINUTE: i64 = 60;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;

/// Units understood by the parser. Months and years are fixed-length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Year,
    Month,
    Hour,
    Minute,
    Second,
}

impl TimeUnit {
    /// Match a unit keyword, ignoring case
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword.to_lowercase().as_str() {
            "y" | "year" | "years" | "yr" => Some(TimeUnit::Year),
            "mon" | "month" | "months" => Some(TimeUnit::Month),
            "h" | "hr" | "hour" | "hours" => Some(TimeUnit::Hour),
            "m" | "min" | "mins" | "minute" | "minutes" => Some(TimeUnit::Minute),
            "s" | "sec" | "secs" | "second" | "seconds" => Some(TimeUnit::Second),
            _ => None,
        }
    }

    pub fn seconds(self) -> i64 {
        match self {
            TimeUnit::Year => 365 * DAY,
            TimeUnit::Month => 30 * DAY,
            TimeUnit::Hour => HOUR,
            TimeUnit::Minute => MINUTE,
            TimeUnit::Second => 1,
        }
    }
}

/// Parse `text` relative to the current wall clock
pub fn parse_time(text: &str) -> Option<i64> {
    parse_time_from(text, Utc::now().timestamp())
}

/// Parse `text` relative to `now` (unix seconds).
///
/// Returns `None` unless the input is exactly `<integer> <unit>`. Negative
/// counts are accepted and yield an instant in the past.
pub fn parse_time_from(text: &str, now: i64) -> Option<i64> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.len() != 2 {
        return None;
    }

    let count: i64 = tokens[0].parse().ok()?;
    let unit = TimeUnit::from_keyword(tokens[1])?;

    count
        .checked_mul(unit.seconds())
        .and_then(|offset| now.checked_add(offset))
}
