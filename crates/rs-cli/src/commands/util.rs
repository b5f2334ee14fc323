//! Shared utilities for CLI commands.

use std::sync::LazyLock;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use rs_core::parse_timestamp;
use rs_core::timeline::LEGACY_TIMESTAMP_FORMAT;

/// Pre-compiled regex for relative time parsing.
static RELATIVE_TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)\s+(minute|hour|day|week)s?\s+(ago|from now)$")
        .expect("relative time pattern is valid")
});

/// Conservative bounds for relative time parsing (~1000 years in minutes).
const MAX_RELATIVE_MINUTES: i64 = 1000 * 365 * 24 * 60;

/// Parse a datetime string as an absolute or relative time.
///
/// Supports:
/// - RFC 3339: "2020-05-20T14:35:01Z"
/// - Stored layout: "2020-05-20 14:35:01" (UTC)
/// - Relative: "2 hours ago", "3 days from now"
pub fn parse_datetime(s: &str) -> anyhow::Result<DateTime<Utc>> {
    parse_datetime_at(s, Utc::now())
}

/// Parses an optional `--at` style argument, defaulting to now.
pub fn datetime_or_now(s: Option<&str>) -> anyhow::Result<DateTime<Utc>> {
    s.map_or_else(|| Ok(Utc::now()), parse_datetime)
}

/// Formats a timestamp the way the store prints them.
pub fn format_time(timestamp: DateTime<Utc>) -> String {
    timestamp.format(LEGACY_TIMESTAMP_FORMAT).to_string()
}

fn parse_datetime_at(s: &str, now: DateTime<Utc>) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(dt) = parse_timestamp(s) {
        return Ok(dt);
    }

    let Some(caps) = RELATIVE_TIME_RE.captures(s.trim()) else {
        anyhow::bail!(
            "Invalid datetime: {s}. Use RFC 3339 (e.g., 2020-05-20T14:35:01Z), \
             'YYYY-MM-DD HH:MM:SS' or relative (e.g., '2 hours ago')"
        );
    };

    let n: i64 = caps[1]
        .parse()
        .context("failed to parse number in relative time")?;

    let (max_for_unit, minutes_per_unit) = match &caps[2] {
        "minute" => (MAX_RELATIVE_MINUTES, 1),
        "hour" => (MAX_RELATIVE_MINUTES / 60, 60),
        "day" => (MAX_RELATIVE_MINUTES / (60 * 24), 60 * 24),
        "week" => (MAX_RELATIVE_MINUTES / (60 * 24 * 7), 60 * 24 * 7),
        unit => anyhow::bail!("Unknown time unit: {unit}"),
    };

    if n > max_for_unit {
        anyhow::bail!("Relative time value too large: {n} {}", &caps[2]);
    }

    let duration = Duration::minutes(n * minutes_per_unit);
    if &caps[3] == "ago" {
        Ok(now - duration)
    } else {
        Ok(now + duration)
    }
}
