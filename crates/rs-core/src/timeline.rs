//! Day-granular timeline primitives.
//!
//! Everything here works in UTC. A "day" is the instant at midnight UTC; a
//! [`DayKey`] is the calendar date that instant falls on, rendered with
//! [`DAY_KEY_FORMAT`] when it leaves the process.

use std::collections::BTreeMap;
use std::collections::btree_map;
use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// Layout of time series keys on the wire (`2020-05-19 00:00:00`).
pub const DAY_KEY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Layout accepted for timestamps that are not RFC 3339. Interpreted as UTC.
pub const LEGACY_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Calendar date of the "unset" marker older records use in place of NULL.
pub const UNSET_SENTINEL_DATE: NaiveDate = match NaiveDate::from_ymd_opt(1, 1, 1) {
    Some(date) => date,
    None => panic!("0001-01-01 is a valid date"),
};

/// The "unset" marker instant: `0001-01-01T00:00:00Z`.
pub fn unset_sentinel() -> DateTime<Utc> {
    Utc.from_utc_datetime(&UNSET_SENTINEL_DATE.and_time(NaiveTime::MIN))
}

/// Returns true only for the exact unset marker instant.
///
/// Other instants on the sentinel's calendar day are ordinary timestamps.
pub fn is_unset_sentinel(timestamp: DateTime<Utc>) -> bool {
    timestamp == unset_sentinel()
}

/// Parses a stored or user-supplied timestamp.
///
/// Accepts RFC 3339 (any offset, normalized to UTC) or [`LEGACY_TIMESTAMP_FORMAT`].
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    let value = value.trim();
    match DateTime::parse_from_rfc3339(value) {
        Ok(parsed) => Ok(parsed.with_timezone(&Utc)),
        Err(rfc_err) => NaiveDateTime::parse_from_str(value, LEGACY_TIMESTAMP_FORMAT)
            .map(|naive| Utc.from_utc_datetime(&naive))
            .map_err(|_| rfc_err),
    }
}

/// Zeroes the time of day, keeping the UTC calendar date.
pub fn truncate_to_day(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&timestamp.date_naive().and_time(NaiveTime::MIN))
}

/// Expands `[start, finish]` into the midnight instants of every day it touches.
///
/// Both ends are truncated to midnight UTC first and both boundary days are
/// included, so `expand_days(d, d)` yields exactly `[d]`. When `finish` falls on
/// an earlier day than `start` the result is empty.
pub fn expand_days(start: DateTime<Utc>, finish: DateTime<Utc>) -> Vec<DateTime<Utc>> {
    let start = truncate_to_day(start);
    let finish = truncate_to_day(finish);
    // Both ends sit on midnight UTC, so the difference is a whole number of days.
    let days = (finish - start).num_days();
    (0..=days).map(|offset| start + Duration::days(offset)).collect()
}

/// Index of one bucket in a [`TimeSeries`]: a UTC calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DayKey(NaiveDate);

impl DayKey {
    /// Key for the UTC day containing `timestamp`.
    pub fn from_timestamp(timestamp: DateTime<Utc>) -> Self {
        Self(timestamp.date_naive())
    }

    /// Key for a calendar date.
    pub const fn from_date(date: NaiveDate) -> Self {
        Self(date)
    }

    /// The key the unset marker truncates to.
    pub const fn sentinel() -> Self {
        Self(UNSET_SENTINEL_DATE)
    }

    pub const fn date(self) -> NaiveDate {
        self.0
    }

    /// Midnight UTC at the start of this day.
    pub fn start(self) -> DateTime<Utc> {
        Utc.from_utc_datetime(&self.0.and_time(NaiveTime::MIN))
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.start().format(DAY_KEY_FORMAT))
    }
}

impl Serialize for DayKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

/// Total allocated resources per day.
///
/// Keys are ordered chronologically. Serializes as a JSON object keyed by the
/// formatted day key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeSeries {
    buckets: BTreeMap<DayKey, u32>,
}

impl TimeSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn get(&self, day: DayKey) -> Option<u32> {
        self.buckets.get(&day).copied()
    }

    pub fn contains(&self, day: DayKey) -> bool {
        self.buckets.contains_key(&day)
    }

    /// Iterates buckets in chronological order.
    pub fn iter(&self) -> impl Iterator<Item = (DayKey, u32)> + '_ {
        self.buckets.iter().map(|(day, count)| (*day, *count))
    }

    /// Converts to the wire mapping of formatted day key to count.
    pub fn to_wire(&self) -> BTreeMap<String, u32> {
        self.iter()
            .map(|(day, count)| (day.to_string(), count))
            .collect()
    }

    pub(crate) fn entry(&mut self, day: DayKey) -> btree_map::Entry<'_, DayKey, u32> {
        self.buckets.entry(day)
    }

    pub(crate) fn remove(&mut self, day: DayKey) -> Option<u32> {
        self.buckets.remove(&day)
    }
}

impl Serialize for TimeSeries {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.buckets.len()))?;
        for (day, count) in &self.buckets {
            map.serialize_entry(day, count)?;
        }
        map.end()
    }
}
