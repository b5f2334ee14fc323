//! Usage time series: resources allocated per day across all events.
//!
//! # Algorithm Summary
//!
//! 1. Ask the repository for the span of currently open events (earliest start,
//!    latest expected finish) and seed a zero bucket for every day in it
//! 2. For every stored event, open or closed, add `available + team count` to
//!    each day of its inclusive `[start, expected finish]` window
//! 3. Drop the bucket of the unset marker's day if one leaked in
//!
//! The bucket map is local to one call. Any error discards it, so callers see
//! either the complete series or nothing.

use std::collections::btree_map::Entry;
use std::error::Error as StdError;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::timeline::{DayKey, TimeSeries, expand_days, is_unset_sentinel, parse_timestamp};

/// Errors from building a time series.
#[derive(Debug, Error)]
pub enum TimelineError {
    /// A stored boundary date does not match any accepted layout.
    #[error("invalid {field} for event {event_id}: {value:?}")]
    DateParse {
        event_id: i64,
        field: &'static str,
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    /// No open event exists to anchor the series.
    #[error("no open event to anchor the time series span")]
    EmptySpan,
    /// Both boundaries of an event hold the unset marker.
    #[error("event {event_id} has no start or expected finish")]
    InvalidSentinel { event_id: i64 },
    /// A daily total no longer fits in 32 bits.
    #[error("resource count overflow on {day}")]
    CountOverflow { day: DayKey },
    /// The event repository or team counter failed.
    #[error("repository error: {0}")]
    Repository(#[source] Box<dyn StdError + Send + Sync>),
}

impl TimelineError {
    fn repository<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Repository(Box::new(err))
    }
}

/// What to return when no open event exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptySpanPolicy {
    /// Return an empty series.
    #[default]
    Empty,
    /// Fail with [`TimelineError::EmptySpan`].
    Reject,
}

/// How to treat event days outside the open-event span.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClosedTailPolicy {
    /// Create buckets for those days on first write.
    #[default]
    Include,
    /// Drop contributions that fall outside the span.
    Clip,
}

/// Configuration for time series aggregation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    pub empty_span: EmptySpanPolicy,
    pub closed_tails: ClosedTailPolicy,
}

/// An event as the aggregator sees it.
///
/// Boundary dates stay in their stored text form; the aggregator parses them so
/// that a malformed row is reported against its event.
pub trait UsageEvent {
    fn event_id(&self) -> i64;

    /// Lab slots kept warm for the event, independent of teams.
    fn available(&self) -> u32;

    fn started_at(&self) -> &str;

    fn expected_finish(&self) -> &str;
}

/// Source of events and of the open-event span.
pub trait EventRepository {
    type Event: UsageEvent;
    type Error: StdError + Send + Sync + 'static;

    /// All stored events, in no particular order.
    fn list_all_events(&self) -> Result<Vec<Self::Event>, Self::Error>;

    /// Earliest start among open events, `None` when there are none.
    fn earliest_open_event_start(&self) -> Result<Option<DateTime<Utc>>, Self::Error>;

    /// Latest expected finish among open events, `None` when there are none.
    fn latest_open_event_expected_finish(&self) -> Result<Option<DateTime<Utc>>, Self::Error>;
}

/// Number of teams registered per event.
pub trait TeamCounter {
    type Error: StdError + Send + Sync + 'static;

    fn count_teams(&self, event_id: i64) -> Result<u32, Self::Error>;
}

/// Builds the per-day resource series for every stored event.
pub fn build_time_series<R, T>(
    repository: &R,
    teams: &T,
    config: &AggregationConfig,
) -> Result<TimeSeries, TimelineError>
where
    R: EventRepository,
    T: TeamCounter,
{
    let span = open_span(repository)?;
    let events = repository
        .list_all_events()
        .map_err(TimelineError::repository)?;

    let Some((span_start, span_finish)) = span else {
        // Malformed rows fail the call even when nothing would be counted.
        for event in &events {
            event_window(event)?;
        }
        return match config.empty_span {
            EmptySpanPolicy::Empty => {
                tracing::debug!("no open events, returning empty time series");
                Ok(TimeSeries::new())
            }
            EmptySpanPolicy::Reject => Err(TimelineError::EmptySpan),
        };
    };

    let mut series = TimeSeries::new();
    for day in expand_days(span_start, span_finish) {
        series.entry(DayKey::from_timestamp(day)).or_insert(0);
    }
    let span = DayKey::from_timestamp(span_start)..=DayKey::from_timestamp(span_finish);

    for event in &events {
        let Some((start, finish)) = event_window(event)? else {
            continue;
        };

        let team_count = teams
            .count_teams(event.event_id())
            .map_err(TimelineError::repository)?;

        let days = expand_days(start, finish);
        if days.is_empty() {
            tracing::debug!(
                event_id = event.event_id(),
                "expected finish precedes start, event contributes nothing"
            );
            continue;
        }

        for day in days {
            let key = DayKey::from_timestamp(day);
            if config.closed_tails == ClosedTailPolicy::Clip && !span.contains(&key) {
                continue;
            }
            add_to_bucket(&mut series, key, event.available(), team_count)?;
        }
    }

    series.remove(DayKey::sentinel());

    tracing::info!(
        events = events.len(),
        buckets = series.len(),
        "built usage time series"
    );
    Ok(series)
}

/// Span of open events, with the unset marker never counting as an anchor.
fn open_span<R: EventRepository>(
    repository: &R,
) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>, TimelineError> {
    let start = repository
        .earliest_open_event_start()
        .map_err(TimelineError::repository)?
        .filter(|start| !is_unset_sentinel(*start));
    let finish = repository
        .latest_open_event_expected_finish()
        .map_err(TimelineError::repository)?
        .filter(|finish| !is_unset_sentinel(*finish));

    Ok(start.zip(finish))
}

/// Parses an event's window. `Ok(None)` means the event has no usable window.
fn event_window<E: UsageEvent>(
    event: &E,
) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>, TimelineError> {
    let start = parse_boundary(event, "start", event.started_at())?;
    let finish = parse_boundary(event, "expected finish", event.expected_finish())?;

    match (is_unset_sentinel(start), is_unset_sentinel(finish)) {
        (true, true) => Err(TimelineError::InvalidSentinel {
            event_id: event.event_id(),
        }),
        (true, false) | (false, true) => {
            tracing::warn!(
                event_id = event.event_id(),
                "event has only one boundary set, skipping"
            );
            Ok(None)
        }
        (false, false) => Ok(Some((start, finish))),
    }
}

fn parse_boundary<E: UsageEvent>(
    event: &E,
    field: &'static str,
    value: &str,
) -> Result<DateTime<Utc>, TimelineError> {
    parse_timestamp(value).map_err(|source| TimelineError::DateParse {
        event_id: event.event_id(),
        field,
        value: value.to_string(),
        source,
    })
}

fn add_to_bucket(
    series: &mut TimeSeries,
    day: DayKey,
    available: u32,
    team_count: u32,
) -> Result<(), TimelineError> {
    let overflow = || TimelineError::CountOverflow { day };
    let contribution = available.checked_add(team_count).ok_or_else(overflow)?;
    match series.entry(day) {
        Entry::Occupied(mut bucket) => {
            let total = bucket.get().checked_add(contribution).ok_or_else(overflow)?;
            bucket.insert(total);
        }
        Entry::Vacant(bucket) => {
            bucket.insert(contribution);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fmt;

    use chrono::{NaiveDate, TimeZone};

    use super::*;

    #[derive(Debug, Clone)]
    struct TestEvent {
        id: i64,
        available: u32,
        start: String,
        finish: String,
        open: bool,
    }

    impl TestEvent {
        fn open(id: i64, available: u32, start: &str, finish: &str) -> Self {
            Self {
                id,
                available,
                start: start.to_string(),
                finish: finish.to_string(),
                open: true,
            }
        }

        fn closed(id: i64, available: u32, start: &str, finish: &str) -> Self {
            Self {
                open: false,
                ..Self::open(id, available, start, finish)
            }
        }
    }

    impl UsageEvent for TestEvent {
        fn event_id(&self) -> i64 {
            self.id
        }

        fn available(&self) -> u32 {
            self.available
        }

        fn started_at(&self) -> &str {
            &self.start
        }

        fn expected_finish(&self) -> &str {
            &self.finish
        }
    }

    #[derive(Debug)]
    struct TestError;

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "store unavailable")
        }
    }

    impl StdError for TestError {}

    #[derive(Debug, Default)]
    struct TestStore {
        events: Vec<TestEvent>,
        teams: HashMap<i64, u32>,
        fail_team_count: bool,
    }

    impl TestStore {
        fn with_events(events: Vec<TestEvent>) -> Self {
            Self {
                events,
                ..Self::default()
            }
        }

        fn teams(mut self, event_id: i64, count: u32) -> Self {
            self.teams.insert(event_id, count);
            self
        }

        fn open_boundaries(&self) -> impl Iterator<Item = (DateTime<Utc>, DateTime<Utc>)> + '_ {
            self.events.iter().filter(|event| event.open).map(|event| {
                (
                    parse_timestamp(&event.start).unwrap(),
                    parse_timestamp(&event.finish).unwrap(),
                )
            })
        }
    }

    impl EventRepository for TestStore {
        type Event = TestEvent;
        type Error = TestError;

        fn list_all_events(&self) -> Result<Vec<TestEvent>, TestError> {
            Ok(self.events.clone())
        }

        fn earliest_open_event_start(&self) -> Result<Option<DateTime<Utc>>, TestError> {
            Ok(self.open_boundaries().map(|(start, _)| start).min())
        }

        fn latest_open_event_expected_finish(&self) -> Result<Option<DateTime<Utc>>, TestError> {
            Ok(self.open_boundaries().map(|(_, finish)| finish).max())
        }
    }

    impl TeamCounter for TestStore {
        type Error = TestError;

        fn count_teams(&self, event_id: i64) -> Result<u32, TestError> {
            if self.fail_team_count {
                return Err(TestError);
            }
            Ok(self.teams.get(&event_id).copied().unwrap_or(0))
        }
    }

    fn day(y: i32, m: u32, d: u32) -> DayKey {
        DayKey::from_date(NaiveDate::from_ymd_opt(y, m, d).unwrap())
    }

    fn build(store: &TestStore) -> Result<TimeSeries, TimelineError> {
        build_time_series(store, store, &AggregationConfig::default())
    }

    fn two_event_store() -> TestStore {
        TestStore::with_events(vec![
            TestEvent::open(1, 5, "2020-05-19 19:19:19", "2020-05-23 09:00:00"),
            TestEvent::open(2, 7, "2020-05-20 19:19:19", "2020-05-30 09:00:00"),
        ])
        .teams(1, 5)
        .teams(2, 10)
    }

    #[test]
    fn overlapping_events_sum_per_day() {
        let series = build(&two_event_store()).unwrap();

        let mut expected = vec![("2020-05-19 00:00:00".to_string(), 10)];
        for d in 20..=23 {
            expected.push((format!("2020-05-{d} 00:00:00"), 27));
        }
        for d in 24..=30 {
            expected.push((format!("2020-05-{d} 00:00:00"), 17));
        }
        let actual: Vec<(String, u32)> = series.to_wire().into_iter().collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn event_order_does_not_change_result() {
        let store = two_event_store();
        let mut reversed = two_event_store();
        reversed.events.reverse();

        assert_eq!(build(&store).unwrap(), build(&reversed).unwrap());
    }

    #[test]
    fn disjoint_events_do_not_bleed_into_each_other() {
        let store = TestStore::with_events(vec![
            TestEvent::open(1, 3, "2021-01-01T08:00:00Z", "2021-01-02T08:00:00Z"),
            TestEvent::open(2, 4, "2021-01-05T08:00:00Z", "2021-01-06T08:00:00Z"),
        ])
        .teams(2, 1);

        let series = build(&store).unwrap();
        assert_eq!(series.get(day(2021, 1, 1)), Some(3));
        assert_eq!(series.get(day(2021, 1, 2)), Some(3));
        assert_eq!(series.get(day(2021, 1, 3)), Some(0));
        assert_eq!(series.get(day(2021, 1, 4)), Some(0));
        assert_eq!(series.get(day(2021, 1, 5)), Some(5));
        assert_eq!(series.get(day(2021, 1, 6)), Some(5));
        assert_eq!(series.len(), 6);
    }

    #[test]
    fn no_open_events_returns_empty_series_by_default() {
        let store = TestStore::with_events(vec![TestEvent::closed(
            1,
            5,
            "2020-05-19 00:00:00",
            "2020-05-20 00:00:00",
        )]);
        assert!(build(&store).unwrap().is_empty());
    }

    #[test]
    fn malformed_closed_event_fails_without_open_span() {
        let store = TestStore::with_events(vec![
            TestEvent::closed(1, 5, "2020-05-19 00:00:00", "2020-05-20 00:00:00"),
            TestEvent::closed(2, 5, "2020-05-19", "2020-05-20 00:00:00"),
        ]);
        let err = build(&store).unwrap_err();
        assert!(matches!(
            err,
            TimelineError::DateParse {
                event_id: 2,
                field: "start",
                ..
            }
        ));
    }

    #[test]
    fn no_open_events_can_be_rejected() {
        let store = TestStore::default();
        let config = AggregationConfig {
            empty_span: EmptySpanPolicy::Reject,
            ..AggregationConfig::default()
        };
        let err = build_time_series(&store, &store, &config).unwrap_err();
        assert!(matches!(err, TimelineError::EmptySpan));
    }

    #[test]
    fn closed_event_outside_span_creates_buckets_by_default() {
        let store = TestStore::with_events(vec![
            TestEvent::open(1, 2, "2020-06-10 10:00:00", "2020-06-11 10:00:00"),
            TestEvent::closed(2, 1, "2020-06-08 10:00:00", "2020-06-10 10:00:00"),
        ]);

        let series = build(&store).unwrap();
        assert_eq!(series.get(day(2020, 6, 8)), Some(1));
        assert_eq!(series.get(day(2020, 6, 9)), Some(1));
        assert_eq!(series.get(day(2020, 6, 10)), Some(3));
        assert_eq!(series.get(day(2020, 6, 11)), Some(2));
    }

    #[test]
    fn closed_event_tails_can_be_clipped_to_span() {
        let store = TestStore::with_events(vec![
            TestEvent::open(1, 2, "2020-06-10 10:00:00", "2020-06-11 10:00:00"),
            TestEvent::closed(2, 1, "2020-06-08 10:00:00", "2020-06-10 10:00:00"),
        ]);
        let config = AggregationConfig {
            closed_tails: ClosedTailPolicy::Clip,
            ..AggregationConfig::default()
        };

        let series = build_time_series(&store, &store, &config).unwrap();
        assert!(!series.contains(day(2020, 6, 8)));
        assert!(!series.contains(day(2020, 6, 9)));
        assert_eq!(series.get(day(2020, 6, 10)), Some(3));
        assert_eq!(series.get(day(2020, 6, 11)), Some(2));
    }

    #[test]
    fn unparsable_date_fails_whole_computation() {
        let mut store = two_event_store();
        store.events.push(TestEvent::closed(3, 1, "not a date", "2020-05-21 00:00:00"));

        let err = build(&store).unwrap_err();
        match err {
            TimelineError::DateParse {
                event_id, field, ..
            } => {
                assert_eq!(event_id, 3);
                assert_eq!(field, "start");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn both_boundaries_unset_is_invalid() {
        let mut store = two_event_store();
        store.events.push(TestEvent::closed(
            9,
            1,
            "0001-01-01 00:00:00",
            "0001-01-01T00:00:00Z",
        ));

        let err = build(&store).unwrap_err();
        assert!(matches!(err, TimelineError::InvalidSentinel { event_id: 9 }));
    }

    #[test]
    fn single_unset_boundary_skips_event() {
        let mut store = two_event_store();
        store.events.push(TestEvent::closed(
            4,
            100,
            "0001-01-01 00:00:00",
            "2020-05-21 00:00:00",
        ));

        assert_eq!(build(&store).unwrap(), build(&two_event_store()).unwrap());
    }

    #[test]
    fn sentinel_day_never_appears_in_output() {
        // Starts on the sentinel's day but not on the marker instant itself.
        let mut store = two_event_store();
        store.events.push(TestEvent::closed(
            5,
            1,
            "0001-01-01 06:00:00",
            "0001-01-02 00:00:00",
        ));

        let series = build(&store).unwrap();
        assert!(!series.contains(DayKey::sentinel()));
        assert_eq!(series.get(day(1, 1, 2)), Some(1));
    }

    #[test]
    fn sentinel_span_anchor_counts_as_no_span() {
        struct LegacyStore;

        impl EventRepository for LegacyStore {
            type Event = TestEvent;
            type Error = TestError;

            fn list_all_events(&self) -> Result<Vec<TestEvent>, TestError> {
                Ok(Vec::new())
            }

            fn earliest_open_event_start(&self) -> Result<Option<DateTime<Utc>>, TestError> {
                Ok(Some(crate::timeline::unset_sentinel()))
            }

            fn latest_open_event_expected_finish(
                &self,
            ) -> Result<Option<DateTime<Utc>>, TestError> {
                Ok(Some(Utc.with_ymd_and_hms(2020, 5, 1, 0, 0, 0).unwrap()))
            }
        }

        let config = AggregationConfig {
            empty_span: EmptySpanPolicy::Reject,
            ..AggregationConfig::default()
        };
        let err = build_time_series(&LegacyStore, &TestStore::default(), &config).unwrap_err();
        assert!(matches!(err, TimelineError::EmptySpan));
    }

    #[test]
    fn reversed_window_contributes_nothing() {
        let mut store = two_event_store();
        store.events.push(TestEvent::closed(
            6,
            50,
            "2020-05-25 00:00:00",
            "2020-05-21 00:00:00",
        ));

        assert_eq!(build(&store).unwrap(), build(&two_event_store()).unwrap());
    }

    #[test]
    fn team_counter_failure_is_reported() {
        let mut store = two_event_store();
        store.fail_team_count = true;

        let err = build(&store).unwrap_err();
        assert!(matches!(err, TimelineError::Repository(_)));
        assert_eq!(err.to_string(), "repository error: store unavailable");
    }

    #[test]
    fn overflowing_day_total_is_an_error() {
        let store = TestStore::with_events(vec![
            TestEvent::open(1, u32::MAX, "2020-05-19 00:00:00", "2020-05-19 00:00:00"),
            TestEvent::open(2, 1, "2020-05-19 00:00:00", "2020-05-19 00:00:00"),
        ]);

        let err = build(&store).unwrap_err();
        assert!(matches!(err, TimelineError::CountOverflow { .. }));
    }

    #[test]
    fn config_deserializes_lowercase_policies() {
        let config: AggregationConfig =
            serde_json::from_str(r#"{"empty_span":"reject","closed_tails":"clip"}"#).unwrap();
        assert_eq!(config.empty_span, EmptySpanPolicy::Reject);
        assert_eq!(config.closed_tails, ClosedTailPolicy::Clip);

        let partial: AggregationConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(partial, AggregationConfig::default());
    }
}
