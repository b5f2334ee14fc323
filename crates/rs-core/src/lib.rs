//! Core domain logic for the training-range event store.
//!
//! This crate contains the fundamental types and logic for:
//! - Events and teams: the records the store keeps
//! - Timeline: day truncation, range expansion and the unset-date marker
//! - Usage: the per-day resource time series across overlapping events

pub mod event;
pub mod timeline;
pub mod types;
mod usage;

pub use event::{Event, SolvedChallenge, Team};
pub use timeline::{DayKey, TimeSeries, expand_days, is_unset_sentinel, parse_timestamp};
pub use types::{ChallengeTag, EventStatus, EventTag, TeamId, ValidationError};
pub use usage::{
    AggregationConfig, ClosedTailPolicy, EmptySpanPolicy, EventRepository, TeamCounter,
    TimelineError, UsageEvent, build_time_series,
};
