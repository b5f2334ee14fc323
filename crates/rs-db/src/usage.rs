//! Repository queries backing the usage time series.

use chrono::{DateTime, Utc};
use rs_core::{
    AggregationConfig, EventRepository, TeamCounter, TimeSeries, UsageEvent, build_time_series,
    is_unset_sentinel, parse_timestamp,
};
use rusqlite::Connection;

use crate::{Database, DbError, EVENT_COLUMNS, EventRecord, count_teams, query_event_records};

/// Rows whose `finished_at` marks the event as open.
const OPEN_EVENT_FILTER: &str = "finished_at IS NULL \
     OR finished_at IN ('0001-01-01 00:00:00', '0001-01-01T00:00:00Z')";

impl UsageEvent for EventRecord {
    fn event_id(&self) -> i64 {
        self.id
    }

    fn available(&self) -> u32 {
        self.available
    }

    fn started_at(&self) -> &str {
        &self.started_at
    }

    fn expected_finish(&self) -> &str {
        &self.expected_finish
    }
}

/// Read-only view over a connection or an open transaction.
pub struct StoreReader<'a> {
    conn: &'a Connection,
}

impl<'a> StoreReader<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parsed `column` values of all open events. Unparsable and unset values are skipped.
    fn open_event_boundaries(&self, column: &str) -> Result<Vec<DateTime<Utc>>, DbError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT id, {column} FROM events WHERE {OPEN_EVENT_FILTER}"))?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;

        let mut boundaries = Vec::new();
        for row in rows {
            let (id, value) = row?;
            match parse_timestamp(&value) {
                Ok(timestamp) if !is_unset_sentinel(timestamp) => boundaries.push(timestamp),
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(event_id = id, column, %value, error = %err, "skipping unparsable boundary");
                }
            }
        }
        Ok(boundaries)
    }
}

impl EventRepository for StoreReader<'_> {
    type Event = EventRecord;
    type Error = DbError;

    fn list_all_events(&self) -> Result<Vec<EventRecord>, DbError> {
        query_event_records(
            self.conn,
            &format!("SELECT {EVENT_COLUMNS} FROM events ORDER BY id ASC"),
            [],
        )
    }

    fn earliest_open_event_start(&self) -> Result<Option<DateTime<Utc>>, DbError> {
        Ok(self.open_event_boundaries("started_at")?.into_iter().min())
    }

    fn latest_open_event_expected_finish(&self) -> Result<Option<DateTime<Utc>>, DbError> {
        Ok(self
            .open_event_boundaries("expected_finish")?
            .into_iter()
            .max())
    }
}

impl TeamCounter for StoreReader<'_> {
    type Error = DbError;

    fn count_teams(&self, event_id: i64) -> Result<u32, DbError> {
        count_teams(self.conn, event_id)
    }
}

impl Database {
    /// Builds the per-day usage series over all stored events.
    ///
    /// Every read happens inside one transaction, so concurrent writers are
    /// either fully visible or not at all.
    pub fn time_series(&mut self, config: &AggregationConfig) -> Result<TimeSeries, DbError> {
        let tx = self.conn.transaction()?;
        let reader = StoreReader::new(&tx);
        let series = build_time_series(&reader, &reader, config)?;
        tx.commit()?;
        Ok(series)
    }

    /// Earliest start among open events.
    pub fn earliest_open_event_start(&self) -> Result<Option<DateTime<Utc>>, DbError> {
        StoreReader::new(&self.conn).earliest_open_event_start()
    }

    /// Latest expected finish among open events.
    pub fn latest_open_event_expected_finish(&self) -> Result<Option<DateTime<Utc>>, DbError> {
        StoreReader::new(&self.conn).latest_open_event_expected_finish()
    }
}
