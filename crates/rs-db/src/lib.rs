//! Storage layer for the training-range event store.
//!
//! Provides persistence for events and teams using `rusqlite`, plus the
//! repository queries the usage time series is built from.
//!
//! # Thread Safety
//!
//! The [`Database`] type wraps a `rusqlite::Connection`, which is `Send` but not `Sync`.
//! Hosts that serve concurrent requests share one connection through
//! [`SharedDatabase`], which serializes every operation behind a single mutex.
//! The time series is additionally computed inside one read transaction, so it
//! never observes a half-applied write even when the connection is shared
//! differently.
//!
//! # Schema
//!
//! ## Timestamp Format
//!
//! Timestamps are stored as TEXT in RFC 3339 UTC (e.g., `2020-05-19T19:19:19Z`).
//! Rows written by older deployments may use `2020-05-19 19:19:19` instead; both
//! layouts are accepted when reading.
//!
//! ## Open Events
//!
//! `events.finished_at` is NULL while an event is open. Older rows used the
//! marker `0001-01-01 00:00:00` for the same purpose; it is read back as NULL and
//! never written.

mod shared;
mod usage;

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use rs_core::{
    ChallengeTag, Event, EventStatus, EventTag, SolvedChallenge, Team, TeamId, TimelineError,
    ValidationError, is_unset_sentinel, parse_timestamp,
};
use rusqlite::{Connection, OptionalExtension, Row, params};
use thiserror::Error;
use uuid::Uuid;

pub use shared::SharedDatabase;
pub use usage::StoreReader;

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A stored timestamp could not be parsed.
    #[error("invalid timestamp for {record}: {timestamp}")]
    TimestampParse {
        record: String,
        timestamp: String,
        #[source]
        source: chrono::ParseError,
    },
    /// A team's solved challenge log is not valid JSON.
    #[error("invalid solved challenge log for team {team_id}")]
    InvalidChallengeLog {
        team_id: String,
        #[source]
        source: serde_json::Error,
    },
    /// A stored or supplied value failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Another stored event already holds this tag.
    #[error("event tag already in use: {0}")]
    DuplicateTag(String),
    /// No event with this tag exists.
    #[error("event not found: {0}")]
    EventNotFound(String),
    /// No team with this ID exists.
    #[error("team not found: {0}")]
    TeamNotFound(String),
    /// The team already has this challenge in its log.
    #[error("team {team_id} already solved {challenge}")]
    ChallengeAlreadySolved { team_id: String, challenge: String },
    /// The usage time series could not be built.
    #[error("time series aggregation failed: {0}")]
    Timeline(#[from] TimelineError),
    /// A timestamp equal to the unset marker was supplied for writing.
    #[error("{field} cannot be the unset marker 0001-01-01T00:00:00Z")]
    UnsetTimestamp { field: &'static str },
    /// A thread panicked while holding the shared connection.
    #[error("database lock poisoned")]
    LockPoisoned,
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
}

/// An event row as stored, with timestamps still in their text form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub id: i64,
    pub tag: String,
    pub name: String,
    pub frontends: String,
    pub exercises: String,
    pub available: u32,
    pub capacity: u32,
    pub status: String,
    pub started_at: String,
    pub expected_finish: String,
    pub finished_at: Option<String>,
    pub created_by: String,
    pub only_vpn: bool,
}

/// A new event to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub tag: EventTag,
    pub name: String,
    pub frontends: String,
    pub exercises: String,
    pub available: u32,
    pub capacity: u32,
    pub status: EventStatus,
    pub started_at: DateTime<Utc>,
    pub expected_finish: DateTime<Utc>,
    pub created_by: String,
    pub only_vpn: bool,
}

/// A new team to be registered for an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTeam {
    /// Caller-chosen ID. A UUID is generated when absent.
    pub id: Option<TeamId>,
    pub event_tag: EventTag,
    pub email: String,
    pub name: String,
    pub password: String,
}

const EVENT_COLUMNS: &str = "id, tag, name, frontends, exercises, available, capacity, status, \
     started_at, expected_finish, finished_at, created_by, only_vpn";

const TEAM_COLUMNS: &str =
    "id, event_id, email, name, password, created_at, last_access, solved_challenges";

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.conn.execute_batch(
            "
            -- Events table: one row per training event
            -- started_at / expected_finish / finished_at: RFC 3339 UTC text
            -- finished_at: NULL while the event is open
            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tag TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL DEFAULT '',
                frontends TEXT NOT NULL DEFAULT '',
                exercises TEXT NOT NULL DEFAULT '',
                available INTEGER NOT NULL DEFAULT 0 CHECK (available >= 0),
                capacity INTEGER NOT NULL DEFAULT 0 CHECK (capacity >= 0),
                status TEXT NOT NULL DEFAULT 'running',
                started_at TEXT NOT NULL,
                expected_finish TEXT NOT NULL,
                finished_at TEXT,
                created_by TEXT NOT NULL DEFAULT '',
                only_vpn INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_events_finished ON events(finished_at);

            -- Teams table: solved_challenges is a JSON array of {tag, completed-at}
            CREATE TABLE IF NOT EXISTS teams (
                id TEXT PRIMARY KEY,
                event_id INTEGER NOT NULL,
                email TEXT NOT NULL,
                name TEXT NOT NULL,
                password TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_access TEXT NOT NULL,
                solved_challenges TEXT NOT NULL DEFAULT '[]',
                FOREIGN KEY (event_id) REFERENCES events(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_teams_event ON teams(event_id);
            ",
        )?;
        Ok(())
    }

    // ========== Events ==========

    /// Stores a new event and returns its ID.
    pub fn add_event(&mut self, event: &NewEvent) -> Result<i64, DbError> {
        ensure_set(event.started_at, "started_at")?;
        ensure_set(event.expected_finish, "expected_finish")?;
        let tx = self.conn.transaction()?;
        if tag_exists(&tx, event.tag.as_str())? {
            return Err(DbError::DuplicateTag(event.tag.to_string()));
        }
        tx.execute(
            "
            INSERT INTO events
            (tag, name, frontends, exercises, available, capacity, status,
             started_at, expected_finish, finished_at, created_by, only_vpn)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, ?, ?)
            ",
            params![
                event.tag.as_str(),
                event.name,
                event.frontends,
                event.exercises,
                event.available,
                event.capacity,
                event.status.as_str(),
                format_timestamp(event.started_at),
                format_timestamp(event.expected_finish),
                event.created_by,
                event.only_vpn,
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        tracing::debug!(id, tag = %event.tag, "event added");
        Ok(id)
    }

    /// Lists events ordered by ID, optionally restricted to one status.
    pub fn list_events(&self, status: Option<EventStatus>) -> Result<Vec<Event>, DbError> {
        let records = match status {
            Some(status) => query_event_records(
                &self.conn,
                &format!("SELECT {EVENT_COLUMNS} FROM events WHERE status = ? ORDER BY id ASC"),
                [status.as_str()],
            )?,
            None => query_event_records(
                &self.conn,
                &format!("SELECT {EVENT_COLUMNS} FROM events ORDER BY id ASC"),
                [],
            )?,
        };
        records.into_iter().map(Event::try_from).collect()
    }

    /// Looks up the event currently holding `tag`.
    pub fn event_by_tag(&self, tag: &EventTag) -> Result<Option<Event>, DbError> {
        let record = self
            .conn
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM events WHERE tag = ?"),
                [tag.as_str()],
                event_record_from_row,
            )
            .optional()?;
        record.map(Event::try_from).transpose()
    }

    /// Returns the ID of the event holding `tag`.
    pub fn event_id(&self, tag: &EventTag) -> Result<i64, DbError> {
        event_id_for_tag(&self.conn, tag.as_str())
    }

    pub fn event_exists(&self, tag: &EventTag) -> Result<bool, DbError> {
        tag_exists(&self.conn, tag.as_str())
    }

    pub fn event_status(&self, tag: &EventTag) -> Result<EventStatus, DbError> {
        let status: Option<String> = self
            .conn
            .query_row(
                "SELECT status FROM events WHERE tag = ?",
                [tag.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let status = status.ok_or_else(|| DbError::EventNotFound(tag.to_string()))?;
        Ok(status.parse()?)
    }

    pub fn set_event_status(&mut self, tag: &EventTag, status: EventStatus) -> Result<(), DbError> {
        let updated = self.conn.execute(
            "UPDATE events SET status = ? WHERE tag = ?",
            params![status.as_str(), tag.as_str()],
        )?;
        if updated == 0 {
            return Err(DbError::EventNotFound(tag.to_string()));
        }
        Ok(())
    }

    /// Closes an event and moves it to `new_tag`, freeing `old_tag` for reuse.
    pub fn close_event(
        &mut self,
        old_tag: &EventTag,
        new_tag: &EventTag,
        finished_at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        ensure_set(finished_at, "finished_at")?;
        let tx = self.conn.transaction()?;
        if old_tag != new_tag && tag_exists(&tx, new_tag.as_str())? {
            return Err(DbError::DuplicateTag(new_tag.to_string()));
        }
        let updated = tx.execute(
            "UPDATE events SET tag = ?, finished_at = ?, status = ? WHERE tag = ?",
            params![
                new_tag.as_str(),
                format_timestamp(finished_at),
                EventStatus::Closed.as_str(),
                old_tag.as_str(),
            ],
        )?;
        if updated == 0 {
            return Err(DbError::EventNotFound(old_tag.to_string()));
        }
        tx.commit()?;
        tracing::debug!(%old_tag, %new_tag, "event closed");
        Ok(())
    }

    /// Deletes an event together with its teams.
    pub fn drop_event(&mut self, tag: &EventTag) -> Result<(), DbError> {
        let deleted = self
            .conn
            .execute("DELETE FROM events WHERE tag = ?", [tag.as_str()])?;
        if deleted == 0 {
            return Err(DbError::EventNotFound(tag.to_string()));
        }
        Ok(())
    }

    // ========== Teams ==========

    /// Registers a team for the event holding `team.event_tag`.
    pub fn add_team(&mut self, team: &NewTeam) -> Result<TeamId, DbError> {
        self.add_team_at(team, Utc::now())
    }

    fn add_team_at(&mut self, team: &NewTeam, now: DateTime<Utc>) -> Result<TeamId, DbError> {
        let id = match &team.id {
            Some(id) => id.clone(),
            None => TeamId::new(Uuid::new_v4().to_string())?,
        };
        let tx = self.conn.transaction()?;
        let event_id = event_id_for_tag(&tx, team.event_tag.as_str())?;
        let now = format_timestamp(now);
        tx.execute(
            "
            INSERT INTO teams
            (id, event_id, email, name, password, created_at, last_access, solved_challenges)
            VALUES (?, ?, ?, ?, ?, ?, ?, '[]')
            ",
            params![
                id.as_str(),
                event_id,
                team.email,
                team.name,
                team.password,
                now,
                now
            ],
        )?;
        tx.commit()?;
        tracing::debug!(team_id = %id, event_id, "team added");
        Ok(id)
    }

    /// Lists the teams of the event holding `event_tag`, ordered by creation.
    pub fn list_teams(&self, event_tag: &EventTag) -> Result<Vec<Team>, DbError> {
        let event_id = event_id_for_tag(&self.conn, event_tag.as_str())?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TEAM_COLUMNS} FROM teams WHERE event_id = ? ORDER BY created_at ASC, id ASC"
        ))?;
        let rows = stmt.query_map([event_id], team_row_from_row)?;
        let mut teams = Vec::new();
        for row in rows {
            teams.push(row?.into_team()?);
        }
        Ok(teams)
    }

    pub fn count_teams(&self, event_id: i64) -> Result<u32, DbError> {
        count_teams(&self.conn, event_id)
    }

    pub fn update_team_last_access(
        &mut self,
        team_id: &TeamId,
        at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let updated = self.conn.execute(
            "UPDATE teams SET last_access = ? WHERE id = ?",
            params![format_timestamp(at), team_id.as_str()],
        )?;
        if updated == 0 {
            return Err(DbError::TeamNotFound(team_id.to_string()));
        }
        Ok(())
    }

    pub fn update_team_password(&mut self, team_id: &TeamId, password: &str) -> Result<(), DbError> {
        let updated = self.conn.execute(
            "UPDATE teams SET password = ? WHERE id = ?",
            params![password, team_id.as_str()],
        )?;
        if updated == 0 {
            return Err(DbError::TeamNotFound(team_id.to_string()));
        }
        Ok(())
    }

    /// Appends a challenge to the team's solved log. Each challenge is accepted once.
    pub fn add_solved_challenge(
        &mut self,
        team_id: &TeamId,
        challenge: &ChallengeTag,
        completed_at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let tx = self.conn.transaction()?;
        let log: Option<String> = tx
            .query_row(
                "SELECT solved_challenges FROM teams WHERE id = ?",
                [team_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let log = log.ok_or_else(|| DbError::TeamNotFound(team_id.to_string()))?;
        let mut solved = parse_challenge_log(&log, team_id.as_str())?;

        if solved.iter().any(|entry| &entry.tag == challenge) {
            return Err(DbError::ChallengeAlreadySolved {
                team_id: team_id.to_string(),
                challenge: challenge.to_string(),
            });
        }
        solved.push(SolvedChallenge {
            tag: challenge.clone(),
            completed_at,
        });

        let log = serde_json::to_string(&solved).map_err(|source| DbError::InvalidChallengeLog {
            team_id: team_id.to_string(),
            source,
        })?;
        tx.execute(
            "UPDATE teams SET solved_challenges = ? WHERE id = ?",
            params![log, team_id.as_str()],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn delete_team(&mut self, team_id: &TeamId) -> Result<(), DbError> {
        let deleted = self
            .conn
            .execute("DELETE FROM teams WHERE id = ?", [team_id.as_str()])?;
        if deleted == 0 {
            return Err(DbError::TeamNotFound(team_id.to_string()));
        }
        Ok(())
    }
}

impl TryFrom<EventRecord> for Event {
    type Error = DbError;

    fn try_from(record: EventRecord) -> Result<Self, Self::Error> {
        let label = format!("event {}", record.id);
        let started_at = parse_stored_timestamp(&record.started_at, &label)?;
        let expected_finish = parse_stored_timestamp(&record.expected_finish, &label)?;
        let finished_at = match record.finished_at.as_deref() {
            Some(value) => Some(parse_stored_timestamp(value, &label)?)
                .filter(|finished| !is_unset_sentinel(*finished)),
            None => None,
        };
        Ok(Self {
            id: record.id,
            tag: EventTag::new(record.tag)?,
            name: record.name,
            frontends: record.frontends,
            exercises: record.exercises,
            available: record.available,
            capacity: record.capacity,
            status: record.status.parse()?,
            started_at,
            expected_finish,
            finished_at,
            created_by: record.created_by,
            only_vpn: record.only_vpn,
        })
    }
}

#[derive(Debug)]
struct TeamRow {
    id: String,
    event_id: i64,
    email: String,
    name: String,
    password: String,
    created_at: String,
    last_access: String,
    solved_challenges: String,
}

impl TeamRow {
    fn into_team(self) -> Result<Team, DbError> {
        let label = format!("team {}", self.id);
        Ok(Team {
            created_at: parse_stored_timestamp(&self.created_at, &label)?,
            last_access: parse_stored_timestamp(&self.last_access, &label)?,
            solved_challenges: parse_challenge_log(&self.solved_challenges, &self.id)?,
            id: TeamId::new(self.id)?,
            event_id: self.event_id,
            email: self.email,
            name: self.name,
            password: self.password,
        })
    }
}

fn event_record_from_row(row: &Row<'_>) -> rusqlite::Result<EventRecord> {
    Ok(EventRecord {
        id: row.get(0)?,
        tag: row.get(1)?,
        name: row.get(2)?,
        frontends: row.get(3)?,
        exercises: row.get(4)?,
        available: row.get(5)?,
        capacity: row.get(6)?,
        status: row.get(7)?,
        started_at: row.get(8)?,
        expected_finish: row.get(9)?,
        finished_at: row.get(10)?,
        created_by: row.get(11)?,
        only_vpn: row.get(12)?,
    })
}

fn team_row_from_row(row: &Row<'_>) -> rusqlite::Result<TeamRow> {
    Ok(TeamRow {
        id: row.get(0)?,
        event_id: row.get(1)?,
        email: row.get(2)?,
        name: row.get(3)?,
        password: row.get(4)?,
        created_at: row.get(5)?,
        last_access: row.get(6)?,
        solved_challenges: row.get(7)?,
    })
}

fn query_event_records<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<EventRecord>, DbError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, event_record_from_row)?;
    let mut records = Vec::new();
    for row in rows {
        records.push(row?);
    }
    Ok(records)
}

fn tag_exists(conn: &Connection, tag: &str) -> Result<bool, DbError> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM events WHERE tag = ?)",
        [tag],
        |row| row.get(0),
    )?;
    Ok(exists)
}

fn event_id_for_tag(conn: &Connection, tag: &str) -> Result<i64, DbError> {
    conn.query_row("SELECT id FROM events WHERE tag = ?", [tag], |row| {
        row.get(0)
    })
    .optional()?
    .ok_or_else(|| DbError::EventNotFound(tag.to_string()))
}

fn count_teams(conn: &Connection, event_id: i64) -> Result<u32, DbError> {
    let count: u32 = conn.query_row(
        "SELECT COUNT(*) FROM teams WHERE event_id = ?",
        [event_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

fn parse_challenge_log(log: &str, team_id: &str) -> Result<Vec<SolvedChallenge>, DbError> {
    serde_json::from_str(log).map_err(|source| DbError::InvalidChallengeLog {
        team_id: team_id.to_string(),
        source,
    })
}

fn parse_stored_timestamp(timestamp: &str, record: &str) -> Result<DateTime<Utc>, DbError> {
    parse_timestamp(timestamp).map_err(|source| DbError::TimestampParse {
        record: record.to_string(),
        timestamp: timestamp.to_string(),
        source,
    })
}

/// The unset marker reads back as "open", so it is never written.
fn ensure_set(timestamp: DateTime<Utc>, field: &'static str) -> Result<(), DbError> {
    if is_unset_sentinel(timestamp) {
        return Err(DbError::UnsetTimestamp { field });
    }
    Ok(())
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}
