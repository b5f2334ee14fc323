//! Training events and the teams registered for them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ChallengeTag, EventStatus, EventTag, TeamId};

/// A scheduled or running training event on the range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Database primary key.
    pub id: i64,
    pub tag: EventTag,
    pub name: String,
    /// Comma-separated frontend images offered to teams.
    pub frontends: String,
    /// Comma-separated exercise tags.
    pub exercises: String,
    /// Lab slots kept available regardless of registered teams.
    pub available: u32,
    /// Maximum number of teams.
    pub capacity: u32,
    pub status: EventStatus,
    pub started_at: DateTime<Utc>,
    pub expected_finish: DateTime<Utc>,
    /// When the event was closed. `None` while it is still open.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub created_by: String,
    pub only_vpn: bool,
}

impl Event {
    /// An event is open until it has a finish time.
    pub const fn is_open(&self) -> bool {
        self.finished_at.is_none()
    }
}

/// A team playing in an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: TeamId,
    pub event_id: i64,
    pub email: String,
    pub name: String,
    /// Password hash as supplied by the caller. Never serialized.
    #[serde(skip_serializing, default)]
    pub password: String,
    pub created_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    #[serde(default)]
    pub solved_challenges: Vec<SolvedChallenge>,
}

impl Team {
    /// Returns true if the team already solved the given challenge.
    pub fn has_solved(&self, challenge: &ChallengeTag) -> bool {
        self.solved_challenges
            .iter()
            .any(|solved| &solved.tag == challenge)
    }
}

/// One entry of a team's solved challenge log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolvedChallenge {
    pub tag: ChallengeTag,
    #[serde(rename = "completed-at")]
    pub completed_at: DateTime<Utc>,
}
