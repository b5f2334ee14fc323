//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use rs_core::EventStatus;

/// Training-range event store.
///
/// Keeps track of events and their teams, and reports how many lab
/// resources are allocated on each day.
#[derive(Debug, Parser)]
#[command(name = "rstore", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Manage events.
    #[command(subcommand)]
    Event(EventAction),

    /// Manage the teams of an event.
    #[command(subcommand)]
    Team(TeamAction),

    /// Print allocated resources per day across all events.
    Timeseries {
        /// Output as a JSON object keyed by day.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum EventAction {
    /// Create an event.
    Add(EventAddArgs),

    /// List events.
    List {
        /// Only list events with this status.
        #[arg(long)]
        status: Option<EventStatus>,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show one event.
    Show {
        tag: String,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Close an event and free its tag.
    Close {
        tag: String,

        /// Finish time (RFC 3339, `YYYY-MM-DD HH:MM:SS` or e.g. "2 hours ago"). Defaults to now.
        #[arg(long)]
        at: Option<String>,
    },

    /// Show or change an event's status.
    Status {
        tag: String,

        /// New status. Prints the current one when omitted.
        status: Option<EventStatus>,
    },

    /// Delete an event and its teams.
    Drop { tag: String },
}

#[derive(Debug, Args)]
pub struct EventAddArgs {
    /// Unique tag for the event.
    pub tag: String,

    /// Start time.
    #[arg(long)]
    pub start: String,

    /// Expected finish time.
    #[arg(long)]
    pub finish: String,

    #[arg(long, default_value = "")]
    pub name: String,

    /// Comma-separated frontend images.
    #[arg(long, default_value = "")]
    pub frontends: String,

    /// Comma-separated exercise tags.
    #[arg(long, default_value = "")]
    pub exercises: String,

    /// Lab slots kept available regardless of teams.
    #[arg(long, default_value_t = 0)]
    pub available: u32,

    /// Maximum number of teams.
    #[arg(long, default_value_t = 0)]
    pub capacity: u32,

    #[arg(long, default_value = "running")]
    pub status: EventStatus,

    #[arg(long, default_value = "")]
    pub created_by: String,

    /// Teams reach the labs over VPN only.
    #[arg(long)]
    pub only_vpn: bool,
}

#[derive(Debug, Subcommand)]
pub enum TeamAction {
    /// Register a team for an event.
    Add(TeamAddArgs),

    /// List the teams of an event.
    List {
        event_tag: String,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Record a team's last access.
    Access {
        team_id: String,

        /// Access time. Defaults to now.
        #[arg(long)]
        at: Option<String>,
    },

    /// Record a solved challenge.
    Solve {
        team_id: String,
        challenge: String,

        /// Completion time. Defaults to now.
        #[arg(long)]
        at: Option<String>,
    },

    /// Replace a team's password.
    Password { team_id: String, password: String },

    /// Delete a team.
    Delete { team_id: String },
}

#[derive(Debug, Args)]
pub struct TeamAddArgs {
    /// Tag of the event to join.
    pub event_tag: String,

    #[arg(long)]
    pub email: String,

    #[arg(long)]
    pub name: String,

    /// Password hash, stored as given.
    #[arg(long)]
    pub password: String,

    /// Team ID. A UUID is generated when omitted.
    #[arg(long)]
    pub id: Option<String>,
}
