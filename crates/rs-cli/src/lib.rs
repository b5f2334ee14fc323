//! Training-range event store CLI library.
//!
//! This crate provides the command-line surface over the event store.

mod cli;
pub mod commands;
mod config;

pub use cli::{Cli, Commands, EventAction, EventAddArgs, TeamAction, TeamAddArgs};
pub use config::Config;
