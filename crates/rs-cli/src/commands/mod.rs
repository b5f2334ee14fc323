//! CLI subcommand implementations.

pub mod event;
pub mod team;
pub mod timeseries;
pub mod util;
