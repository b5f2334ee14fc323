use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use rs_cli::commands::{event, team, timeseries};
use rs_cli::{Cli, Commands, Config, EventAction, TeamAction};

/// Load config and open database, ensuring the parent directory exists.
fn open_database(config_path: Option<&Path>) -> Result<(rs_db::Database, Config)> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }

    let db = rs_db::Database::open(&config.database_path)
        .with_context(|| format!("failed to open {}", config.database_path.display()))?;
    Ok((db, config))
}

fn run_event<W: Write>(
    writer: &mut W,
    db: &mut rs_db::Database,
    action: &EventAction,
) -> Result<()> {
    match action {
        EventAction::Add(args) => event::add(writer, db, args),
        EventAction::List { status, json } => event::list(writer, db, *status, *json),
        EventAction::Show { tag, json } => event::show(writer, db, tag, *json),
        EventAction::Close { tag, at } => event::close(writer, db, tag, at.as_deref()),
        EventAction::Status { tag, status } => event::status(writer, db, tag, *status),
        EventAction::Drop { tag } => event::drop_event(writer, db, tag),
    }
}

fn run_team<W: Write>(
    writer: &mut W,
    db: &mut rs_db::Database,
    action: &TeamAction,
) -> Result<()> {
    match action {
        TeamAction::Add(args) => team::add(writer, db, args),
        TeamAction::List { event_tag, json } => team::list(writer, db, event_tag, *json),
        TeamAction::Access { team_id, at } => team::access(writer, db, team_id, at.as_deref()),
        TeamAction::Solve {
            team_id,
            challenge,
            at,
        } => team::solve(writer, db, team_id, challenge, at.as_deref()),
        TeamAction::Password { team_id, password } => {
            team::password(writer, db, team_id, password)
        }
        TeamAction::Delete { team_id } => team::delete(writer, db, team_id),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with verbose flag support
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Use try_init to avoid panic if tracing is already initialized (e.g., in tests)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let stdout = io::stdout();
    let mut out = stdout.lock();

    match &cli.command {
        Some(Commands::Event(action)) => {
            let (mut db, _config) = open_database(cli.config.as_deref())?;
            run_event(&mut out, &mut db, action)?;
        }
        Some(Commands::Team(action)) => {
            let (mut db, _config) = open_database(cli.config.as_deref())?;
            run_team(&mut out, &mut db, action)?;
        }
        Some(Commands::Timeseries { json }) => {
            let (mut db, config) = open_database(cli.config.as_deref())?;
            timeseries::run(&mut out, &mut db, &config.aggregation, *json)?;
        }
        None => {
            // No subcommand, show help
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
        }
    }

    Ok(())
}
