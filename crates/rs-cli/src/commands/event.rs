//! Event commands: create, inspect, close and remove events.

use std::io::Write;

use anyhow::{Context, Result};
use rs_core::{Event, EventStatus, EventTag};
use rs_db::{Database, NewEvent};

use crate::cli::EventAddArgs;
use crate::commands::util::{datetime_or_now, format_time, parse_datetime};

pub fn add<W: Write>(writer: &mut W, db: &mut Database, args: &EventAddArgs) -> Result<()> {
    let started_at = parse_datetime(&args.start).context("invalid --start")?;
    let expected_finish = parse_datetime(&args.finish).context("invalid --finish")?;
    if expected_finish < started_at {
        tracing::warn!(tag = %args.tag, "expected finish precedes start");
    }

    let event = NewEvent {
        tag: EventTag::new(args.tag.as_str())?,
        name: args.name.clone(),
        frontends: args.frontends.clone(),
        exercises: args.exercises.clone(),
        available: args.available,
        capacity: args.capacity,
        status: args.status,
        started_at,
        expected_finish,
        created_by: args.created_by.clone(),
        only_vpn: args.only_vpn,
    };
    let id = db.add_event(&event)?;
    writeln!(writer, "Added event {} (id {id})", event.tag)?;
    Ok(())
}

pub fn list<W: Write>(
    writer: &mut W,
    db: &Database,
    status: Option<EventStatus>,
    json: bool,
) -> Result<()> {
    let events = db.list_events(status)?;

    if json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&events)?)?;
        return Ok(());
    }

    if events.is_empty() {
        writeln!(writer, "No events stored.")?;
        return Ok(());
    }

    writeln!(
        writer,
        "{:<4} {:<16} {:<10} {:<20} {:<20} FINISHED",
        "ID", "TAG", "STATUS", "START", "EXPECTED FINISH"
    )?;
    for event in &events {
        let finished = event.finished_at.map_or_else(|| "-".to_string(), format_time);
        writeln!(
            writer,
            "{:<4} {:<16} {:<10} {:<20} {:<20} {}",
            event.id,
            event.tag.as_str(),
            event.status.as_str(),
            format_time(event.started_at),
            format_time(event.expected_finish),
            finished
        )?;
    }
    Ok(())
}

pub fn show<W: Write>(writer: &mut W, db: &Database, tag: &str, json: bool) -> Result<()> {
    let tag = EventTag::new(tag)?;
    let event = db
        .event_by_tag(&tag)?
        .with_context(|| format!("event not found: {tag}"))?;
    let teams = db.count_teams(event.id)?;

    if json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&event)?)?;
        return Ok(());
    }

    write_event(writer, &event, teams)
}

fn write_event<W: Write>(writer: &mut W, event: &Event, teams: u32) -> Result<()> {
    let finished = event.finished_at.map_or_else(|| "-".to_string(), format_time);
    writeln!(writer, "Event {}: {}", event.id, event.tag)?;
    writeln!(writer, "Name:            {}", event.name)?;
    writeln!(writer, "Status:          {}", event.status)?;
    writeln!(writer, "Start:           {}", format_time(event.started_at))?;
    writeln!(writer, "Expected finish: {}", format_time(event.expected_finish))?;
    writeln!(writer, "Finished:        {finished}")?;
    writeln!(writer, "Available:       {}", event.available)?;
    writeln!(writer, "Teams:           {teams}/{}", event.capacity)?;
    writeln!(writer, "Frontends:       {}", event.frontends)?;
    writeln!(writer, "Exercises:       {}", event.exercises)?;
    writeln!(writer, "Created by:      {}", event.created_by)?;
    writeln!(
        writer,
        "VPN only:        {}",
        if event.only_vpn { "yes" } else { "no" }
    )?;
    Ok(())
}

/// Closes an event. The event moves to `<tag>-<unix finish time>` so the tag can be reused.
pub fn close<W: Write>(
    writer: &mut W,
    db: &mut Database,
    tag: &str,
    at: Option<&str>,
) -> Result<()> {
    let tag = EventTag::new(tag)?;
    let finished_at = datetime_or_now(at).context("invalid --at")?;
    let new_tag = EventTag::new(format!("{tag}-{}", finished_at.timestamp()))?;

    db.close_event(&tag, &new_tag, finished_at)?;
    writeln!(writer, "Closed event {tag} as {new_tag}")?;
    Ok(())
}

pub fn status<W: Write>(
    writer: &mut W,
    db: &mut Database,
    tag: &str,
    status: Option<EventStatus>,
) -> Result<()> {
    let tag = EventTag::new(tag)?;
    match status {
        Some(status) => {
            db.set_event_status(&tag, status)?;
            writeln!(writer, "Event {tag} is now {status}")?;
        }
        None => {
            let status = db.event_status(&tag)?;
            writeln!(writer, "{tag}: {status}")?;
        }
    }
    Ok(())
}

pub fn drop_event<W: Write>(writer: &mut W, db: &mut Database, tag: &str) -> Result<()> {
    let tag = EventTag::new(tag)?;
    db.drop_event(&tag)?;
    writeln!(writer, "Dropped event {tag}")?;
    Ok(())
}
