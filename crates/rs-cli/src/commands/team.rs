//! Team commands.

use std::io::Write;

use anyhow::{Context, Result};
use rs_core::{ChallengeTag, EventTag, TeamId};
use rs_db::{Database, NewTeam};

use crate::cli::TeamAddArgs;
use crate::commands::util::{datetime_or_now, format_time};

pub fn add<W: Write>(writer: &mut W, db: &mut Database, args: &TeamAddArgs) -> Result<()> {
    let team = NewTeam {
        id: args.id.as_deref().map(TeamId::new).transpose()?,
        event_tag: EventTag::new(args.event_tag.as_str())?,
        email: args.email.clone(),
        name: args.name.clone(),
        password: args.password.clone(),
    };
    let id = db.add_team(&team)?;
    writeln!(writer, "Added team {id} to {}", team.event_tag)?;
    Ok(())
}

pub fn list<W: Write>(writer: &mut W, db: &Database, event_tag: &str, json: bool) -> Result<()> {
    let event_tag = EventTag::new(event_tag)?;
    let teams = db.list_teams(&event_tag)?;

    if json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&teams)?)?;
        return Ok(());
    }

    if teams.is_empty() {
        writeln!(writer, "No teams registered for {event_tag}.")?;
        return Ok(());
    }

    writeln!(
        writer,
        "{:<12} {:<16} {:<24} {:<20} SOLVED",
        "ID", "NAME", "EMAIL", "LAST ACCESS"
    )?;
    for team in &teams {
        writeln!(
            writer,
            "{:<12} {:<16} {:<24} {:<20} {}",
            team.id.as_str(),
            team.name,
            team.email,
            format_time(team.last_access),
            team.solved_challenges.len()
        )?;
    }
    Ok(())
}

pub fn access<W: Write>(
    writer: &mut W,
    db: &mut Database,
    team_id: &str,
    at: Option<&str>,
) -> Result<()> {
    let team_id = TeamId::new(team_id)?;
    let at = datetime_or_now(at).context("invalid --at")?;
    db.update_team_last_access(&team_id, at)?;
    writeln!(writer, "Updated last access for {team_id}")?;
    Ok(())
}

pub fn solve<W: Write>(
    writer: &mut W,
    db: &mut Database,
    team_id: &str,
    challenge: &str,
    at: Option<&str>,
) -> Result<()> {
    let team_id = TeamId::new(team_id)?;
    let challenge = ChallengeTag::new(challenge)?;
    let completed_at = datetime_or_now(at).context("invalid --at")?;
    db.add_solved_challenge(&team_id, &challenge, completed_at)?;
    writeln!(writer, "Team {team_id} solved {challenge}")?;
    Ok(())
}

pub fn password<W: Write>(
    writer: &mut W,
    db: &mut Database,
    team_id: &str,
    password: &str,
) -> Result<()> {
    let team_id = TeamId::new(team_id)?;
    db.update_team_password(&team_id, password)?;
    writeln!(writer, "Updated password for {team_id}")?;
    Ok(())
}

pub fn delete<W: Write>(writer: &mut W, db: &mut Database, team_id: &str) -> Result<()> {
    let team_id = TeamId::new(team_id)?;
    db.delete_team(&team_id)?;
    writeln!(writer, "Deleted team {team_id}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use insta::assert_snapshot;
    use rs_core::EventStatus;
    use rs_db::NewEvent;

    use super::*;

    fn db_with_event() -> Database {
        let mut db = Database::open_in_memory().unwrap();
        db.add_event(&NewEvent {
            tag: EventTag::new("test").unwrap(),
            name: "Test".to_string(),
            frontends: String::new(),
            exercises: String::new(),
            available: 1,
            capacity: 4,
            status: EventStatus::Running,
            started_at: Utc.with_ymd_and_hms(2020, 5, 20, 0, 0, 0).unwrap(),
            expected_finish: Utc.with_ymd_and_hms(2020, 5, 22, 0, 0, 0).unwrap(),
            created_by: String::new(),
            only_vpn: false,
        })
        .unwrap();
        db
    }

    fn add_args(id: &str) -> TeamAddArgs {
        TeamAddArgs {
            event_tag: "test".to_string(),
            email: format!("{id}@test.dk"),
            name: format!("Team {id}"),
            password: "hash".to_string(),
            id: Some(id.to_string()),
        }
    }

    fn output(buf: Vec<u8>) -> String {
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn team_lifecycle() {
        let mut db = db_with_event();
        let mut out = Vec::new();
        add(&mut out, &mut db, &add_args("team1")).unwrap();
        add(&mut out, &mut db, &add_args("team2")).unwrap();
        access(&mut out, &mut db, "team1", Some("2020-05-21 09:00:00")).unwrap();
        access(&mut out, &mut db, "team2", Some("2020-05-21 10:30:00")).unwrap();
        solve(&mut out, &mut db, "team1", "ftp", Some("2020-05-21 12:35:01")).unwrap();
        password(&mut out, &mut db, "team2", "new-hash").unwrap();
        assert_snapshot!(output(out), @r"
        Added team team1 to test
        Added team team2 to test
        Updated last access for team1
        Updated last access for team2
        Team team1 solved ftp
        Updated password for team2
        ");

        let mut out = Vec::new();
        list(&mut out, &db, "test", false).unwrap();
        assert_snapshot!(output(out), @r"
        ID           NAME             EMAIL                    LAST ACCESS          SOLVED
        team1        Team team1       team1@test.dk            2020-05-21 09:00:00  1
        team2        Team team2       team2@test.dk            2020-05-21 10:30:00  0
        ");
    }

    #[test]
    fn list_json_hides_passwords() {
        let mut db = db_with_event();
        add(&mut Vec::new(), &mut db, &add_args("team1")).unwrap();

        let mut out = Vec::new();
        list(&mut out, &db, "test", true).unwrap();
        let teams: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(teams[0]["id"], "team1");
        assert!(teams[0].get("password").is_none());
    }

    #[test]
    fn list_reports_no_teams() {
        let db = db_with_event();
        let mut out = Vec::new();
        list(&mut out, &db, "test", false).unwrap();
        assert_eq!(output(out), "No teams registered for test.\n");
    }

    #[test]
    fn solve_rejects_repeat_and_unknown_team() {
        let mut db = db_with_event();
        add(&mut Vec::new(), &mut db, &add_args("team1")).unwrap();
        solve(&mut Vec::new(), &mut db, "team1", "ftp", None).unwrap();

        let err = solve(&mut Vec::new(), &mut db, "team1", "ftp", None).unwrap_err();
        assert!(err.to_string().contains("already solved ftp"));

        let err = solve(&mut Vec::new(), &mut db, "ghost", "ftp", None).unwrap_err();
        assert!(err.to_string().contains("team not found: ghost"));
    }

    #[test]
    fn add_requires_existing_event() {
        let mut db = Database::open_in_memory().unwrap();
        let err = add(&mut Vec::new(), &mut db, &add_args("team1")).unwrap_err();
        assert!(err.to_string().contains("event not found: test"));
    }

    #[test]
    fn delete_removes_team() {
        let mut db = db_with_event();
        add(&mut Vec::new(), &mut db, &add_args("team1")).unwrap();

        let mut out = Vec::new();
        delete(&mut out, &mut db, "team1").unwrap();
        assert_eq!(output(out), "Deleted team team1\n");
        assert_eq!(db.count_teams(1).unwrap(), 0);
    }
}
