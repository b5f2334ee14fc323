//! Timeseries command: allocated lab resources per day.

use std::io::Write;

use anyhow::{Context, Result};
use rs_core::AggregationConfig;
use rs_db::Database;

pub fn run<W: Write>(
    writer: &mut W,
    db: &mut Database,
    config: &AggregationConfig,
    json: bool,
) -> Result<()> {
    let series = db
        .time_series(config)
        .context("failed to build time series")?;

    if json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&series)?)?;
        return Ok(());
    }

    if series.is_empty() {
        writeln!(writer, "No usage recorded.")?;
        return Ok(());
    }

    writeln!(writer, "{:<20} RESOURCES", "DAY")?;
    for (day, total) in series.iter() {
        writeln!(writer, "{:<20} {total}", day.to_string())?;
    }
    Ok(())
}
