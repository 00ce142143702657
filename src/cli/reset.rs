//! CLI `reset-chunk` and `reset-day` commands.

use anyhow::{bail, Result};
use std::io::Write;

use dayweave::config::DayweaveConfig;
use dayweave::journal::transcript::parse_day;

/// Move a failed chunk back to pending.
pub async fn reset_chunk(config: &DayweaveConfig, chunk_id: &str) -> Result<()> {
    let chunk = super::orchestrator(config)?.reset_chunk(chunk_id).await?;
    println!(
        "Chunk {} is {} again ({} on {}).",
        chunk.id, chunk.status, chunk.username, chunk.day
    );
    println!("Run `dayweave process-pending` or wait for the background processor.");
    Ok(())
}

/// Delete a day's events, chunks and reflection after user confirmation.
pub async fn reset_day(
    config: &DayweaveConfig,
    user: Option<String>,
    day: &str,
    yes: bool,
) -> Result<()> {
    let day = parse_day(day)?;
    let username = super::resolve_user(config, user);

    if !yes {
        println!("WARNING: This will permanently delete every event, chunk and the reflection");
        println!("for {username} on {day}.");
        print!("\nType YES to confirm: ");
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if input.trim() != "YES" {
            bail!("reset cancelled");
        }
    }

    let summary = super::orchestrator(config)?
        .reset_day(&username, day)
        .await?;
    println!(
        "Deleted {} events and {} chunks{}.",
        summary.events_deleted,
        summary.chunks_deleted,
        if summary.reflection_deleted { " plus the reflection" } else { "" }
    );
    Ok(())
}
