//! CLI `ingest` and `ingest-file` commands.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;

use dayweave::config::DayweaveConfig;
use dayweave::journal::transcript::{parse_day, parse_time, split_transcript};
use dayweave::journal::{IngestOutcome, IngestRequest, IngestStatus};

/// Submit transcript text (split at its time markers) and print the outcome.
pub async fn ingest(
    config: &DayweaveConfig,
    user: Option<String>,
    day: &str,
    text: String,
    at: Option<&str>,
) -> Result<()> {
    let day = parse_day(day)?;
    let observed_at = at.map(|raw| parse_time(raw, day)).transpose()?;
    let orchestrator = super::orchestrator(config)?;

    let outcome = orchestrator
        .ingest(IngestRequest {
            username: super::resolve_user(config, user),
            day,
            text,
            observed_at,
            chunk_id: None,
        })
        .await?;

    print_outcome(&outcome);
    Ok(())
}

/// Split a transcript file by time markers (or lines) and submit each
/// fragment in order.
pub async fn ingest_file(
    config: &DayweaveConfig,
    user: Option<String>,
    day: &str,
    path: &Path,
) -> Result<()> {
    let day = parse_day(day)?;
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read transcript {}", path.display()))?;
    let fragments = split_transcript(&contents, day);
    anyhow::ensure!(!fragments.is_empty(), "no fragments found in {}", path.display());

    let username = super::resolve_user(config, user);
    let orchestrator = super::orchestrator(config)?;

    let pb = ProgressBar::new(fragments.len() as u64);
    pb.set_style(
        ProgressStyle::with_template("  {bar:40.cyan/blue} {pos}/{len} {msg}")
            .context("invalid progress template")?
            .progress_chars("##-"),
    );

    let (mut created, mut updated, mut skipped, mut failed) = (0u32, 0u32, 0u32, 0u32);
    for fragment in fragments {
        let result = orchestrator
            .ingest(IngestRequest {
                username: username.clone(),
                day,
                text: fragment.text,
                observed_at: fragment.observed_at,
                chunk_id: None,
            })
            .await;

        match result {
            Ok(outcome) => {
                created += outcome.new_events_count;
                updated += outcome.updated_events_count;
                if outcome.status != IngestStatus::Processed {
                    skipped += 1;
                }
                pb.set_message(outcome.message);
            }
            Err(e) => {
                failed += 1;
                pb.println(format!("  fragment failed: {e}"));
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    let total = orchestrator.query_day(&username, day).await?.total_count;
    println!("Ingested {} for {username} on {day}", path.display());
    println!("  New events:      {created}");
    println!("  Extended:        {updated}");
    println!("  Skipped:         {skipped}");
    println!("  Failed:          {failed}");
    println!("  Events that day: {total}");
    Ok(())
}

fn print_outcome(outcome: &IngestOutcome) {
    println!("{}", outcome.message);
    if outcome.fragments > 1 {
        println!("  Fragments: {}", outcome.fragments);
    }
    println!("  Chunk:    {}", outcome.chunk_id);
    if let Some(ref id) = outcome.event_id {
        println!("  Event:    {id}");
    }
    println!(
        "  New: {}  Updated: {}  Total: {}",
        outcome.new_events_count, outcome.updated_events_count, outcome.total_events_count
    );
}
