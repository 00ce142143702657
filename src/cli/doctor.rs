//! CLI `doctor` command: run database diagnostics and print a health report.

use anyhow::{Context, Result};

use dayweave::config::DayweaveConfig;
use dayweave::db;
use dayweave::journal::status;

/// Run database diagnostics and print a health report.
pub fn doctor(config: &DayweaveConfig) -> Result<()> {
    let db_path = config.resolved_db_path();

    if !db_path.exists() {
        println!("Database: not found at {}", db_path.display());
        println!("Run `dayweave serve` or `dayweave ingest` to initialize.");
        return Ok(());
    }

    let file_size = std::fs::metadata(&db_path)
        .map(|m| m.len())
        .unwrap_or(0);

    let conn = db::open_database(&db_path)
        .context("failed to open database (may be corrupt)")?;

    let report = db::check_database_health(&conn)
        .context("failed to run health check")?;

    println!("Dayweave Health Report");
    println!("======================");
    println!();
    println!("Database:          {}", db_path.display());
    println!("File size:         {}", format_bytes(file_size));
    println!("Schema version:    {}", report.schema_version);
    println!();
    println!("Extractor:");
    println!("  Stored:          {}", report.extractor_provider.as_deref().unwrap_or("(not set)"));
    println!("  Configured:      {}", config.extractor.provider);
    if let Some(ref stored) = report.extractor_provider {
        if stored != &config.extractor.provider {
            println!("  NOTE: existing events were segmented by a different extractor.");
        } else {
            println!("  Status:          OK (match)");
        }
    }
    println!();
    println!("Row counts:");
    println!("  Events:          {}", report.event_count);
    println!("  Chunks:          {}", report.chunk_count);
    println!("  Reflections:     {}", report.reflection_count);
    println!("  Audit log:       {}", report.log_count);
    println!();

    let health = status::pipeline_health(&conn, chrono::Utc::now(), &config.tracker, 5)
        .context("failed to inspect transcript chunks")?;
    println!("Chunk pipeline:");
    println!(
        "  Pending: {}  Processing: {}  Completed: {}  Failed: {}",
        health.counts.pending, health.counts.processing, health.counts.completed, health.counts.failed
    );
    if let Some(since) = health.oldest_pending {
        println!("  Oldest pending:  {}", since.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if health.stale_claims > 0 {
        println!(
            "  WARNING: {} chunk(s) stuck in processing past the {}s claim timeout.",
            health.stale_claims, config.tracker.claim_timeout_secs
        );
        println!("  Run `dayweave process-pending` to reclaim them.");
    }
    if health.exhausted > 0 {
        println!(
            "  WARNING: {} chunk(s) failed after {} attempts; use `dayweave reset-chunk <id>`.",
            health.exhausted, config.tracker.max_attempts
        );
    }
    for (id, error) in &health.recent_failures {
        println!("  failed {id}: {error}");
    }
    println!();
    if report.integrity_ok {
        println!("Integrity check:   PASSED");
    } else {
        println!("Integrity check:   FAILED ({})", report.integrity_details);
        println!();
        println!("Recovery steps:");
        println!("  1. Restore from a backup: cp backup.db ~/.dayweave/dayweave.db");
        println!("  2. Or purge the affected days with `dayweave reset-day` and re-ingest.");
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
