use anyhow::Result;

use dayweave::config::DayweaveConfig;

/// Display journal statistics in the terminal.
pub fn stats(config: &DayweaveConfig, user: Option<&str>) -> Result<()> {
    let db_path = config.resolved_db_path();
    let conn = dayweave::db::open_database(&db_path)?;

    let response = dayweave::journal::stats::journal_stats(&conn, user, Some(&db_path))?;

    println!("Journal Statistics");
    println!("{}", "=".repeat(40));
    println!("  Total events:        {}", response.total_events);
    println!("  Users:               {}", response.users);
    println!("  Days:                {}", response.days);
    println!("  Reflections:         {}", response.reflections);
    println!();

    println!("Chunks:");
    println!("  {:<12} {}", "pending", response.chunks.pending);
    println!("  {:<12} {}", "processing", response.chunks.processing);
    println!("  {:<12} {}", "completed", response.chunks.completed);
    println!("  {:<12} {}", "failed", response.chunks.failed);
    println!();

    if !response.by_activity.is_empty() {
        println!("By Activity:");
        for (activity, count) in &response.by_activity {
            println!("  {:<12} {}", activity, count);
        }
        println!();
    }

    println!("Database size:         {} bytes", response.db_size_bytes);
    if let Some(ref first) = response.first_day {
        println!("First day:             {first}");
    }
    if let Some(ref last) = response.last_day {
        println!("Last day:              {last}");
    }

    Ok(())
}
