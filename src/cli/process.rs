//! CLI `process-pending` command: one background sweep, in the foreground.

use anyhow::Result;

use dayweave::config::DayweaveConfig;
use dayweave::journal::processor;

pub async fn process_pending(config: &DayweaveConfig) -> Result<()> {
    let orchestrator = super::orchestrator(config)?;
    let stats = processor::sweep(&orchestrator).await?;

    println!("Examined:   {}", stats.examined);
    println!("Processed:  {}", stats.processed);
    println!("Duplicate:  {}", stats.skipped);
    println!("Queued:     {}", stats.queued);
    println!("Failed:     {}", stats.failed);
    Ok(())
}
