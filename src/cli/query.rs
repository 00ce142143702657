use anyhow::Result;

use dayweave::config::DayweaveConfig;
use dayweave::journal::transcript::parse_day;

/// Print a day's events in time order.
pub async fn query(config: &DayweaveConfig, user: Option<String>, day: &str, json: bool) -> Result<()> {
    let day = parse_day(day)?;
    let username = super::resolve_user(config, user);
    let view = super::orchestrator(config)?
        .query_day(&username, day)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    println!("{username} on {day}: {} events", view.total_count);
    println!("{}", "=".repeat(40));
    for event in &view.events {
        let start = event.start.get(11..16).unwrap_or(event.start.as_str());
        let end = event.end.get(11..16).unwrap_or(event.end.as_str());
        println!("{start}-{end}  {}", event.event_title);
        println!("    {}", event.one_sentence_summary);
        if !event.people_involved.is_empty() {
            println!("    with {}", event.people_involved.join(", "));
        }
    }
    Ok(())
}

/// Print a day's reflection.
pub async fn reflection(config: &DayweaveConfig, user: Option<String>, day: &str, json: bool) -> Result<()> {
    let day = parse_day(day)?;
    let username = super::resolve_user(config, user);
    let reflection = super::orchestrator(config)?
        .daily_reflection(&username, day)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&reflection)?);
        return Ok(());
    }

    let score = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{v:.2}"));
    println!("Reflection for {username} on {day}");
    println!("{}", "=".repeat(40));
    println!("  Events:          {}", reflection.event_count);
    println!("  Minutes:         {}", reflection.total_minutes);
    println!("  Mood:            {}", score(reflection.mood_score));
    println!("  Stress:          {}", score(reflection.stress_level));
    println!("  Energy:          {}", score(reflection.energy_level));
    println!();
    println!("Highlights:");
    for line in &reflection.highlights {
        println!("  {line}");
    }
    Ok(())
}
