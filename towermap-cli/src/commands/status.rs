use anyhow::{Context, Result};

use super::{open_cache, CacheOptions};

pub fn run(options: &CacheOptions, json: bool) -> Result<()> {
    let cache = open_cache(options)?;
    let status = cache.status().context("Failed to read cache status")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Database:      {}", options.db.display());
    println!(
        "API key:       {}",
        if status.api_key_configured {
            "configured"
        } else {
            "not configured (cache only)"
        }
    );
    println!(
        "API calls:     {} / {} today",
        status.api_calls_today, status.api_daily_limit
    );
    println!("Cached towers: {}", status.total_towers);
    for (radio, count) in &status.towers_by_radio {
        println!("  {:<5} {}", radio, count);
    }

    Ok(())
}
