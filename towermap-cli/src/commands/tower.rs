use anyhow::{bail, Context, Result};

use super::search::tower_line;
use super::{open_cache, CacheOptions};

pub fn run(options: &CacheOptions, id: u64, json: bool) -> Result<()> {
    let cache = open_cache(options)?;

    let tower = match cache.tower(id).context("Failed to read tower")? {
        Some(tower) => tower,
        None => bail!("Tower {} not found", id),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&tower)?);
        return Ok(());
    }

    println!("{}", tower_line(&tower));
    if let Some(signal) = tower.signal_avg {
        println!("signal:  {} dBm", signal);
    }
    if let Some(samples) = tower.samples {
        println!("samples: {}", samples);
    }
    if let Some(operator) = &tower.operator {
        println!("operator: {}", operator);
    }
    println!("source:  {}", tower.source);
    println!("created: {}", tower.created_at.to_rfc3339());
    println!("updated: {}", tower.updated_at.to_rfc3339());

    Ok(())
}
