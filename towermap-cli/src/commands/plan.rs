use anyhow::Result;

use super::{open_cache, validated, CacheOptions};

pub fn run(options: &CacheOptions, lat: f64, lon: f64, radius: f64) -> Result<()> {
    let cache = open_cache(options)?;
    let params = validated(&cache, lat, lon, radius)?;

    let plan = cache.plan(params.lat, params.lon, params.radius_km);

    println!(
        "{} tiles ({} x {}) of at most {} km",
        plan.tiles,
        plan.rows,
        plan.cols,
        cache.config().tile_km
    );
    println!("{} provider calls left today", plan.quota_remaining);
    if !cache.has_provider() {
        println!("No API key configured, searches will use cached data only");
    } else if plan.fully_covered {
        println!("A fetch here would cover the whole area");
    } else {
        println!(
            "A fetch here would stop after {} of {} tiles",
            plan.quota_remaining, plan.tiles
        );
    }

    Ok(())
}
