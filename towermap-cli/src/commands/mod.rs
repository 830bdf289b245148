pub mod batch;
pub mod plan;
pub mod search;
pub mod status;
pub mod tower;

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use towermap::{AreaSearchCache, AreaSearchCacheBuilder, SearchParams};

/// Global options shared by every command.
pub struct CacheOptions {
    pub db: PathBuf,
    pub api_key: Option<String>,
    pub daily_limit: Option<u32>,
}

/// Build the search cache from the environment, overridden by command-line flags.
pub fn open_cache(options: &CacheOptions) -> Result<AreaSearchCache> {
    let mut builder = AreaSearchCacheBuilder::from_env().database(&options.db);

    if let Some(key) = &options.api_key {
        builder = builder.api_key(key.as_str());
    }
    if let Some(limit) = options.daily_limit {
        builder = builder.daily_limit(limit);
    }

    builder
        .build()
        .with_context(|| format!("Failed to open tower cache at {}", options.db.display()))
}

/// Validate a coordinate and radius, joining every problem into one error.
pub fn validated(cache: &AreaSearchCache, lat: f64, lon: f64, radius: f64) -> Result<SearchParams> {
    match cache.validate(lat, lon, Some(radius)) {
        Ok(params) => Ok(params),
        Err(errors) => bail!("{}", errors.join("; ")),
    }
}
