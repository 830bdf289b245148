//! Cached, quota-aware area search.
//!
//! This module provides [`AreaSearchCache`], which answers "which towers are
//! within R km of P" from the local store when it holds recent data for the
//! area, and otherwise sweeps the area tile by tile through the provider
//! while the daily quota lasts.
//!
//! ```ignore
//! use towermap::AreaSearchCacheBuilder;
//!
//! let cache = AreaSearchCacheBuilder::new()
//!     .api_key("my-opencellid-key")
//!     .daily_limit(1000)
//!     .build()?;
//!
//! let result = cache.search(37.7749, -122.4194, 10.0)?;
//! println!("{} towers (cached: {})", result.count, result.cached);
//! ```
//!
//! # Decision order
//!
//! 1. Any tower in the area updated within the freshness window → cached result.
//! 2. No provider configured → cached result with an advisory message.
//! 3. Daily quota spent → cached result flagged `rate_limited`.
//! 4. Otherwise fetch tiles until coverage or quota runs out, merge, and
//!    return the re-queried area.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

#[cfg(feature = "sqlite")]
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TowerError};
use crate::geo::SearchRegion;
use crate::merge::{MergeEngine, ObservationSet};
use crate::model::TowerRecord;
use crate::provider::{OpenCellIdClient, ProviderConfig, TowerProvider, MAX_QUERY_AREA_KM2};
use crate::quota::QuotaTracker;
use crate::store::{MemoryStore, QuotaStore, TowerStore};
use crate::tiler::{tile, Tiles};
use crate::validate::{validate_search, RadiusBounds, SearchParams};

#[cfg(feature = "sqlite")]
use crate::store::SqliteStore;

/// Advisory message returned when no provider credential is configured.
pub const NO_API_KEY_MESSAGE: &str = "No API key configured, showing cached data only";

/// Default daily provider call ceiling.
pub const DEFAULT_DAILY_LIMIT: u32 = 1000;

/// Default freshness window in hours.
pub const DEFAULT_FRESHNESS_HOURS: i64 = 24;

/// Default tile side in km, leaving margin under the provider's 4 km² cap.
pub const DEFAULT_TILE_KM: f64 = 1.5;

/// Tunables for [`AreaSearchCache`].
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Provider calls allowed per UTC day.
    pub daily_limit: u32,
    /// Maximum age of a tower update for the area to count as fresh.
    pub freshness: Duration,
    /// Side of one provider tile in km.
    pub tile_km: f64,
    /// Tiles fetched concurrently.
    pub fetch_workers: usize,
    /// Accepted search radius.
    pub radius_bounds: RadiusBounds,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            daily_limit: DEFAULT_DAILY_LIMIT,
            freshness: Duration::hours(DEFAULT_FRESHNESS_HOURS),
            tile_km: DEFAULT_TILE_KM,
            fetch_workers: 1,
            radius_bounds: RadiusBounds::default(),
        }
    }
}

impl SearchConfig {
    fn check(&self) -> Result<()> {
        let invalid = |reason: String| Err(TowerError::InvalidConfig { reason });

        if !self.tile_km.is_finite() || self.tile_km <= 0.0 {
            return invalid(format!("tile size must be positive, got {} km", self.tile_km));
        }
        if self.tile_km * self.tile_km > MAX_QUERY_AREA_KM2 {
            return invalid(format!(
                "tile size {} km exceeds the provider's {} km² query area",
                self.tile_km, MAX_QUERY_AREA_KM2
            ));
        }
        if self.fetch_workers == 0 {
            return invalid("fetch_workers must be at least 1".to_string());
        }
        if self.freshness < Duration::zero() {
            return invalid("freshness window must not be negative".to_string());
        }
        let bounds = self.radius_bounds;
        if !(bounds.min_km > 0.0 && bounds.min_km <= bounds.max_km && bounds.max_km.is_finite()) {
            return invalid(format!(
                "radius bounds must satisfy 0 < min <= max, got {}..{}",
                bounds.min_km, bounds.max_km
            ));
        }
        Ok(())
    }
}

/// Outcome of one area search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Towers in the search rectangle, ordered by id.
    pub towers: Vec<TowerRecord>,
    /// Number of towers.
    pub count: usize,
    /// Whether the answer came from the store without calling the provider.
    pub cached: bool,
    /// Whether the provider was skipped because the daily quota is spent.
    pub rate_limited: bool,
    /// Advisory note about degraded or partial results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SearchResult {
    fn new(towers: Vec<TowerRecord>, cached: bool, rate_limited: bool) -> Self {
        Self {
            count: towers.len(),
            towers,
            cached,
            rate_limited,
            message: None,
        }
    }

    fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Snapshot of process-local search counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchStats {
    /// Searches served.
    pub searches: u64,
    /// Searches answered from fresh cached data.
    pub fresh_hits: u64,
    /// Searches answered from cache because no provider is configured.
    pub cache_only: u64,
    /// Searches answered from cache because the quota was spent.
    pub rate_limited: u64,
    /// Searches that swept tiles through the provider.
    pub fetches: u64,
    /// Provider calls made.
    pub provider_calls: u64,
    /// Tiles left unfetched because the quota ran out mid-sweep.
    pub tiles_skipped: u64,
}

impl SearchStats {
    /// Fraction of searches answered without a provider call (0.0 to 1.0).
    ///
    /// Returns 0.0 if no searches have been made.
    pub fn cache_rate(&self) -> f64 {
        if self.searches == 0 {
            0.0
        } else {
            (self.searches - self.fetches) as f64 / self.searches as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    searches: AtomicU64,
    fresh_hits: AtomicU64,
    cache_only: AtomicU64,
    rate_limited: AtomicU64,
    fetches: AtomicU64,
    provider_calls: AtomicU64,
    tiles_skipped: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SearchStats {
        SearchStats {
            searches: self.searches.load(Ordering::Relaxed),
            fresh_hits: self.fresh_hits.load(Ordering::Relaxed),
            cache_only: self.cache_only.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            provider_calls: self.provider_calls.load(Ordering::Relaxed),
            tiles_skipped: self.tiles_skipped.load(Ordering::Relaxed),
        }
    }
}

/// Store and quota overview.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStatus {
    pub api_calls_today: u32,
    pub api_daily_limit: u32,
    pub api_key_configured: bool,
    pub total_towers: u64,
    /// Tower count keyed by radio name (e.g. `"LTE"`).
    pub towers_by_radio: BTreeMap<String, u64>,
}

/// What a fetch for an area would cost, without making it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TilePlan {
    /// Tiles (= provider calls) needed for full coverage.
    pub tiles: usize,
    pub rows: usize,
    pub cols: usize,
    /// Calls left today.
    pub quota_remaining: u32,
    /// Whether today's quota covers every tile.
    pub fully_covered: bool,
}

/// Result of sweeping the tiles of one area.
struct Sweep {
    observations: ObservationSet,
    calls: u32,
    tiles_total: usize,
    quota_exhausted: bool,
}

/// Cached, quota-aware cell tower area search.
///
/// `AreaSearchCache` is `Send + Sync`; concurrent searches share the store
/// and the daily quota.
pub struct AreaSearchCache {
    store: Arc<dyn TowerStore>,
    quota: QuotaTracker,
    merger: MergeEngine,
    provider: Option<Arc<dyn TowerProvider>>,
    config: SearchConfig,
    counters: Counters,
}

impl AreaSearchCache {
    /// Create a builder with default configuration.
    pub fn builder() -> AreaSearchCacheBuilder {
        AreaSearchCacheBuilder::new()
    }

    /// Search for towers within `radius_km` of a point, using the current time.
    ///
    /// Inputs are assumed valid; see [`Self::validate`].
    pub fn search(&self, lat: f64, lon: f64, radius_km: f64) -> Result<SearchResult> {
        self.search_at(lat, lon, radius_km, Utc::now())
    }

    /// Search as of `now`. Freshness and the quota day are derived from `now`.
    pub fn search_at(
        &self,
        lat: f64,
        lon: f64,
        radius_km: f64,
        now: DateTime<Utc>,
    ) -> Result<SearchResult> {
        Counters::bump(&self.counters.searches, 1);

        let area = SearchRegion::new(lat, lon, radius_km).bounding_box();
        let candidates = self.store.find_in_box(&area)?;

        // A window reaching past the earliest representable time covers everything
        let cutoff = now.checked_sub_signed(self.config.freshness);
        let is_fresh = |t: &TowerRecord| cutoff.map_or(true, |cutoff| t.updated_at >= cutoff);
        if candidates.iter().any(is_fresh) {
            Counters::bump(&self.counters.fresh_hits, 1);
            tracing::debug!(lat, lon, radius_km, count = candidates.len(), "Fresh cache hit");
            return Ok(SearchResult::new(candidates, true, false));
        }

        let provider = match &self.provider {
            Some(provider) => provider,
            None => {
                Counters::bump(&self.counters.cache_only, 1);
                tracing::debug!(lat, lon, radius_km, "No provider configured, serving cache");
                return Ok(
                    SearchResult::new(candidates, true, false).with_message(NO_API_KEY_MESSAGE)
                );
            }
        };

        let today = now.date_naive();
        if !self.quota.can_call_on(today) {
            Counters::bump(&self.counters.rate_limited, 1);
            tracing::info!(lat, lon, radius_km, "Daily quota spent, serving cache");
            return Ok(SearchResult::new(candidates, true, true));
        }

        let tiles = tile(lat, lon, radius_km, self.config.tile_km);
        let sweep = self.sweep(&**provider, tiles, today);
        if sweep.calls == 0 && sweep.quota_exhausted {
            // Another search took the last unit after the check above
            Counters::bump(&self.counters.rate_limited, 1);
            tracing::info!(lat, lon, radius_km, "Daily quota spent, serving cache");
            return Ok(SearchResult::new(candidates, true, true));
        }

        Counters::bump(&self.counters.fetches, 1);
        let merged = self
            .merger
            .merge(sweep.observations.as_slice(), provider.source(), now)?;

        let skipped = sweep.tiles_total.saturating_sub(sweep.calls as usize);
        Counters::bump(&self.counters.provider_calls, u64::from(sweep.calls));
        Counters::bump(&self.counters.tiles_skipped, skipped as u64);
        tracing::info!(
            lat,
            lon,
            radius_km,
            calls = sweep.calls,
            tiles = sweep.tiles_total,
            duplicates = sweep.observations.duplicates(),
            inserted = merged.inserted,
            updated = merged.updated,
            "Area fetched"
        );

        let towers = self.store.find_in_box(&area)?;
        let result = SearchResult::new(towers, false, false);
        if sweep.quota_exhausted && skipped > 0 {
            return Ok(result.with_message(format!(
                "Daily API limit reached after {} of {} tiles",
                sweep.calls, sweep.tiles_total
            )));
        }
        Ok(result)
    }

    /// Fetch tiles in order until they run out or the quota refuses a call.
    ///
    /// Every attempted call takes one quota unit before the request is sent,
    /// whatever the provider returns.
    fn sweep(&self, provider: &dyn TowerProvider, tiles: Tiles, date: NaiveDate) -> Sweep {
        let tiles_total = tiles.len();
        let queue = Mutex::new(tiles);
        let collected = Mutex::new(ObservationSet::new());
        let calls = AtomicU32::new(0);
        let exhausted = AtomicBool::new(false);

        let work = || loop {
            let next = queue.lock().unwrap_or_else(PoisonError::into_inner).next();
            let Some(bbox) = next else { break };
            if self.quota.try_acquire_on(date).is_none() {
                exhausted.store(true, Ordering::Relaxed);
                break;
            }
            calls.fetch_add(1, Ordering::Relaxed);
            let cells = provider.fetch(&bbox);
            collected
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend(cells);
        };

        let workers = self.config.fetch_workers.min(tiles_total).max(1);
        if workers == 1 {
            work();
        } else {
            thread::scope(|s| {
                for _ in 0..workers {
                    s.spawn(&work);
                }
            });
        }

        Sweep {
            observations: collected.into_inner().unwrap_or_else(PoisonError::into_inner),
            calls: calls.into_inner(),
            tiles_total,
            quota_exhausted: exhausted.into_inner(),
        }
    }

    /// Validate raw inputs against this cache's radius bounds.
    pub fn validate(
        &self,
        lat: f64,
        lon: f64,
        radius_km: Option<f64>,
    ) -> std::result::Result<SearchParams, Vec<String>> {
        validate_search(lat, lon, radius_km, self.config.radius_bounds)
    }

    /// Look up a cached tower by id.
    pub fn tower(&self, id: u64) -> Result<Option<TowerRecord>> {
        self.store.get(id)
    }

    /// Quota and store overview.
    pub fn status(&self) -> Result<CacheStatus> {
        let usage = self.quota.usage();
        let towers_by_radio = self
            .store
            .count_by_radio()?
            .into_iter()
            .map(|(radio, count)| (radio.to_string(), count))
            .collect();

        Ok(CacheStatus {
            api_calls_today: usage.calls,
            api_daily_limit: usage.limit,
            api_key_configured: self.provider.is_some(),
            total_towers: self.store.count()?,
            towers_by_radio,
        })
    }

    /// Tile count and quota headroom for a search, without calling the provider.
    pub fn plan(&self, lat: f64, lon: f64, radius_km: f64) -> TilePlan {
        let tiles = tile(lat, lon, radius_km, self.config.tile_km);
        let (rows, cols) = tiles.grid();
        let quota_remaining = self.quota.usage().remaining();
        TilePlan {
            tiles: tiles.len(),
            rows,
            cols,
            quota_remaining,
            fully_covered: tiles.len() <= quota_remaining as usize,
        }
    }

    /// Process-local search counters.
    pub fn stats(&self) -> SearchStats {
        self.counters.snapshot()
    }

    /// The quota tracker shared by all searches.
    pub fn quota(&self) -> &QuotaTracker {
        &self.quota
    }

    /// The active configuration.
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Whether a provider is configured.
    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }
}

/// Builder for [`AreaSearchCache`].
///
/// Without a store, an in-memory store is used. Without a provider or API
/// key, the cache runs in cache-only mode.
///
/// ```ignore
/// use std::sync::Arc;
/// use towermap::{AreaSearchCacheBuilder, store::MemoryStore};
///
/// let cache = AreaSearchCacheBuilder::new()
///     .store(Arc::new(MemoryStore::new()))
///     .api_key("my-key")
///     .tile_km(1.5)
///     .fetch_workers(4)
///     .build()?;
/// ```
pub struct AreaSearchCacheBuilder {
    config: SearchConfig,
    stores: Option<(Arc<dyn TowerStore>, Arc<dyn QuotaStore>)>,
    provider: Option<Arc<dyn TowerProvider>>,
    provider_config: Option<ProviderConfig>,
    base_url: Option<String>,
    #[cfg(feature = "sqlite")]
    database: Option<PathBuf>,
}

impl Default for AreaSearchCacheBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let value = std::env::var(name).ok()?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!(variable = name, value = %value, "Ignoring unparsable setting");
            None
        }
    }
}

impl AreaSearchCacheBuilder {
    /// Create a builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: SearchConfig::default(),
            stores: None,
            provider: None,
            provider_config: None,
            base_url: None,
            #[cfg(feature = "sqlite")]
            database: None,
        }
    }

    /// Create a builder configured from environment variables.
    ///
    /// # Environment Variables
    ///
    /// | Variable | Description | Default |
    /// |----------|-------------|---------|
    /// | `OPENCELLID_API_KEY` | Provider API key; unset or empty = cache-only | None |
    /// | `OPENCELLID_BASE_URL` | Provider base URL | `https://opencellid.org/cell` |
    /// | `TOWERMAP_DAILY_LIMIT` | Provider calls per UTC day | 1000 |
    /// | `TOWERMAP_CACHE_HOURS` | Freshness window in hours | 24 |
    /// | `TOWERMAP_TILE_KM` | Tile side in km | 1.5 |
    /// | `TOWERMAP_FETCH_WORKERS` | Concurrent tile fetches | 1 |
    /// | `TOWERMAP_DB` | SQLite database path* | in-memory |
    ///
    /// *Only used when the `sqlite` feature is enabled.
    ///
    /// Unparsable numbers are logged and ignored.
    pub fn from_env() -> Self {
        let mut builder = Self::new();

        if let Ok(key) = std::env::var("OPENCELLID_API_KEY") {
            builder = builder.api_key(key);
        }
        if let Ok(url) = std::env::var("OPENCELLID_BASE_URL") {
            builder = builder.base_url(url);
        }
        if let Some(limit) = env_parse("TOWERMAP_DAILY_LIMIT") {
            builder = builder.daily_limit(limit);
        }
        if let Some(hours) = env_parse("TOWERMAP_CACHE_HOURS") {
            builder = builder.freshness_hours(hours);
        }
        if let Some(km) = env_parse("TOWERMAP_TILE_KM") {
            builder = builder.tile_km(km);
        }
        if let Some(workers) = env_parse("TOWERMAP_FETCH_WORKERS") {
            builder = builder.fetch_workers(workers);
        }

        #[cfg(feature = "sqlite")]
        {
            if let Ok(path) = std::env::var("TOWERMAP_DB") {
                builder = builder.database(path);
            }
        }

        builder
    }

    /// Use `store` for both towers and quota counters.
    pub fn store<S>(mut self, store: Arc<S>) -> Self
    where
        S: TowerStore + QuotaStore + 'static,
    {
        let towers: Arc<dyn TowerStore> = store.clone();
        let quota: Arc<dyn QuotaStore> = store;
        self.stores = Some((towers, quota));
        self
    }

    /// Persist to a SQLite database at `path`, created if missing.
    #[cfg(feature = "sqlite")]
    pub fn database<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.database = Some(path.as_ref().to_path_buf());
        self
    }

    /// Use a custom provider. Takes precedence over [`Self::api_key`].
    pub fn provider(mut self, provider: Arc<dyn TowerProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Use OpenCelliD with this API key. An empty key means cache-only.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.provider_config = if key.trim().is_empty() {
            None
        } else {
            Some(ProviderConfig::opencellid(key))
        };
        self
    }

    /// Override the OpenCelliD base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Provider calls allowed per UTC day.
    pub fn daily_limit(mut self, limit: u32) -> Self {
        self.config.daily_limit = limit;
        self
    }

    /// Freshness window in hours. Out-of-range values saturate.
    pub fn freshness_hours(mut self, hours: i64) -> Self {
        self.config.freshness = Duration::try_hours(hours).unwrap_or(if hours < 0 {
            Duration::MIN
        } else {
            Duration::MAX
        });
        self
    }

    /// Freshness window.
    pub fn freshness(mut self, window: Duration) -> Self {
        self.config.freshness = window;
        self
    }

    /// Tile side in km. Its square must fit the provider's query area.
    pub fn tile_km(mut self, km: f64) -> Self {
        self.config.tile_km = km;
        self
    }

    /// Number of tiles fetched concurrently.
    pub fn fetch_workers(mut self, workers: usize) -> Self {
        self.config.fetch_workers = workers;
        self
    }

    /// Accepted search radius bounds.
    pub fn radius_bounds(mut self, bounds: RadiusBounds) -> Self {
        self.config.radius_bounds = bounds;
        self
    }

    fn open_stores(&mut self) -> Result<(Arc<dyn TowerStore>, Arc<dyn QuotaStore>)> {
        if let Some(stores) = self.stores.take() {
            return Ok(stores);
        }

        #[cfg(feature = "sqlite")]
        {
            if let Some(path) = self.database.take() {
                let store = Arc::new(SqliteStore::open(&path)?);
                tracing::info!(path = %path.display(), "Opened SQLite tower store");
                return Ok((store.clone(), store));
            }
        }

        let store = Arc::new(MemoryStore::new());
        Ok((store.clone(), store))
    }

    /// Build the [`AreaSearchCache`].
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the database cannot
    /// be opened, or the HTTP client cannot be created.
    pub fn build(mut self) -> Result<AreaSearchCache> {
        self.config.check()?;

        let provider = match (self.provider.take(), self.provider_config.take()) {
            (Some(provider), _) => Some(provider),
            (None, Some(mut config)) => {
                if let Some(url) = self.base_url.take() {
                    config = config.with_base_url(url);
                }
                Some(Arc::new(OpenCellIdClient::new(config)?) as Arc<dyn TowerProvider>)
            }
            (None, None) => None,
        };

        let (store, quota_store) = self.open_stores()?;

        Ok(AreaSearchCache {
            merger: MergeEngine::new(store.clone()),
            quota: QuotaTracker::new(quota_store, self.config.daily_limit),
            store,
            provider,
            config: self.config,
            counters: Counters::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::BoundingBox;
    use crate::model::{Observation, RadioType, TowerKey};
    use chrono::TimeZone;

    const SF_LAT: f64 = 37.7749;
    const SF_LON: f64 = -122.4194;

    /// Provider that reports `per_call` new towers at the center of each tile.
    struct FakeProvider {
        calls: AtomicU64,
        per_call: u64,
    }

    impl FakeProvider {
        fn new(per_call: u64) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU64::new(0),
                per_call,
            })
        }

        fn calls(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TowerProvider for FakeProvider {
        fn fetch(&self, bbox: &BoundingBox) -> Vec<Observation> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let lat = (bbox.min_lat + bbox.max_lat) / 2.0;
            let lon = (bbox.min_lon + bbox.max_lon) / 2.0;
            (0..self.per_call)
                .map(|i| Observation {
                    key: TowerKey {
                        cell_id: call * 100 + i,
                        lac: 1,
                        mcc: 310,
                        mnc: 260,
                        radio: RadioType::Lte,
                    },
                    lat,
                    lon,
                    range_m: Some(1000),
                    signal_avg: None,
                    samples: Some(1),
                    operator: None,
                })
                .collect()
        }

        fn source(&self) -> &str {
            "fake"
        }
    }

    /// Provider that reports the same single tower for every tile.
    struct RepeatingProvider;

    impl TowerProvider for RepeatingProvider {
        fn fetch(&self, _: &BoundingBox) -> Vec<Observation> {
            vec![Observation {
                key: TowerKey {
                    cell_id: 1,
                    lac: 1,
                    mcc: 310,
                    mnc: 260,
                    radio: RadioType::Gsm,
                },
                lat: SF_LAT,
                lon: SF_LON,
                range_m: None,
                signal_avg: None,
                samples: None,
                operator: None,
            }]
        }

        fn source(&self) -> &str {
            "repeat"
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 1, 12, 0, 0).unwrap()
    }

    fn build(
        store: Arc<MemoryStore>,
        provider: Arc<FakeProvider>,
        limit: u32,
        tile_km: f64,
    ) -> AreaSearchCache {
        AreaSearchCacheBuilder::new()
            .store(store)
            .provider(provider)
            .daily_limit(limit)
            .tile_km(tile_km)
            .build()
            .unwrap()
    }

    fn seed(store: &MemoryStore, cell_id: u64, at: DateTime<Utc>) {
        let obs = Observation {
            key: TowerKey {
                cell_id,
                lac: 9,
                mcc: 310,
                mnc: 260,
                radio: RadioType::Umts,
            },
            lat: SF_LAT,
            lon: SF_LON,
            range_m: None,
            signal_avg: None,
            samples: None,
            operator: None,
        };
        store.upsert(&obs, "seed", at).unwrap();
    }

    #[test]
    fn test_quota_runs_out_mid_sweep() {
        let store = Arc::new(MemoryStore::new());
        let provider = FakeProvider::new(3);
        let cache = build(store.clone(), provider.clone(), 5, DEFAULT_TILE_KM);
        assert_eq!(cache.plan(SF_LAT, SF_LON, 10.0).tiles, 196);

        let result = cache.search_at(SF_LAT, SF_LON, 10.0, now()).unwrap();

        assert_eq!(provider.calls(), 5);
        assert_eq!(result.count, 15);
        assert_eq!(result.towers.len(), 15);
        assert!(!result.cached);
        assert!(!result.rate_limited);
        assert_eq!(cache.quota().usage_on(now().date_naive()).calls, 5);
        assert!(result.message.unwrap().contains("5 of 196"));
    }

    #[test]
    fn test_repeat_search_served_from_cache() {
        let store = Arc::new(MemoryStore::new());
        let provider = FakeProvider::new(3);
        let cache = build(store, provider.clone(), 1000, 2.0);

        let first = cache.search_at(SF_LAT, SF_LON, 3.0, now()).unwrap();
        let calls = provider.calls();
        assert!(!first.cached);
        assert_eq!(first.count as u64, calls * 3);

        let second = cache
            .search_at(SF_LAT, SF_LON, 3.0, now() + Duration::seconds(1))
            .unwrap();
        assert!(second.cached);
        assert!(!second.rate_limited);
        assert_eq!(second.towers, first.towers);
        assert_eq!(provider.calls(), calls);
    }

    #[test]
    fn test_fresh_cache_skips_provider() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 1, now() - Duration::hours(1));
        let provider = FakeProvider::new(3);
        let cache = build(store, provider.clone(), 1000, 1.5);

        let result = cache.search_at(SF_LAT, SF_LON, 10.0, now()).unwrap();
        assert!(result.cached);
        assert_eq!(result.count, 1);
        assert_eq!(provider.calls(), 0);
        assert_eq!(cache.stats().fresh_hits, 1);
    }

    #[test]
    fn test_stale_cache_triggers_fetch() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 1, now() - Duration::hours(25));
        let provider = FakeProvider::new(1);
        let cache = build(store, provider.clone(), 1000, 2.0);

        let result = cache.search_at(SF_LAT, SF_LON, 1.0, now()).unwrap();
        assert!(!result.cached);
        assert_eq!(provider.calls(), 1);
        // Seeded tower is still returned alongside the fetched one
        assert_eq!(result.count, 2);
    }

    #[test]
    fn test_freshness_boundary_is_inclusive() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 1, now() - Duration::hours(24));
        let provider = FakeProvider::new(1);
        let cache = build(store, provider.clone(), 1000, 2.0);

        let result = cache.search_at(SF_LAT, SF_LON, 1.0, now()).unwrap();
        assert!(result.cached);
        assert_eq!(provider.calls(), 0);
    }

    #[test]
    fn test_spent_quota_returns_rate_limited_without_increment() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 1, now() - Duration::days(3));
        let provider = FakeProvider::new(3);
        let cache = build(store, provider.clone(), 2, 2.0);
        let today = now().date_naive();
        cache.quota().record_call_on(today);
        cache.quota().record_call_on(today);

        let result = cache.search_at(SF_LAT, SF_LON, 5.0, now()).unwrap();
        assert!(result.cached);
        assert!(result.rate_limited);
        assert_eq!(result.count, 1);
        assert_eq!(provider.calls(), 0);
        assert_eq!(cache.quota().usage_on(today).calls, 2);
        assert_eq!(cache.stats().rate_limited, 1);
    }

    #[test]
    fn test_no_provider_is_cache_only() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 1, now() - Duration::days(3));
        let cache = AreaSearchCacheBuilder::new()
            .store(store)
            .api_key("   ")
            .build()
            .unwrap();

        let result = cache.search_at(SF_LAT, SF_LON, 5.0, now()).unwrap();
        assert!(result.cached);
        assert!(!result.rate_limited);
        assert_eq!(result.count, 1);
        assert_eq!(result.message.as_deref(), Some(NO_API_KEY_MESSAGE));
        assert!(!cache.has_provider());
    }

    #[test]
    fn test_empty_area_without_provider() {
        let cache = AreaSearchCacheBuilder::new().build().unwrap();
        let result = cache.search_at(0.0, 0.0, 5.0, now()).unwrap();
        assert_eq!(result.count, 0);
        assert!(result.cached);
    }

    #[test]
    fn test_overlapping_tiles_merge_once() {
        let cache = AreaSearchCacheBuilder::new()
            .provider(Arc::new(RepeatingProvider))
            .tile_km(2.0)
            .build()
            .unwrap();

        let result = cache.search_at(SF_LAT, SF_LON, 3.0, now()).unwrap();
        assert_eq!(result.count, 1);
        assert_eq!(result.towers[0].source, "repeat");
        assert_eq!(cache.status().unwrap().total_towers, 1);
    }

    #[test]
    fn test_parallel_workers_respect_quota() {
        let store = Arc::new(MemoryStore::new());
        let provider = FakeProvider::new(2);
        let cache = AreaSearchCacheBuilder::new()
            .store(store)
            .provider(provider.clone())
            .daily_limit(7)
            .tile_km(2.0)
            .fetch_workers(4)
            .build()
            .unwrap();

        let result = cache.search_at(SF_LAT, SF_LON, 10.0, now()).unwrap();
        assert_eq!(provider.calls(), 7);
        assert_eq!(result.count, 14);
        assert_eq!(cache.quota().usage_on(now().date_naive()).calls, 7);
    }

    #[test]
    fn test_parallel_workers_full_coverage() {
        let provider = FakeProvider::new(1);
        let cache = AreaSearchCacheBuilder::new()
            .provider(provider.clone())
            .tile_km(2.0)
            .fetch_workers(3)
            .build()
            .unwrap();

        let plan = cache.plan(SF_LAT, SF_LON, 4.0);
        let result = cache.search_at(SF_LAT, SF_LON, 4.0, now()).unwrap();
        assert_eq!(provider.calls() as usize, plan.tiles);
        assert_eq!(result.count, plan.tiles);
        assert!(result.message.is_none());
    }

    #[test]
    fn test_concurrent_searches_share_quota() {
        let provider = FakeProvider::new(1);
        let cache = AreaSearchCacheBuilder::new()
            .provider(provider.clone())
            .daily_limit(10)
            .tile_km(2.0)
            .build()
            .unwrap();

        thread::scope(|s| {
            for i in 0..4 {
                let cache = &cache;
                s.spawn(move || {
                    cache
                        .search_at(SF_LAT + i as f64, SF_LON, 10.0, now())
                        .unwrap();
                });
            }
        });

        assert_eq!(provider.calls(), 10);
        assert_eq!(cache.quota().usage_on(now().date_naive()).calls, 10);
    }

    #[test]
    fn test_status_and_stats() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 1, now());
        seed(&store, 2, now());
        let provider = FakeProvider::new(1);
        let cache = build(store, provider, 100, 1.5);

        cache.search_at(SF_LAT, SF_LON, 5.0, now()).unwrap();
        let status = cache.status().unwrap();
        assert_eq!(status.total_towers, 2);
        assert_eq!(status.towers_by_radio.get("UMTS"), Some(&2));
        assert_eq!(status.api_daily_limit, 100);
        assert!(status.api_key_configured);

        let stats = cache.stats();
        assert_eq!(stats.searches, 1);
        assert_eq!(stats.fresh_hits, 1);
        assert_eq!(stats.cache_rate(), 1.0);
    }

    #[test]
    fn test_tower_lookup() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 42, now());
        let cache = AreaSearchCacheBuilder::new().store(store).build().unwrap();

        let tower = cache.tower(1).unwrap().unwrap();
        assert_eq!(tower.cell_id, 42);
        assert!(cache.tower(2).unwrap().is_none());
    }

    #[test]
    fn test_validate_uses_configured_bounds() {
        let cache = AreaSearchCacheBuilder::new()
            .radius_bounds(RadiusBounds {
                min_km: 2.0,
                max_km: 5.0,
            })
            .build()
            .unwrap();
        assert!(cache.validate(10.0, 10.0, Some(6.0)).is_err());
        assert_eq!(cache.validate(10.0, 10.0, Some(3.0)).unwrap().radius_km, 3.0);
    }

    #[test]
    fn test_build_rejects_bad_config() {
        assert!(AreaSearchCacheBuilder::new().tile_km(2.5).build().is_err());
        assert!(AreaSearchCacheBuilder::new().tile_km(0.0).build().is_err());
        assert!(AreaSearchCacheBuilder::new().fetch_workers(0).build().is_err());
        assert!(AreaSearchCacheBuilder::new().freshness_hours(-1).build().is_err());
        assert!(AreaSearchCacheBuilder::new().freshness_hours(i64::MIN).build().is_err());
        assert!(AreaSearchCacheBuilder::new().freshness_hours(i64::MAX).build().is_ok());
        assert!(AreaSearchCacheBuilder::new()
            .radius_bounds(RadiusBounds {
                min_km: 10.0,
                max_km: 5.0
            })
            .build()
            .is_err());
        assert!(AreaSearchCacheBuilder::new().tile_km(2.0).build().is_ok());
    }

    /// Provider that returns nothing for every other tile.
    #[derive(Default)]
    struct FlakyProvider {
        calls: AtomicU64,
    }

    impl TowerProvider for FlakyProvider {
        fn fetch(&self, bbox: &BoundingBox) -> Vec<Observation> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call % 2 == 1 {
                return Vec::new();
            }
            vec![Observation {
                key: TowerKey {
                    cell_id: call,
                    lac: 2,
                    mcc: 310,
                    mnc: 260,
                    radio: RadioType::Lte,
                },
                lat: (bbox.min_lat + bbox.max_lat) / 2.0,
                lon: (bbox.min_lon + bbox.max_lon) / 2.0,
                range_m: None,
                signal_avg: None,
                samples: None,
                operator: None,
            }]
        }

        fn source(&self) -> &str {
            "flaky"
        }
    }

    /// Store whose quota reads as available but refuses every acquire, as
    /// when a concurrent search takes the last unit.
    #[derive(Default)]
    struct RacedQuotaStore {
        inner: MemoryStore,
    }

    impl TowerStore for RacedQuotaStore {
        fn find_in_box(&self, bbox: &BoundingBox) -> Result<Vec<TowerRecord>> {
            self.inner.find_in_box(bbox)
        }
        fn upsert(
            &self,
            obs: &Observation,
            source: &str,
            now: DateTime<Utc>,
        ) -> Result<crate::store::UpsertOutcome> {
            self.inner.upsert(obs, source, now)
        }
        fn get(&self, id: u64) -> Result<Option<TowerRecord>> {
            self.inner.get(id)
        }
        fn count(&self) -> Result<u64> {
            self.inner.count()
        }
        fn count_by_radio(&self) -> Result<BTreeMap<RadioType, u64>> {
            self.inner.count_by_radio()
        }
    }

    impl QuotaStore for RacedQuotaStore {
        fn calls_on(&self, _: NaiveDate) -> Result<u32> {
            Ok(0)
        }
        fn increment(&self, date: NaiveDate) -> Result<u32> {
            self.inner.increment(date)
        }
        fn try_increment(&self, _: NaiveDate, _: u32) -> Result<Option<u32>> {
            Ok(None)
        }
    }

    #[test]
    fn test_huge_freshness_window_treats_all_as_fresh() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 1, now() - Duration::days(365));
        let provider = FakeProvider::new(1);
        let cache = AreaSearchCacheBuilder::new()
            .store(store)
            .provider(provider.clone())
            .freshness_hours(10_000_000_000)
            .build()
            .unwrap();

        let result = cache.search_at(SF_LAT, SF_LON, 5.0, now()).unwrap();
        assert!(result.cached);
        assert_eq!(result.count, 1);
        assert_eq!(provider.calls(), 0);

        // Empty area with an unbounded window still goes to the provider
        let result = cache.search_at(0.0, 0.0, 1.0, now()).unwrap();
        assert!(!result.cached);
        assert_eq!(provider.calls() as usize, cache.plan(0.0, 0.0, 1.0).tiles);
    }

    #[test]
    fn test_quota_taken_before_first_tile_is_rate_limited() {
        let store = Arc::new(RacedQuotaStore::default());
        seed(&store.inner, 1, now() - Duration::days(3));
        let provider = FakeProvider::new(3);
        let cache = AreaSearchCacheBuilder::new()
            .store(store)
            .provider(provider.clone())
            .tile_km(2.0)
            .build()
            .unwrap();

        let result = cache.search_at(SF_LAT, SF_LON, 3.0, now()).unwrap();
        assert!(result.cached);
        assert!(result.rate_limited);
        assert_eq!(result.count, 1);
        assert!(result.message.is_none());
        assert_eq!(provider.calls(), 0);

        let stats = cache.stats();
        assert_eq!(stats.rate_limited, 1);
        assert_eq!(stats.fetches, 0);
    }

    #[test]
    fn test_empty_tiles_consume_quota_and_sweep_continues() {
        let provider = Arc::new(FlakyProvider::default());
        let cache = AreaSearchCacheBuilder::new()
            .provider(provider.clone())
            .tile_km(2.0)
            .build()
            .unwrap();
        let tiles = cache.plan(SF_LAT, SF_LON, 3.0).tiles;
        assert_eq!(tiles, 9);

        let result = cache.search_at(SF_LAT, SF_LON, 3.0, now()).unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 9);
        assert_eq!(cache.quota().usage_on(now().date_naive()).calls, 9);
        assert!(!result.cached);
        assert!(result.message.is_none());

        // Only tiles 0, 2, 4, 6 and 8 returned a tower
        let mut ids: Vec<u64> = result.towers.iter().map(|t| t.cell_id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![0, 2, 4, 6, 8]);
        assert!(result.towers.iter().all(|t| t.source == "flaky"));
    }

    #[test]
    fn test_search_result_serialization() {
        let result = SearchResult::new(Vec::new(), true, false);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["count"], 0);
        assert_eq!(json["cached"], true);
        assert_eq!(json["rate_limited"], false);
        assert!(json.get("message").is_none());

        let json = serde_json::to_value(result.with_message("note")).unwrap();
        assert_eq!(json["message"], "note");
    }
}
