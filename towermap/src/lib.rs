//! # Towermap - Cached Cell Tower Area Search
//!
//! Library for answering "which cell towers are within R km of this point"
//! from a local store, topping it up from OpenCelliD under a daily call quota.
//!
//! ## Features
//!
//! - **Cache first**: Areas with recently updated towers are served without
//!   any provider call
//! - **Quota aware**: Provider calls are counted per UTC day and never exceed
//!   the configured ceiling, even across concurrent searches
//! - **Tiled fetches**: Large areas are split into tiles that fit the
//!   provider's per-query area limit
//! - **Degrades gracefully**: Missing credentials, a spent quota, or a failing
//!   provider still return whatever is cached
//!
//! ## Quick Start
//!
//! ```ignore
//! use towermap::AreaSearchCacheBuilder;
//!
//! // Reads OPENCELLID_API_KEY, TOWERMAP_DB, ... from the environment
//! let cache = AreaSearchCacheBuilder::from_env().build()?;
//!
//! let result = cache.search(37.7749, -122.4194, 10.0)?;
//! for tower in &result.towers {
//!     println!("{} {} at {},{}", tower.radio, tower.cell_id, tower.lat, tower.lon);
//! }
//! ```
//!
//! ## Storage
//!
//! Towers and quota counters live behind the [`store::TowerStore`] and
//! [`store::QuotaStore`] traits. [`store::MemoryStore`] is always available;
//! enable the `sqlite` feature for the persistent `SqliteStore`.
//!
//! ## Data Source
//!
//! Tower data comes from the OpenCelliD `getInArea` API:
//! - <https://opencellid.org/>
//! - <https://wiki.opencellid.org/wiki/API>

pub mod error;
pub mod geo;
pub mod merge;
pub mod model;
pub mod provider;
pub mod quota;
pub mod search;
pub mod store;
pub mod tiler;
pub mod validate;

#[cfg(feature = "geojson")]
pub mod geojson;

// Re-export main types at crate root for convenience
pub use error::{Result, TowerError};
pub use geo::BoundingBox;
pub use model::{Observation, RadioType, TowerKey, TowerRecord};
pub use provider::{OpenCellIdClient, ProviderConfig, TowerProvider};
pub use quota::{QuotaTracker, QuotaUsage};
pub use search::{
    AreaSearchCache, AreaSearchCacheBuilder, CacheStatus, SearchResult, SearchStats, TilePlan,
};
pub use validate::{RadiusBounds, SearchParams};
