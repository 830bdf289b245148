//! Persistence for cached towers and daily quota counters.
//!
//! The search engine only needs a key-indexed table with bounding-box range
//! queries and a per-day counter, expressed as the [`TowerStore`] and
//! [`QuotaStore`] traits. Two backends implement both:
//!
//! - [`MemoryStore`]: process-local, used by tests and when no database path
//!   is configured.
//! - `SqliteStore` (feature `sqlite`): a single SQLite file with a unique
//!   identity constraint and a coordinate index.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::Result;
use crate::geo::BoundingBox;
use crate::model::{Observation, RadioType, TowerRecord};

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

/// What an upsert did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A new record was created with this id.
    Inserted(u64),
    /// The record with this id was updated in place.
    Updated(u64),
}

impl UpsertOutcome {
    /// Id of the affected record.
    pub fn id(&self) -> u64 {
        match self {
            UpsertOutcome::Inserted(id) | UpsertOutcome::Updated(id) => *id,
        }
    }
}

/// Tower table keyed by [`crate::model::TowerKey`].
///
/// Implementations must make [`TowerStore::upsert`] atomic per identity key:
/// two concurrent upserts of the same unseen key produce one record.
pub trait TowerStore: Send + Sync {
    /// All towers whose position lies within `bbox` (edges included), ordered by id.
    fn find_in_box(&self, bbox: &BoundingBox) -> Result<Vec<TowerRecord>>;

    /// Insert a tower for a new key, or update the existing one in place.
    fn upsert(&self, obs: &Observation, source: &str, now: DateTime<Utc>)
        -> Result<UpsertOutcome>;

    /// Look up a tower by its store id.
    fn get(&self, id: u64) -> Result<Option<TowerRecord>>;

    /// Total number of towers.
    fn count(&self) -> Result<u64>;

    /// Number of towers per radio type.
    fn count_by_radio(&self) -> Result<BTreeMap<RadioType, u64>>;
}

/// Daily call counters keyed by UTC date.
///
/// A date with no counter reads as zero. Increments for the same date are
/// serialized so no update is lost.
pub trait QuotaStore: Send + Sync {
    /// Calls recorded on `date`.
    fn calls_on(&self, date: NaiveDate) -> Result<u32>;

    /// Record one call on `date`, returning the new count.
    fn increment(&self, date: NaiveDate) -> Result<u32>;

    /// Record one call on `date` only if fewer than `limit` were recorded.
    ///
    /// Returns the new count, or `None` when the limit was already reached.
    fn try_increment(&self, date: NaiveDate, limit: u32) -> Result<Option<u32>>;
}
