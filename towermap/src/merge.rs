//! Reconciliation of fetched observations with the tower store.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{Observation, TowerKey};
use crate::store::{TowerStore, UpsertOutcome};

/// Observations gathered during one multi-tile fetch, unique by [`TowerKey`].
///
/// Adjacent tiles share edges, so a cell on a boundary can be reported
/// twice. The first observation of a key is kept.
#[derive(Debug, Default)]
pub struct ObservationSet {
    seen: HashSet<TowerKey>,
    items: Vec<Observation>,
    duplicates: usize,
}

impl ObservationSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observation. Returns `false` if its key was already present.
    pub fn insert(&mut self, obs: Observation) -> bool {
        if !self.seen.insert(obs.key) {
            self.duplicates += 1;
            return false;
        }
        self.items.push(obs);
        true
    }

    /// Number of unique observations.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether no observation was added.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of observations rejected as duplicates.
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    /// Unique observations in insertion order.
    pub fn as_slice(&self) -> &[Observation] {
        &self.items
    }
}

impl Extend<Observation> for ObservationSet {
    fn extend<I: IntoIterator<Item = Observation>>(&mut self, iter: I) {
        for obs in iter {
            self.insert(obs);
        }
    }
}

/// Counts from one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Towers created.
    pub inserted: u64,
    /// Existing towers updated in place.
    pub updated: u64,
}

/// Applies observations to a [`TowerStore`] with insert-or-update semantics.
///
/// Merging the same observations again leaves the store in the same state,
/// apart from `updated_at`.
#[derive(Clone)]
pub struct MergeEngine {
    store: Arc<dyn TowerStore>,
}

impl MergeEngine {
    /// Create an engine writing to `store`.
    pub fn new(store: Arc<dyn TowerStore>) -> Self {
        Self { store }
    }

    /// Upsert every observation, tagging new towers with `source`.
    pub fn merge(
        &self,
        observations: &[Observation],
        source: &str,
        now: DateTime<Utc>,
    ) -> Result<MergeStats> {
        let mut stats = MergeStats::default();
        for obs in observations {
            match self.store.upsert(obs, source, now)? {
                UpsertOutcome::Inserted(_) => stats.inserted += 1,
                UpsertOutcome::Updated(_) => stats.updated += 1,
            }
        }
        tracing::debug!(
            inserted = stats.inserted,
            updated = stats.updated,
            source,
            "Merged observations"
        );
        Ok(stats)
    }
}
