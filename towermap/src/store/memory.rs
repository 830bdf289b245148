//! In-memory store.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, NaiveDate, Utc};

use super::{QuotaStore, TowerStore, UpsertOutcome};
use crate::error::{Result, TowerError};
use crate::geo::BoundingBox;
use crate::model::{Observation, RadioType, TowerKey, TowerRecord};

#[derive(Debug, Default)]
struct TowerTable {
    rows: BTreeMap<u64, TowerRecord>,
    by_key: HashMap<TowerKey, u64>,
    next_id: u64,
}

/// Process-local implementation of [`TowerStore`] and [`QuotaStore`].
///
/// Towers live behind one `RwLock`, so the key lookup and insert of an upsert
/// happen under the same write guard. Quota counters use a separate `Mutex`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    towers: RwLock<TowerTable>,
    quota: Mutex<HashMap<NaiveDate, u32>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> TowerError {
    TowerError::Store {
        reason: "memory store lock poisoned".to_string(),
    }
}

impl TowerStore for MemoryStore {
    fn find_in_box(&self, bbox: &BoundingBox) -> Result<Vec<TowerRecord>> {
        let table = self.towers.read().map_err(poisoned)?;
        Ok(table
            .rows
            .values()
            .filter(|t| bbox.contains(t.lat, t.lon))
            .cloned()
            .collect())
    }

    fn upsert(
        &self,
        obs: &Observation,
        source: &str,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome> {
        let mut table = self.towers.write().map_err(poisoned)?;

        if let Some(&id) = table.by_key.get(&obs.key) {
            if let Some(record) = table.rows.get_mut(&id) {
                record.apply(obs, now);
                return Ok(UpsertOutcome::Updated(id));
            }
        }

        table.next_id += 1;
        let id = table.next_id;
        table.by_key.insert(obs.key, id);
        table
            .rows
            .insert(id, TowerRecord::from_observation(id, obs, source, now));
        Ok(UpsertOutcome::Inserted(id))
    }

    fn get(&self, id: u64) -> Result<Option<TowerRecord>> {
        let table = self.towers.read().map_err(poisoned)?;
        Ok(table.rows.get(&id).cloned())
    }

    fn count(&self) -> Result<u64> {
        let table = self.towers.read().map_err(poisoned)?;
        Ok(table.rows.len() as u64)
    }

    fn count_by_radio(&self) -> Result<BTreeMap<RadioType, u64>> {
        let table = self.towers.read().map_err(poisoned)?;
        let mut counts = BTreeMap::new();
        for record in table.rows.values() {
            *counts.entry(record.radio).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

impl QuotaStore for MemoryStore {
    fn calls_on(&self, date: NaiveDate) -> Result<u32> {
        let mut quota = self.quota.lock().map_err(poisoned)?;
        Ok(*quota.entry(date).or_insert(0))
    }

    fn increment(&self, date: NaiveDate) -> Result<u32> {
        let mut quota = self.quota.lock().map_err(poisoned)?;
        let count = quota.entry(date).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    fn try_increment(&self, date: NaiveDate, limit: u32) -> Result<Option<u32>> {
        let mut quota = self.quota.lock().map_err(poisoned)?;
        let count = quota.entry(date).or_insert(0);
        if *count >= limit {
            return Ok(None);
        }
        *count += 1;
        Ok(Some(*count))
    }
}
