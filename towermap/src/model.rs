//! Tower records and the typed observations that feed them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Radio access technology of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RadioType {
    Gsm,
    Umts,
    Lte,
    Cdma,
    Nr,
}

impl RadioType {
    /// Wire name, as used by the provider and stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            RadioType::Gsm => "GSM",
            RadioType::Umts => "UMTS",
            RadioType::Lte => "LTE",
            RadioType::Cdma => "CDMA",
            RadioType::Nr => "NR",
        }
    }
}

impl fmt::Display for RadioType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RadioType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GSM" => Ok(RadioType::Gsm),
            "UMTS" => Ok(RadioType::Umts),
            "LTE" => Ok(RadioType::Lte),
            "CDMA" => Ok(RadioType::Cdma),
            "NR" => Ok(RadioType::Nr),
            other => Err(format!("unknown radio type: {other}")),
        }
    }
}

/// Identity of a physical cell. Two observations with the same key describe
/// the same transmitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TowerKey {
    pub cell_id: u64,
    pub lac: u32,
    pub mcc: u16,
    pub mnc: u16,
    pub radio: RadioType,
}

/// One cell as reported by the provider for a single tile, already typed.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub key: TowerKey,
    pub lat: f64,
    pub lon: f64,
    /// Estimated coverage range in meters.
    pub range_m: Option<u32>,
    /// Average signal strength (dBm or ASU, as reported).
    pub signal_avg: Option<i32>,
    /// Number of measurements behind the estimate.
    pub samples: Option<u32>,
    /// Network operator name, when known.
    pub operator: Option<String>,
}

/// A cached cell tower.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TowerRecord {
    /// Store-assigned id, stable for the lifetime of the record.
    pub id: u64,
    pub cell_id: u64,
    pub lac: u32,
    pub mcc: u16,
    pub mnc: u16,
    pub lat: f64,
    pub lon: f64,
    pub radio: RadioType,
    pub range_m: Option<u32>,
    pub signal_avg: Option<i32>,
    pub samples: Option<u32>,
    pub operator: Option<String>,
    /// Tag of the provider that first reported this tower.
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TowerRecord {
    /// Build a fresh record from a first observation.
    pub fn from_observation(id: u64, obs: &Observation, source: &str, now: DateTime<Utc>) -> Self {
        Self {
            id,
            cell_id: obs.key.cell_id,
            lac: obs.key.lac,
            mcc: obs.key.mcc,
            mnc: obs.key.mnc,
            lat: obs.lat,
            lon: obs.lon,
            radio: obs.key.radio,
            range_m: obs.range_m,
            signal_avg: obs.signal_avg,
            samples: obs.samples,
            operator: obs.operator.clone(),
            source: source.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Identity key of this record.
    pub fn key(&self) -> TowerKey {
        TowerKey {
            cell_id: self.cell_id,
            lac: self.lac,
            mcc: self.mcc,
            mnc: self.mnc,
            radio: self.radio,
        }
    }

    /// Apply a re-observation in place.
    ///
    /// Position is always replaced; optional attributes are only replaced
    /// when the observation carries them.
    pub fn apply(&mut self, obs: &Observation, now: DateTime<Utc>) {
        self.lat = obs.lat;
        self.lon = obs.lon;
        if obs.range_m.is_some() {
            self.range_m = obs.range_m;
        }
        if obs.signal_avg.is_some() {
            self.signal_avg = obs.signal_avg;
        }
        if obs.samples.is_some() {
            self.samples = obs.samples;
        }
        if obs.operator.is_some() {
            self.operator = obs.operator.clone();
        }
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn obs(cell_id: u64) -> Observation {
        Observation {
            key: TowerKey {
                cell_id,
                lac: 7,
                mcc: 310,
                mnc: 260,
                radio: RadioType::Lte,
            },
            lat: 37.77,
            lon: -122.42,
            range_m: Some(1200),
            signal_avg: Some(-85),
            samples: Some(4),
            operator: None,
        }
    }

    #[test]
    fn test_radio_type_parse() {
        assert_eq!("GSM".parse::<RadioType>(), Ok(RadioType::Gsm));
        assert_eq!("lte".parse::<RadioType>(), Ok(RadioType::Lte));
        assert_eq!(" NR ".parse::<RadioType>(), Ok(RadioType::Nr));
        assert!("WIMAX".parse::<RadioType>().is_err());
    }

    #[test]
    fn test_radio_type_serde_uppercase() {
        let json = serde_json::to_string(&RadioType::Umts).unwrap();
        assert_eq!(json, "\"UMTS\"");
        let radio: RadioType = serde_json::from_str("\"CDMA\"").unwrap();
        assert_eq!(radio, RadioType::Cdma);
    }

    #[test]
    fn test_from_observation_round_trips_key() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let o = obs(42);
        let record = TowerRecord::from_observation(1, &o, "opencellid", now);
        assert_eq!(record.key(), o.key);
        assert_eq!(record.created_at, now);
        assert_eq!(record.updated_at, now);
        assert_eq!(record.source, "opencellid");
    }

    #[test]
    fn test_apply_keeps_missing_optionals() {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap();
        let mut record = TowerRecord::from_observation(1, &obs(42), "opencellid", t0);

        let mut update = obs(42);
        update.lat = 37.78;
        update.range_m = None;
        update.samples = Some(9);
        update.operator = Some("T-Mobile".to_string());
        record.apply(&update, t1);

        assert_eq!(record.lat, 37.78);
        assert_eq!(record.range_m, Some(1200));
        assert_eq!(record.samples, Some(9));
        assert_eq!(record.operator.as_deref(), Some("T-Mobile"));

        update.operator = None;
        record.apply(&update, t1);
        assert_eq!(record.operator.as_deref(), Some("T-Mobile"));
        assert_eq!(record.created_at, t0);
        assert_eq!(record.updated_at, t1);
    }
}
