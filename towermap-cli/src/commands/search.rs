use anyhow::{Context, Result};
use towermap::geojson::towers_to_feature_collection;
use towermap::{SearchResult, TowerRecord};

use super::{open_cache, validated, CacheOptions};

pub fn run(
    options: &CacheOptions,
    lat: f64,
    lon: f64,
    radius: f64,
    json: bool,
    geojson: bool,
) -> Result<()> {
    let cache = open_cache(options)?;
    let params = validated(&cache, lat, lon, radius)?;

    let result = cache
        .search(params.lat, params.lon, params.radius_km)
        .context("Search failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if geojson {
        println!("{}", towers_to_feature_collection(&result.towers));
    } else {
        print_summary(&result);
        for tower in &result.towers {
            println!("{}", tower_line(tower));
        }
    }

    Ok(())
}

fn print_summary(result: &SearchResult) {
    let origin = if result.rate_limited {
        "cache, daily limit reached"
    } else if result.cached {
        "cache"
    } else {
        "OpenCelliD"
    };
    println!("{} towers ({})", result.count, origin);
    if let Some(message) = &result.message {
        println!("note: {}", message);
    }
}

/// One-line tower summary: id, radio, network and position.
pub fn tower_line(tower: &TowerRecord) -> String {
    let range = tower
        .range_m
        .map(|r| format!("{}m", r))
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{:>7}  {:<4}  {}-{}  lac {:<6} cell {:<10} {:.6},{:.6}  range {}",
        tower.id,
        tower.radio.as_str(),
        tower.mcc,
        tower.mnc,
        tower.lac,
        tower.cell_id,
        tower.lat,
        tower.lon,
        range
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use towermap::{Observation, RadioType, TowerKey};

    #[test]
    fn test_tower_line() {
        let obs = Observation {
            key: TowerKey {
                cell_id: 555,
                lac: 12,
                mcc: 310,
                mnc: 260,
                radio: RadioType::Umts,
            },
            lat: 37.7749,
            lon: -122.4194,
            range_m: None,
            signal_avg: None,
            samples: None,
            operator: None,
        };
        let tower = TowerRecord::from_observation(3, &obs, "opencellid", Utc::now());

        let line = tower_line(&tower);
        assert!(line.contains("UMTS"));
        assert!(line.contains("310-260"));
        assert!(line.contains("37.774900,-122.419400"));
        assert!(line.ends_with("range -"));
    }
}
