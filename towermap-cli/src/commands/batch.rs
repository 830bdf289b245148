use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use towermap::AreaSearchCache;

use super::{open_cache, CacheOptions};

/// Columns appended to every input row.
const RESULT_COLUMNS: [&str; 4] = ["tower_count", "cached", "rate_limited", "message"];

/// Totals over one batch run.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub rows: u64,
    pub towers: u64,
    pub cached: u64,
    pub rate_limited: u64,
    pub invalid: u64,
}

pub fn run(
    options: &CacheOptions,
    input: PathBuf,
    output: Option<PathBuf>,
    lat_col: String,
    lon_col: String,
    radius: f64,
) -> Result<()> {
    let cache = open_cache(options)?;

    let output_path = output.unwrap_or_else(|| {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "batch".to_string());
        input.with_file_name(format!("{}_towers.csv", stem))
    });

    let summary = process_csv(&cache, &input, &output_path, &lat_col, &lon_col, radius, true)?;

    println!(
        "{} rows, {} towers ({} from cache, {} rate limited, {} invalid)",
        summary.rows, summary.towers, summary.cached, summary.rate_limited, summary.invalid
    );
    println!("Output written to: {}", output_path.display());
    Ok(())
}

/// Run one search per CSV row and write the input rows with result columns.
pub fn process_csv(
    cache: &AreaSearchCache,
    input: &Path,
    output: &Path,
    lat_col: &str,
    lon_col: &str,
    radius: f64,
    progress: bool,
) -> Result<BatchSummary> {
    let file = File::open(input).context("Failed to open input file")?;
    let mut reader = csv::Reader::from_reader(BufReader::new(file));

    // Find column indices
    let headers = reader.headers()?.clone();
    let lat_idx = headers
        .iter()
        .position(|h| h == lat_col)
        .with_context(|| format!("Column '{}' not found in CSV", lat_col))?;
    let lon_idx = headers
        .iter()
        .position(|h| h == lon_col)
        .with_context(|| format!("Column '{}' not found in CSV", lon_col))?;

    // Collect records for progress bar
    let records: Vec<_> = reader.records().collect::<Result<_, _>>()?;

    let pb = if progress {
        ProgressBar::new(records.len() as u64)
    } else {
        ProgressBar::hidden()
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
            )?
            .progress_chars("#>-"),
    );

    let output_file = File::create(output).context("Failed to create output file")?;
    let mut writer = csv::Writer::from_writer(BufWriter::new(output_file));

    let mut new_headers: Vec<&str> = headers.iter().collect();
    new_headers.extend(RESULT_COLUMNS);
    writer.write_record(&new_headers)?;

    let mut summary = BatchSummary::default();
    for (row, record) in records.iter().enumerate() {
        let line = row + 2;
        let lat: f64 = record
            .get(lat_idx)
            .with_context(|| format!("Missing latitude on line {}", line))?
            .trim()
            .parse()
            .with_context(|| format!("Invalid latitude on line {}", line))?;
        let lon: f64 = record
            .get(lon_idx)
            .with_context(|| format!("Missing longitude on line {}", line))?
            .trim()
            .parse()
            .with_context(|| format!("Invalid longitude on line {}", line))?;

        let columns: [String; 4] = match cache.validate(lat, lon, Some(radius)) {
            Ok(params) => {
                let result = cache
                    .search(params.lat, params.lon, params.radius_km)
                    .with_context(|| format!("Search failed on line {}", line))?;
                summary.towers += result.count as u64;
                summary.cached += u64::from(result.cached);
                summary.rate_limited += u64::from(result.rate_limited);
                [
                    result.count.to_string(),
                    result.cached.to_string(),
                    result.rate_limited.to_string(),
                    result.message.unwrap_or_default(),
                ]
            }
            Err(errors) => {
                summary.invalid += 1;
                [String::new(), String::new(), String::new(), errors.join("; ")]
            }
        };
        summary.rows += 1;

        let mut new_record: Vec<&str> = record.iter().collect();
        new_record.extend(columns.iter().map(String::as_str));
        writer.write_record(&new_record)?;

        pb.inc(1);
    }

    pb.finish_with_message("done");
    writer.flush()?;

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;
    use tempfile::TempDir;
    use towermap::merge::MergeEngine;
    use towermap::store::MemoryStore;
    use towermap::{AreaSearchCacheBuilder, Observation, RadioType, TowerKey};

    fn seeded_cache() -> AreaSearchCache {
        let store = Arc::new(MemoryStore::new());
        let obs: Vec<Observation> = (0..3)
            .map(|i| Observation {
                key: TowerKey {
                    cell_id: i,
                    lac: 1,
                    mcc: 234,
                    mnc: 30,
                    radio: RadioType::Gsm,
                },
                lat: 51.5074 + i as f64 * 0.001,
                lon: -0.1278,
                range_m: None,
                signal_avg: None,
                samples: None,
                operator: None,
            })
            .collect();
        MergeEngine::new(store.clone())
            .merge(&obs, "opencellid", Utc::now())
            .unwrap();
        AreaSearchCacheBuilder::new().store(store).build().unwrap()
    }

    #[test]
    fn test_process_csv_appends_result_columns() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("points.csv");
        let output = dir.path().join("out.csv");
        std::fs::write(
            &input,
            "name,latitude,longitude\nlondon,51.5074,-0.1278\nnowhere,0.0,0.0\nbad,95.0,0.0\n",
        )
        .unwrap();

        let summary = process_csv(
            &seeded_cache(),
            &input,
            &output,
            "latitude",
            "longitude",
            5.0,
            false,
        )
        .unwrap();

        assert_eq!(
            summary,
            BatchSummary {
                rows: 3,
                towers: 3,
                cached: 2,
                rate_limited: 0,
                invalid: 1,
            }
        );

        let mut reader = csv::Reader::from_path(&output).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.len(), 7);
        assert_eq!(&headers[3], "tower_count");

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(&rows[0][3], "3");
        assert_eq!(&rows[0][4], "true");
        assert_eq!(&rows[1][3], "0");
        assert!(rows[1][6].contains("No API key"));
        assert_eq!(&rows[2][3], "");
        assert!(rows[2][6].contains("Latitude"));
    }

    #[test]
    fn test_process_csv_missing_column() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("points.csv");
        std::fs::write(&input, "x,y\n1,2\n").unwrap();

        let err = process_csv(
            &seeded_cache(),
            &input,
            &dir.path().join("out.csv"),
            "lat",
            "lon",
            5.0,
            false,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Column 'lat' not found"));
    }

    #[test]
    fn test_process_csv_unparsable_coordinate() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("points.csv");
        std::fs::write(&input, "lat,lon\nabc,2\n").unwrap();

        let err = process_csv(
            &seeded_cache(),
            &input,
            &dir.path().join("out.csv"),
            "lat",
            "lon",
            5.0,
            false,
        )
        .unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }
}
