use std::sync::Arc;

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use towermap::merge::MergeEngine;
use towermap::store::MemoryStore;
use towermap::tiler::tile;
use towermap::{AreaSearchCacheBuilder, Observation, RadioType, TowerKey};

const SF_LAT: f64 = 37.7749;
const SF_LON: f64 = -122.4194;

/// Synthetic observations on a regular grid around San Francisco.
fn observations(count: u64) -> Vec<Observation> {
    (0..count)
        .map(|i| Observation {
            key: TowerKey {
                cell_id: i,
                lac: (i % 50) as u32,
                mcc: 310,
                mnc: 260,
                radio: RadioType::Lte,
            },
            lat: SF_LAT - 0.05 + (i % 100) as f64 * 0.001,
            lon: SF_LON - 0.05 + (i / 100) as f64 * 0.001,
            range_m: Some(1000),
            signal_avg: Some(-80),
            samples: Some(3),
            operator: None,
        })
        .collect()
}

fn bench_tiling(c: &mut Criterion) {
    c.bench_function("tile_50km_radius", |b| {
        b.iter(|| {
            let tiles = tile(black_box(SF_LAT), black_box(SF_LON), black_box(50.0), 1.5);
            black_box(tiles.count());
        });
    });
}

fn bench_merge(c: &mut Criterion) {
    let batch = observations(1000);

    c.bench_function("merge_1000_into_empty", |b| {
        b.iter(|| {
            let engine = MergeEngine::new(Arc::new(MemoryStore::new()));
            black_box(engine.merge(black_box(&batch), "bench", Utc::now()).unwrap());
        });
    });

    let engine = MergeEngine::new(Arc::new(MemoryStore::new()));
    engine.merge(&batch, "bench", Utc::now()).unwrap();

    c.bench_function("merge_1000_existing", |b| {
        b.iter(|| {
            black_box(engine.merge(black_box(&batch), "bench", Utc::now()).unwrap());
        });
    });
}

fn bench_cached_search(c: &mut Criterion) {
    let store = Arc::new(MemoryStore::new());
    MergeEngine::new(store.clone())
        .merge(&observations(10_000), "bench", Utc::now())
        .unwrap();
    let cache = AreaSearchCacheBuilder::new().store(store).build().unwrap();

    c.bench_function("search_fresh_10k_towers", |b| {
        b.iter(|| {
            black_box(
                cache
                    .search(black_box(SF_LAT), black_box(SF_LON), 5.0)
                    .unwrap(),
            );
        });
    });
}

criterion_group!(benches, bench_tiling, bench_merge, bench_cached_search);
criterion_main!(benches);
