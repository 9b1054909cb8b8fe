//! テスト用音声を用いたユニット選択のベンチマーク
//!
//! 特徴量インデックスによる候補取得で、ビーム幅なしと幅1のビーム探索の速度を計測します。

use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use unitsel::{SelectorConfig, UnitDatabaseBuilder, UnitSelector, Voice};

const SCHEMA_DEF: &str = include_str!("../src/tests/resources/schema.def");
const UNITS_CSV: &str = include_str!("../src/tests/resources/units.csv");
const JOIN_WEIGHTS_DEF: &str = include_str!("../src/tests/resources/join_weights.def");
const JOIN_CSV: &str = include_str!("../src/tests/resources/join.csv");

const UTTERANCE: [[&str; 6]; 6] = [
    ["_", "no", "k", "0", "0", "1000"],
    ["k", "no", "a", "kasa", "112", "580"],
    ["a", "yes", "s", "kasa", "128", "880"],
    ["s", "no", "a", "kasa", "121", "690"],
    ["a", "no", "_", "kasa", "99", "810"],
    ["_", "no", "0", "0", "0", "1000"],
];

fn bench_selection(c: &mut Criterion) {
    let db = UnitDatabaseBuilder::from_readers(
        SCHEMA_DEF.as_bytes(),
        UNITS_CSV.as_bytes(),
        JOIN_WEIGHTS_DEF.as_bytes(),
        JOIN_CSV.as_bytes(),
        &["phone"],
    )
    .expect("Failed to build the test voice");
    let voice = Arc::new(Voice::new(db));

    let repeat = 50;
    let mut group = c.benchmark_group("Unit Selection");
    group.throughput(Throughput::Elements((UTTERANCE.len() * repeat) as u64));
    group.warm_up_time(Duration::from_secs(3));
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(20);

    for (name, beam) in [("Exact", None), ("Beam-1", Some(1))] {
        let config = SelectorConfig {
            beam_width: beam,
            ..Default::default()
        };
        let selector = UnitSelector::new(voice.clone(), config).expect("Invalid config");

        group.bench_function(BenchmarkId::new(name, repeat), |b| {
            b.iter_with_setup(
                || selector.new_worker(),
                |mut worker| {
                    for _ in 0..repeat {
                        for target in &UTTERANCE {
                            worker.push_target_raw(target).unwrap();
                        }
                    }
                    worker.select().unwrap();
                    worker.total_cost()
                },
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_selection);
criterion_main!(benches);
