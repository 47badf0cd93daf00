//! Filter chain benchmarks

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use mx_core::{EngineConfig, FinalStage};
use mx_dsp::default_chain;

fn bench_default_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("default_chain");

    for stage in [FinalStage::SoftClip, FinalStage::GainDither] {
        let config = EngineConfig {
            final_stage: stage,
            ..EngineConfig::default()
        };
        let Ok(mut chain) = default_chain(&config) else {
            continue;
        };

        // 100ms of stereo at 48kHz, planar
        let frames = 4800;
        let mut buffer: Vec<Vec<f64>> = (0..2)
            .map(|_| (0..frames).map(|i| (i as f64 * 0.01).sin() * 0.8).collect())
            .collect();

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{:?}", stage)),
            &stage,
            |b, _| {
                b.iter(|| {
                    chain.process(black_box(&mut buffer), frames);
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_default_chain);
criterion_main!(benches);
