//! Benchmarks for pipeline execution.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use stagechain::prelude::*;
use std::sync::Arc;

fn map_chain(items: u32, buffer_size: usize) -> Pipeline<(), u32> {
    PipelineBuilder::new(FnSource::new("numbers", move |_: &()| (0..items).collect()))
        .append(MapStage::new("inc", |n: u32, _: &()| n.wrapping_add(1)))
        .append(MapStage::new("double", |n: u32, _: &()| n.wrapping_mul(2)))
        .append(FilterStage::new("even", |n: &u32, _: &()| n % 2 == 0))
        .with_config(PipelineConfig::new().with_buffer_size(buffer_size))
        .expect("valid config")
        .build()
}

fn pipeline_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("tokio runtime");
    let ctx = Arc::new(());

    let mut group = c.benchmark_group("map_chain_10k");
    for buffer_size in [1_usize, 16, 100] {
        let pipeline = map_chain(10_000, buffer_size);
        group.bench_with_input(
            BenchmarkId::from_parameter(buffer_size),
            &pipeline,
            |b, pipeline| {
                b.iter(|| {
                    let summary = runtime
                        .block_on(pipeline.execute(&CancellationToken::new(), &ctx))
                        .expect("pipeline run");
                    black_box(summary.drained_items)
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, pipeline_benchmark);
criterion_main!(benches);
