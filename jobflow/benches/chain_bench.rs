//! Benchmarks for chain execution.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use jobflow::prelude::*;

async fn fan_out_chain(width: usize) -> Chain {
    let root: Arc<dyn Step> = Arc::new(NoopStep::new("root", ""));
    let sink: Arc<dyn Step> = Arc::new(NoopStep::new("sink", ""));
    let mut builder = ChainBuilder::new("fan-out", 1, Request::new())
        .add_step(root.clone(), NodeOptions::new())
        .add_step(sink.clone(), NodeOptions::new());
    for i in 0..width {
        let leaf: Arc<dyn Step> = Arc::new(NoopStep::new(format!("leaf-{i}"), ""));
        builder = builder
            .add_step(leaf.clone(), NodeOptions::new())
            .depends_on(leaf.id(), root.id())
            .depends_on(sink.id(), leaf.id());
    }
    match builder.build().await {
        Ok(chain) => chain,
        Err(e) => panic!("building bench chain: {e}"),
    }
}

fn chain_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();

    let mut group = c.benchmark_group("fan_out");
    for width in [10, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, &width| {
            b.iter(|| {
                runtime.block_on(async {
                    let chain = Arc::new(fan_out_chain(width).await);
                    let outcome = Traverser::new(chain, TraverserConfig::default()).run().await;
                    black_box(outcome)
                })
            });
        });
    }
    group.finish();
}

criterion_group!(benches, chain_benchmark);
criterion_main!(benches);
