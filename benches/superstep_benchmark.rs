use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pie_engine::{
    AtomicBitset, BatchExecutor, CsrFragment, EdgeTriplet, EngineConfig, LocalCluster, MessageSink, PieError,
    UpdateContext, VertexProgram,
};

/// Min-label propagation over an unweighted graph.
#[derive(Clone)]
struct MinLabel;

impl VertexProgram for MinLabel {
    type VertexData = u64;
    type EdgeData = ();
    type Message = u64;

    fn initial_message(&self) -> u64 {
        u64::MAX
    }

    fn update(&self, _: &UpdateContext, value: &mut u64, message: Option<&u64>) -> anyhow::Result<()> {
        if let Some(&message) = message {
            *value = (*value).min(message);
        }
        Ok(())
    }

    fn generate(&self, t: &EdgeTriplet<'_, u64, ()>, sink: &mut MessageSink<'_, u64>) -> anyhow::Result<()> {
        if t.src_value < t.dst_value {
            sink.send_to_dst(*t.src_value);
        }
        Ok(())
    }

    fn merge(&self, left: u64, right: u64) -> u64 {
        left.min(right)
    }
}

fn graph(nodes: u64) -> Vec<(u64, u64, ())> {
    // Ring plus a fixed stride of chords, both directions.
    let mut edges = Vec::new();
    for i in 0..nodes {
        for step in [1, 7, 31] {
            let j = (i + step) % nodes;
            edges.push((i, j, ()));
            edges.push((j, i, ()));
        }
    }
    edges
}

fn bench_cluster_min_label(c: &mut Criterion) {
    let nodes = 20_000u64;
    let edges = graph(nodes);
    let values: Vec<u64> = (0..nodes).collect();

    let mut group = c.benchmark_group("cluster_min_label");
    group.sample_size(10);
    for fragments in [1usize, 4] {
        group.bench_with_input(BenchmarkId::from_parameter(fragments), &fragments, |b, &fragments| {
            b.iter(|| {
                let parts = CsrFragment::partition(&values, &edges, fragments).unwrap();
                let config = EngineConfig::new().with_parallelism(2).with_max_iterations(10_000);
                let mut cluster = LocalCluster::new(parts, MinLabel, config).unwrap();
                black_box(cluster.run().unwrap())
            });
        });
    }
    group.finish();
}

fn bench_executor_and_bitset(c: &mut Criterion) {
    let bits = 1 << 20;
    let exec = BatchExecutor::new(num_cpus::get(), 8192).unwrap();
    let set = AtomicBitset::new(bits);

    c.bench_function("executor_set_every_third_bit", |b| {
        b.iter(|| {
            set.clear_all();
            exec.run(bits, |start, end, _| {
                for i in (start..end).filter(|i| i % 3 == 0) {
                    set.set(i);
                }
                Ok::<(), PieError>(())
            })
            .unwrap();
            black_box(set.cardinality())
        });
    });

    set.clear_all();
    for i in (0..bits).step_by(97) {
        set.set(i);
    }
    c.bench_function("bitset_sparse_scan", |b| {
        b.iter(|| black_box(set.iter_ones().count()));
    });
}

criterion_group!(benches, bench_cluster_min_label, bench_executor_and_bitset);
criterion_main!(benches);
