//! Integration benchmark for the measurement pipeline.
//!
//! Feeds decoded measurements through policy, enrichment and fan-out into
//! line protocol sinks writing to `io::sink()`.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use ruuvi_bridge::policy::NameTable;
use ruuvi_bridge::sinks::influxdb::{DEFAULT_MEASUREMENT, InfluxLineSink};
use ruuvi_bridge::sinks::{self, DebugSink};
use ruuvi_bridge::{
    FilterMode, MacAddress, Measurement, Pipeline, PipelineStats, ProcessingSettings, TagPolicy,
    decode,
};
use std::collections::BTreeMap;
use std::io;
use std::time::Duration;
use tokio::runtime::Runtime;

const V5_ADVERTISEMENT: &str = "0201061BFF99040512FC5394C37C0004FFFC040CAC364200CDCBB8334C884F";

fn measurements(count: usize, devices: u8) -> Vec<Measurement> {
    let decoded = decode(V5_ADVERTISEMENT).unwrap();
    (0..count)
        .map(|i| {
            let mac = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, (i % devices as usize) as u8]);
            decoded.clone().with_source(mac, Some(-70), None)
        })
        .collect()
}

fn influx_sink() -> InfluxLineSink<io::Sink> {
    InfluxLineSink::new(io::sink(), DEFAULT_MEASUREMENT.to_string(), BTreeMap::new())
}

/// Run one pipeline over `batch` with the given sinks attached.
async fn run_batch(
    settings: ProcessingSettings,
    policy: TagPolicy,
    batch: Vec<Measurement>,
    min_interval: Duration,
    fan_out: usize,
) -> PipelineStats {
    let mut pipeline = Pipeline::new(settings, policy);
    for i in 0..fan_out {
        let handle = if i % 2 == 0 {
            sinks::spawn(influx_sink(), settings.capacity(), min_interval)
        } else {
            sinks::spawn(DebugSink::new(io::sink()), settings.capacity(), min_interval)
        };
        pipeline.attach_sink(handle);
    }

    let producer = pipeline.producer();
    let run = tokio::spawn(pipeline.run());
    for m in batch {
        producer.send(m).await.unwrap();
    }
    drop(producer);
    run.await.unwrap()
}

/// Batches of measurements through a single sink
fn bench_batch_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_pipeline");
    let rt = Runtime::new().unwrap();

    for batch_size in [1, 10, 100, 1000] {
        let batch = measurements(batch_size, 10);
        group.throughput(Throughput::Elements(batch_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            &batch,
            |b, batch| {
                b.iter(|| {
                    let stats = rt.block_on(run_batch(
                        ProcessingSettings::default(),
                        TagPolicy::default(),
                        batch.clone(),
                        Duration::ZERO,
                        1,
                    ));
                    black_box(stats)
                })
            },
        );
    }

    group.finish();
}

/// Same batch fanned out to a growing number of sinks
fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");
    let rt = Runtime::new().unwrap();
    let batch = measurements(100, 10);

    for count in [1, 2, 4] {
        group.throughput(Throughput::Elements(100));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                let stats = rt.block_on(run_batch(
                    ProcessingSettings::default(),
                    TagPolicy::default(),
                    batch.clone(),
                    Duration::ZERO,
                    count,
                ));
                black_box(stats)
            })
        });
    }

    group.finish();
}

/// Realistic steady state: most publishes are rate limited, half the tags
/// are filtered, and small queues keep backpressure engaged
fn bench_limited_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("limited_pipeline");
    let rt = Runtime::new().unwrap();
    let batch = measurements(100, 10);
    let named: NameTable = (0..5u8)
        .map(|i| {
            (
                MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, i]),
                format!("Tag {i}"),
            )
        })
        .collect();
    let settings = ProcessingSettings {
        extended_values: true,
        queue_capacity: 4,
    };

    group.throughput(Throughput::Elements(100));
    group.bench_function("100_named_rate_limited", |b| {
        b.iter(|| {
            let policy = TagPolicy::new(FilterMode::Named, Vec::<MacAddress>::new(), named.clone()).unwrap();
            let stats = rt.block_on(run_batch(
                settings,
                policy,
                batch.clone(),
                Duration::from_secs(3600),
                2,
            ));
            debug_assert_eq!(stats.filtered, 50);
            black_box(stats)
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_batch_pipeline,
    bench_fan_out,
    bench_limited_pipeline,
);
criterion_main!(benches);
