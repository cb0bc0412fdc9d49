use std::collections::BTreeMap;
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use audit_nozzle::counters::CounterTracker;
use audit_nozzle::histogram::HistogramBin;
use audit_nozzle::logs::LogAggregator;
use audit_nozzle::lookup::{LookupQueue, QueueFullPolicy};
use audit_nozzle::tags::TagAggregator;
use audit_nozzle::telemetry::Telemetry;
use audit_nozzle::{route, CollectorKind, EventType};

fn bench_route(c: &mut Criterion) {
    c.bench_function("route_all_pairs", |b| {
        b.iter(|| {
            for kind in CollectorKind::ALL {
                for event_type in EventType::ALL {
                    black_box(route(black_box(kind), black_box(event_type)));
                }
            }
        })
    });
}

fn bench_log_ingest(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let telemetry = Arc::new(Telemetry::new().unwrap());
    let (queue, _rx) = LookupQueue::bounded(1_024, QueueFullPolicy::Drop, telemetry);
    let logs = LogAggregator::new(queue);
    let app_ids: Vec<String> = (0..64).map(|i| format!("app-{i:04}")).collect();

    let mut i = 0usize;
    c.bench_function("log_ingest_hot_keys", |b| {
        b.to_async(&rt).iter(|| {
            i = (i + 1) % app_ids.len();
            let app_id = &app_ids[i];
            let logs = &logs;
            async move { black_box(logs.ingest(app_id, "APP", "GET /health 200").await) }
        })
    });
}

fn bench_histogram(c: &mut Criterion) {
    let mut hist = HistogramBin::new(20, 200);
    let mut sample = 0u64;
    c.bench_function("histogram_insert", |b| {
        b.iter(|| {
            sample = (sample + 7) % 250;
            hist.insert_sample(black_box(sample));
        })
    });
}

fn bench_counters_and_tags(c: &mut Criterion) {
    let counters = CounterTracker::new();
    let mut total = 0u64;
    c.bench_function("counter_ingest", |b| {
        b.iter(|| {
            total += 3;
            counters.ingest("0", "listeners.receivedEnvelopes", "DopplerServer", Some("LogMessage"), total, 3)
        })
    });

    let tags = TagAggregator::new();
    let envelope_tags: BTreeMap<String, String> = [("deployment", "cf"), ("job", "router"), ("index", "0")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    c.bench_function("tag_ingest", |b| b.iter(|| tags.ingest("gorouter", "router", black_box(&envelope_tags))));
}

criterion_group!(benches, bench_route, bench_log_ingest, bench_histogram, bench_counters_and_tags);
criterion_main!(benches);
