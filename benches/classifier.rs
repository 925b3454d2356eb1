//! Benchmark for VM classification
//!
//! Target: classify a 10K-VM inventory well under a poll interval

use cluster_power_orchestrator::config::{ClassificationConfig, TagGroupConfig};
use cluster_power_orchestrator::{Direction, VmClassifier, VmInfo, VmPowerState};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::collections::BTreeMap;

const TIERS: [&str; 4] = ["db", "cache", "app", "web"];

fn classifier() -> VmClassifier {
    let config = ClassificationConfig {
        priority_vms: (0..8).map(|i| format!("vm-{:05}", i * 997)).collect(),
        tag_groups: TIERS
            .iter()
            .map(|tier| TagGroupConfig {
                name: tier.to_string(),
                key: "tier".to_string(),
                value: tier.to_string(),
            })
            .collect(),
        ..Default::default()
    };
    VmClassifier::from_config(&config).unwrap()
}

fn inventory(count: usize) -> Vec<VmInfo> {
    (0..count)
        .map(|i| {
            let name = if i % 50 == 0 {
                format!("vCLS-{:05}", i)
            } else {
                format!("vm-{:05}", i)
            };
            let mut tags = BTreeMap::new();
            // Every fifth VM is untagged
            if i % 5 != 0 {
                tags.insert("tier".to_string(), TIERS[i % TIERS.len()].to_string());
            }
            tags.insert("owner".to_string(), format!("team-{}", i % 12));
            VmInfo {
                name,
                power_state: VmPowerState::On,
                tags,
                host_name: format!("esx-{:02}", i % 32),
            }
        })
        .collect()
}

fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classifier");
    let classifier = classifier();

    for size in [100usize, 1_000, 10_000] {
        let vms = inventory(size);
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("classify_shutdown", size), &vms, |b, vms| {
            b.iter(|| classifier.classify(black_box(vms.iter()), Direction::Shutdown));
        });
    }

    group.finish();
}

fn bench_category_of(c: &mut Criterion) {
    let mut group = c.benchmark_group("classifier");
    group.throughput(Throughput::Elements(1));

    let classifier = classifier();
    let vms = inventory(1_000);

    group.bench_function("category_of", |b| {
        let mut counter = 0usize;
        b.iter(|| {
            counter += 1;
            classifier.category_of(black_box(&vms[counter % vms.len()]))
        });
    });

    group.finish();
}

fn bench_from_config(c: &mut Criterion) {
    let mut group = c.benchmark_group("classifier");

    group.bench_function("resolve_config", |b| {
        b.iter(classifier);
    });

    group.finish();
}

criterion_group!(benches, bench_classify, bench_category_of, bench_from_config);
criterion_main!(benches);
