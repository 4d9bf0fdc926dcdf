//! Classifier Benchmarks
//!
//! Cache-hit and cache-miss lookup cost, plus port-list scans.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use drawbridge_policy::{AddressClassifier, HeapArena, PortRangeList};

fn loaded_classifier(networks: u32) -> AddressClassifier {
    let mut classifier = AddressClassifier::new(Box::new(HeapArena::default()));
    let table: Vec<u8> = (0..256u32).map(|h| (h % 7) as u8).collect();
    for n in 0..networks {
        classifier
            .load_network(0xC0A8_0000 | (n << 8), &table)
            .unwrap();
    }
    classifier
}

fn bench_lookup_hit(c: &mut Criterion) {
    let mut classifier = loaded_classifier(1);
    classifier.lookup(0xC0A8_0042);

    c.bench_function("classifier_lookup_hit", |b| {
        b.iter(|| classifier.lookup(black_box(0xC0A8_0042)))
    });
}

fn bench_lookup_miss(c: &mut Criterion) {
    let mut classifier = loaded_classifier(64);

    c.bench_function("classifier_lookup_miss", |b| {
        b.iter(|| {
            classifier.flush();
            classifier.lookup(black_box(0xC0A8_2042))
        })
    });
}

fn bench_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("classifier_sweep");

    for networks in [1u32, 16, 64].iter() {
        let hosts = networks * 256;
        group.throughput(Throughput::Elements(hosts as u64));
        group.bench_with_input(BenchmarkId::from_parameter(networks), networks, |b, &networks| {
            let mut classifier = loaded_classifier(networks);
            b.iter(|| {
                let mut sum = 0u32;
                for ip in 0xC0A8_0000..0xC0A8_0000 + networks * 256 {
                    sum = sum.wrapping_add(classifier.lookup(ip) as u32);
                }
                black_box(sum)
            })
        });
    }
    group.finish();
}

fn bench_check_port(c: &mut Criterion) {
    let ranges: Vec<(u16, u16)> = (1..31u16).map(|i| (i * 1000, i * 1000 + 10)).collect();
    let list = PortRangeList::from_ranges(&ranges);

    c.bench_function("port_list_scan_31", |b| {
        b.iter(|| list.check_port(black_box(30_005)))
    });
}

criterion_group!(
    benches,
    bench_lookup_hit,
    bench_lookup_miss,
    bench_sweep,
    bench_check_port,
);

criterion_main!(benches);
