//! Decision Benchmarks
//!
//! Full per-packet decision cost for the common packet shapes.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use drawbridge_common::Direction;
use drawbridge_dataplane::{DenyEvent, EventLog, FilterOptions, PacketFilter, ProtocolTag};
use drawbridge_policy::{ClassAcl, FirewallState, HeapArena, PortRangeList};

struct NullLog;

impl EventLog for NullLog {
    fn log_event(&mut self, _event: &DenyEvent) {}
}

fn ipv4_tcp(src: u32, dst: u32, sport: u16, dport: u16, flags: u8) -> Vec<u8> {
    let mut pkt = vec![0u8; 40];
    pkt[0] = 0x45;
    pkt[2..4].copy_from_slice(&40u16.to_be_bytes());
    pkt[9] = 6;
    pkt[12..16].copy_from_slice(&src.to_be_bytes());
    pkt[16..20].copy_from_slice(&dst.to_be_bytes());
    pkt[20..22].copy_from_slice(&sport.to_be_bytes());
    pkt[22..24].copy_from_slice(&dport.to_be_bytes());
    pkt[32] = 0x50;
    pkt[33] = flags;
    pkt
}

fn state() -> FirewallState {
    let mut state = FirewallState::new(Box::new(HeapArena::default()));
    let table: Vec<u8> = (0..256u32).map(|h| (h % 4) as u8).collect();
    state.classifier.load_network(0xC0A8_0100, &table).unwrap();
    for class in 0..4u8 {
        state.acl.replace_class(
            class,
            ClassAcl {
                inbound: PortRangeList::from_ranges(&[(22, 22), (25, 25), (80, 80), (443, 443)]),
                ..ClassAcl::default()
            },
        );
    }
    state
}

fn bench_decide(c: &mut Criterion) {
    let mut st = state();
    let mut filter = PacketFilter::with_log(FilterOptions::default(), NullLog);

    let syn = ipv4_tcp(0x8C10_0505, 0xC0A8_010A, 40000, 443, 0x02);
    let ack = ipv4_tcp(0x8C10_0505, 0xC0A8_010A, 40000, 443, 0x10);
    let denied = ipv4_tcp(0x8C10_0505, 0xC0A8_010A, 40000, 3389, 0x02);

    c.bench_function("decide_tcp_syn_allow", |b| {
        b.iter(|| filter.decide(&mut st, Direction::Inbound, ProtocolTag::Ip, black_box(&syn)))
    });
    c.bench_function("decide_tcp_ack", |b| {
        b.iter(|| filter.decide(&mut st, Direction::Inbound, ProtocolTag::Ip, black_box(&ack)))
    });
    c.bench_function("decide_tcp_syn_deny", |b| {
        b.iter(|| filter.decide(&mut st, Direction::Inbound, ProtocolTag::Ip, black_box(&denied)))
    });
}

criterion_group!(benches, bench_decide);
criterion_main!(benches);
