//! Criterion benchmarks for discovery and the handshake digest.
//!
//! Run with:
//! ```bash
//! cargo bench --package owlink-core --bench search_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use owlink_core::discovery::search::{find_first, find_next};
use owlink_core::discovery::verify::{build_verify_block, evaluate, is_present};
use owlink_core::domain::crc::{crc16, crc8};
use owlink_core::protocol::handshake::challenge_response;
use owlink_core::{RomId, SearchState, SimulatedBus};

// ── Fixtures ──────────────────────────────────────────────────────────────────

fn population(count: u8) -> Vec<RomId> {
    (0..count)
        .map(|i| RomId::with_crc(if i % 2 == 0 { 0x28 } else { 0x10 }, [i, i ^ 0x5A, 0, 0, 0, 1]))
        .collect()
}

fn enumerate(bus: &mut SimulatedBus, state: &mut SearchState) -> usize {
    let mut count = 0;
    let mut more = find_first(bus, state).expect("simulated bus never fails");
    while more {
        count += 1;
        more = find_next(bus, state).expect("simulated bus never fails");
    }
    count
}

// ── Benchmark groups ──────────────────────────────────────────────────────────

/// Full enumeration over buses of increasing population.
fn bench_enumerate(c: &mut Criterion) {
    let mut group = c.benchmark_group("enumerate");
    for count in [1u8, 8, 32] {
        let devices = population(count);
        group.bench_with_input(BenchmarkId::new("devices", count), &devices, |b, devices| {
            let mut bus = SimulatedBus::with_devices(devices.iter().copied());
            let mut state = SearchState::new();
            b.iter(|| black_box(enumerate(&mut bus, &mut state)))
        });
    }
    group.finish();
}

/// Enumeration restricted to one of two interleaved families.
fn bench_filtered_enumerate(c: &mut Criterion) {
    let devices = population(32);
    c.bench_function("enumerate_family_0x10_of_32", |b| {
        let mut bus = SimulatedBus::with_devices(devices.iter().copied());
        let mut state = SearchState::new();
        state.target_families(&[0x10]);
        b.iter(|| black_box(enumerate(&mut bus, &mut state)))
    });
}

/// Presence verification: the pure evaluation and the full bus exchange.
fn bench_verify(c: &mut Criterion) {
    let devices = population(8);
    let target = devices[3];

    c.bench_function("verify_block_build_and_evaluate", |b| {
        b.iter(|| evaluate(black_box(target), &build_verify_block(black_box(target))))
    });

    c.bench_function("is_present_on_8_device_bus", |b| {
        let mut bus = SimulatedBus::with_devices(devices.iter().copied());
        b.iter(|| is_present(&mut bus, black_box(target)).expect("simulated bus never fails"))
    });
}

/// CRC throughput and the handshake digest.
fn bench_crc(c: &mut Criterion) {
    let page = [0xA5u8; 32];
    c.bench_function("crc8_rom", |b| b.iter(|| crc8(black_box(&page[..8]), 0)));
    c.bench_function("crc16_page_32", |b| b.iter(|| crc16(black_box(&page), 0)));
    c.bench_function("challenge_response", |b| {
        b.iter(|| challenge_response(black_box(b"Adapter Secret Default"), black_box(&[7u8; 8])))
    });
}

criterion_group!(
    benches,
    bench_enumerate,
    bench_filtered_enumerate,
    bench_verify,
    bench_crc
);
criterion_main!(benches);
