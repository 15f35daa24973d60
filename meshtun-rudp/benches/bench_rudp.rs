//! RUDP benchmark - in-memory transfer and reorder window throughput

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use meshtun::{Endpoint, FlowInfo, RudpConfig, StackConfig, StackContext, Upstream};
use meshtun_codec::NetBuffer;
use meshtun_rudp::{ReorderWindow, RudpProcessor};
use meshtun_test_support::LinkPair;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

const TRANSFER: usize = 64 * 1024;
const CHUNK: usize = 4096;

#[derive(Default)]
struct CountingUpstream {
    bytes: AtomicU64,
}

impl Upstream for CountingUpstream {
    fn on_read(&self, _flow: &FlowInfo, payload: NetBuffer) {
        self.bytes.fetch_add(payload.remaining_len() as u64, Ordering::Relaxed);
    }
}

fn bench_transfer(c: &mut Criterion) {
    let link = LinkPair::reliable();
    let (a_uid, b_uid) = (Uuid::new_v4(), Uuid::new_v4());
    let a_up = Arc::new(CountingUpstream::default());
    let b_up = Arc::new(CountingUpstream::default());
    let a = RudpProcessor::new(
        StackContext::new(StackConfig::default()),
        a_uid,
        RudpConfig::default(),
        link.a(),
        a_up,
    )
    .unwrap();
    let b = RudpProcessor::new(
        StackContext::new(StackConfig::default()),
        b_uid,
        RudpConfig::default(),
        link.b(),
        b_up.clone(),
    )
    .unwrap();
    let pump = || {
        link.pump(
            |p| b.read(p, Endpoint::mesh(a_uid, 0)).unwrap(),
            |p| a.read(p, Endpoint::mesh(b_uid, 0)).unwrap(),
        )
    };
    let payload = vec![0x5au8; CHUNK];

    let mut group = c.benchmark_group("RUDP transfer");
    group.throughput(Throughput::Bytes(TRANSFER as u64));
    group.sample_size(20);
    group.bench_function("64KiB_reliable_link", |bench| {
        bench.iter(|| {
            let before = b_up.bytes.load(Ordering::Relaxed);
            let flow = a.connect(Endpoint::mesh(b_uid, 7000), |_| {}).unwrap();
            for _ in 0..TRANSFER / CHUNK {
                a.write(&flow.key, NetBuffer::backward_with_payload(&payload)).unwrap();
                pump();
            }
            b.tick();
            pump();
            a.close(&flow.key, false).unwrap();
            pump();
            assert_eq!(b_up.bytes.load(Ordering::Relaxed) - before, TRANSFER as u64);
        })
    });
    group.finish();
}

fn bench_reorder(c: &mut Criterion) {
    const SEGMENTS: u32 = 16;
    const MSS: u32 = 1460;
    let segment = vec![0u8; MSS as usize];

    let mut group = c.benchmark_group("Reorder window");
    group.throughput(Throughput::Elements(SEGMENTS as u64));
    group.bench_function("reverse_order_gap_fill", |bench| {
        bench.iter(|| {
            let mut window = ReorderWindow::new(32_000);
            let mut next = 1u32;
            for i in (1..SEGMENTS).rev() {
                window.insert(next, 1 + i * MSS, black_box(&segment));
            }
            next += MSS;
            let ready = window.drain_ready(&mut next);
            assert_eq!(ready.len(), SEGMENTS as usize - 1);
            next
        })
    });
    group.finish();
}

criterion_group!(benches, bench_transfer, bench_reorder);
criterion_main!(benches);
