//! Codec benchmark - header framing and checksum throughput

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use meshtun_codec::{
    checksum, Ipv4HeaderBuilder, NetBuffer, RudpHeaderBuilder, TcpHeaderBuilder, TcpSegment,
    IPPROTO_TCP, RUDP_ACK, TCP_ACK,
};
use std::net::Ipv4Addr;

const MSS: usize = 1460;

fn bench_checksum(c: &mut Criterion) {
    let data = vec![0xa5u8; MSS];
    let mut group = c.benchmark_group("checksum");
    group.throughput(Throughput::Bytes(MSS as u64));
    group.bench_function("internet_checksum_1460", |b| {
        b.iter(|| checksum::internet_checksum(black_box(&data)))
    });
    group.finish();
}

fn bench_framing(c: &mut Criterion) {
    let payload = vec![0x5au8; MSS];
    let src = Ipv4Addr::new(93, 184, 216, 34);
    let dst = Ipv4Addr::new(10, 0, 0, 1);

    let mut group = c.benchmark_group("framing");
    group.throughput(Throughput::Elements(1));

    group.bench_function("tcp_ipv4_segment", |b| {
        b.iter(|| {
            let mut buf = NetBuffer::backward_with_payload(black_box(&payload));
            TcpHeaderBuilder::new(443, 50000)
                .seq(1)
                .ack(1)
                .flags(TCP_ACK)
                .window(65535)
                .build(&mut buf, src, dst)
                .unwrap();
            Ipv4HeaderBuilder::new(src, dst, IPPROTO_TCP)
                .build(&mut buf)
                .unwrap();
            buf
        })
    });

    group.bench_function("rudp_segment", |b| {
        b.iter(|| {
            let mut buf = NetBuffer::backward_with_payload(black_box(&payload));
            RudpHeaderBuilder::new(101, 102)
                .flags(RUDP_ACK)
                .window(8000)
                .seq(1)
                .ack(1)
                .build(&mut buf)
                .unwrap();
            buf
        })
    });

    let mut framed = NetBuffer::backward_with_payload(&payload);
    TcpHeaderBuilder::new(443, 50000)
        .flags(TCP_ACK)
        .build(&mut framed, src, dst)
        .unwrap();
    let bytes = framed.to_vec();
    group.bench_function("tcp_parse", |b| {
        b.iter(|| TcpSegment::parse(black_box(&bytes)).unwrap().payload.len())
    });

    group.finish();
}

criterion_group!(benches, bench_checksum, bench_framing);
criterion_main!(benches);
