//! Integration tests for the tunnel UDP engine

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;

use meshtun::{Endpoint, FlowKey, IdleConfig, Protocol, StackConfig, StackContext, StackError, UdpConfig};
use meshtun_codec::NetBuffer;
use meshtun_test_support::{parse_udp, udp_packet, RecordingDownstream, RecordingUpstream};
use meshtun_vpn::UdpProcessor;

const RESOLVER: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(1, 1, 1, 1), 53);

fn app(port: u16) -> SocketAddrV4 {
    SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), port)
}

fn key_for(src: SocketAddrV4, dst: SocketAddrV4) -> FlowKey {
    FlowKey::new(
        Endpoint::ipv4(*src.ip(), src.port(), Protocol::Udp),
        Endpoint::ipv4(*dst.ip(), dst.port(), Protocol::Udp),
    )
}

fn setup(config: UdpConfig) -> (Arc<StackContext>, Arc<UdpProcessor>, Arc<RecordingDownstream>, Arc<RecordingUpstream>) {
    let ctx = StackContext::new(StackConfig::default());
    let down = Arc::new(RecordingDownstream::new());
    let up = Arc::new(RecordingUpstream::new());
    let udp = UdpProcessor::new(ctx.clone(), config, down.clone(), up.clone()).unwrap();
    (ctx, udp, down, up)
}

/// Test first datagram creates and connects the flow, payload delivered
#[test]
fn test_first_datagram_creates_flow() {
    let (_ctx, udp, _down, up) = setup(UdpConfig::default());
    udp.input(udp_packet(app(5000), RESOLVER, b"query")).unwrap();
    udp.input(udp_packet(app(5000), RESOLVER, b"again")).unwrap();

    let flow = up.last_created().unwrap();
    assert_eq!(flow.key, key_for(app(5000), RESOLVER));
    assert_eq!(up.created(), 1);
    assert_eq!(up.connected(flow.id), 1);
    assert_eq!(up.received(flow.id), b"queryagain");
    assert_eq!(udp.len(), 1);
}

/// Test write frames a datagram back to the application
#[test]
fn test_write_frames_reply() {
    let (_ctx, udp, down, _up) = setup(UdpConfig::default());
    let key = key_for(app(5000), RESOLVER);
    udp.input(udp_packet(app(5000), RESOLVER, b"query")).unwrap();

    udp.write(&key, NetBuffer::backward_with_payload(b"answer")).unwrap();
    let (dst, packet) = down.take().pop().unwrap();
    assert_eq!(dst, key.src);
    let reply = parse_udp(&packet);
    assert_eq!((reply.src, reply.dst), (RESOLVER, app(5000)));
    assert_eq!(reply.payload, b"answer");
    assert!(reply.checksum_ok);
}

/// Test write rejects a forward-mode buffer
#[test]
fn test_write_requires_backward_buffer() {
    let (_ctx, udp, down, _up) = setup(UdpConfig::default());
    let key = key_for(app(5000), RESOLVER);
    let err = udp.write(&key, NetBuffer::from_vec(b"answer".to_vec())).unwrap_err();
    assert!(matches!(err, StackError::WrongBufferDirection { .. }));
    assert!(down.is_empty());
}

/// Test DNS through the tunnel address goes to the real resolver and back
#[test]
fn test_dns_tunnel_rewrite() {
    let (_ctx, udp, down, up) = setup(UdpConfig::default());
    let dns = UdpConfig::default().dns;
    let tunnel = SocketAddrV4::new(dns.tunnel_address, 53);
    udp.input(udp_packet(app(6000), tunnel, b"query")).unwrap();

    let flow = up.last_created().unwrap();
    assert_eq!(flow.key.src.addr.as_ipv4(), Some(dns.tunnel_address));
    assert_eq!(flow.key.dst.addr.as_ipv4(), Some(dns.server_address));

    udp.write(&flow.key, NetBuffer::backward_with_payload(b"answer")).unwrap();
    let reply = parse_udp(&down.take().pop().unwrap().1);
    assert_eq!(reply.src, tunnel);
    assert_eq!(reply.dst, SocketAddrV4::new(dns.vpn_address, 6000));
}

/// Test idle flows are closed forcibly exactly once
#[test]
fn test_idle_eviction() {
    let (ctx, udp, _down, up) = setup(UdpConfig {
        idle: IdleConfig {
            idle_timeout_ms: 20_000,
            sweep_interval_ms: 10_000,
        },
        ..UdpConfig::default()
    });
    udp.input(udp_packet(app(5000), RESOLVER, b"query")).unwrap();
    let flow = up.last_created().unwrap();

    udp.sweep();
    assert!(udp.contains(&flow.key));
    udp.sweep();
    assert!(!udp.contains(&flow.key));
    udp.sweep();

    assert_eq!(up.destroyed(flow.id), 1);
    assert_eq!(up.closed(flow.id), vec![true]);
    assert_eq!(ctx.ids().live(), 0);
}

/// Test traffic in either direction resets the idle counter
#[test]
fn test_traffic_keeps_flow_alive() {
    let (_ctx, udp, _down, _up) = setup(UdpConfig {
        idle: IdleConfig {
            idle_timeout_ms: 20_000,
            sweep_interval_ms: 10_000,
        },
        ..UdpConfig::default()
    });
    let key = key_for(app(5000), RESOLVER);
    udp.input(udp_packet(app(5000), RESOLVER, b"query")).unwrap();
    for _ in 0..5 {
        udp.sweep();
        udp.write(&key, NetBuffer::backward_with_payload(b"tick")).unwrap();
    }
    assert!(udp.contains(&key));
}

/// Test capacity pressure closes the oldest flow gracefully
#[test]
fn test_lru_cleanup_is_graceful() {
    let (_ctx, udp, _down, up) = setup(UdpConfig {
        capacity: 2,
        ..UdpConfig::default()
    });
    let mut flows = Vec::new();
    for port in [5001, 5002, 5003] {
        udp.input(udp_packet(app(port), RESOLVER, b"q")).unwrap();
        flows.push(up.last_created().unwrap());
    }
    assert_eq!(udp.len(), 2);
    assert_eq!(up.closed(flows[0].id), vec![false]);
    assert_eq!(up.destroyed(flows[0].id), 1);
    assert!(up.closed(flows[1].id).is_empty());
}

/// Test explicit close and shutdown fire the terminal pair once per flow
#[test]
fn test_close_and_shutdown() {
    let (ctx, udp, _down, up) = setup(UdpConfig::default());
    udp.input(udp_packet(app(5001), RESOLVER, b"q")).unwrap();
    let first = up.last_created().unwrap();
    udp.input(udp_packet(app(5002), RESOLVER, b"q")).unwrap();
    let second = up.last_created().unwrap();

    udp.close(&first.key, false);
    udp.close(&first.key, false);
    assert_eq!(up.closed(first.id), vec![false]);

    udp.shutdown();
    assert_eq!(up.closed(second.id), vec![true]);
    assert_eq!(up.destroyed(second.id), 1);
    assert!(udp.is_empty());
    assert_eq!(ctx.timer().pending(), 0);
}
