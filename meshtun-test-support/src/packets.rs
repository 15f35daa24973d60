//! Frame builders for the tunnel client side and parsers for engine output.
//!
//! Builders return forward-mode buffers, the way a virtual interface hands
//! packets to the engines. Parsers panic on malformed input: in a test that
//! is a failure of the engine under test.

use std::net::SocketAddrV4;

use meshtun_codec::{
    Ipv4Header, Ipv4HeaderBuilder, NetBuffer, RudpHeader, RudpHeaderBuilder, TcpHeaderBuilder, TcpOption, TcpSegment,
    UdpDatagram, UdpHeaderBuilder, IPPROTO_TCP, IPPROTO_UDP,
};

fn into_forward(buf: NetBuffer) -> NetBuffer {
    NetBuffer::from_vec(buf.to_vec())
}

/// IPv4 + TCP frame from `src` to `dst`.
#[allow(clippy::too_many_arguments)]
pub fn tcp_packet(
    src: SocketAddrV4,
    dst: SocketAddrV4,
    seq: u32,
    ack: u32,
    flags: u8,
    window: u16,
    options: Vec<TcpOption>,
    payload: &[u8],
) -> NetBuffer {
    let mut buf = NetBuffer::backward_with_payload(payload);
    TcpHeaderBuilder::new(src.port(), dst.port())
        .seq(seq)
        .ack(ack)
        .flags(flags)
        .window(window)
        .options(options)
        .build(&mut buf, *src.ip(), *dst.ip())
        .expect("tcp header");
    Ipv4HeaderBuilder::new(*src.ip(), *dst.ip(), IPPROTO_TCP)
        .build(&mut buf)
        .expect("ipv4 header");
    into_forward(buf)
}

/// IPv4 + UDP frame from `src` to `dst`.
pub fn udp_packet(src: SocketAddrV4, dst: SocketAddrV4, payload: &[u8]) -> NetBuffer {
    let mut buf = NetBuffer::backward_with_payload(payload);
    UdpHeaderBuilder::new(src.port(), dst.port())
        .build(&mut buf, *src.ip(), *dst.ip())
        .expect("udp header");
    Ipv4HeaderBuilder::new(*src.ip(), *dst.ip(), IPPROTO_UDP)
        .build(&mut buf)
        .expect("ipv4 header");
    into_forward(buf)
}

/// Mesh RUDP packet, positioned at the RUDP header.
pub fn rudp_packet(src_port: u16, dst_port: u16, flags: u8, seq: u32, ack: u32, window: u16, payload: &[u8]) -> NetBuffer {
    let mut buf = NetBuffer::backward_with_payload(payload);
    RudpHeaderBuilder::new(src_port, dst_port)
        .flags(flags)
        .window(window)
        .seq(seq)
        .ack(ack)
        .build(&mut buf)
        .expect("rudp header");
    into_forward(buf)
}

#[derive(Debug, Clone)]
pub struct ParsedTcp {
    pub src: SocketAddrV4,
    pub dst: SocketAddrV4,
    pub seq: u32,
    pub ack: u32,
    pub flags: u8,
    pub window: u16,
    pub options: Vec<TcpOption>,
    pub payload: Vec<u8>,
    pub checksum_ok: bool,
}

impl ParsedTcp {
    pub fn has(&self, flag: u8) -> bool {
        self.flags & flag == flag
    }
}

pub fn parse_tcp(packet: &NetBuffer) -> ParsedTcp {
    let bytes = packet.remaining();
    let ip = Ipv4Header::from_bytes(bytes).expect("ipv4 header");
    assert_eq!(ip.protocol, IPPROTO_TCP, "not a TCP packet");
    assert!(ip.verify_checksum(), "bad IPv4 checksum");
    let range = ip.payload_range(bytes.len()).expect("ipv4 payload");
    let segment = &bytes[range];
    let tcp = TcpSegment::parse(segment).expect("tcp segment");
    ParsedTcp {
        src: SocketAddrV4::new(ip.source(), tcp.header.src_port()),
        dst: SocketAddrV4::new(ip.destination(), tcp.header.dst_port()),
        seq: tcp.header.seq(),
        ack: tcp.header.ack(),
        flags: tcp.header.flags,
        window: tcp.header.window(),
        options: tcp.options.clone(),
        payload: tcp.payload.to_vec(),
        checksum_ok: meshtun_codec::verify_tcp_checksum(ip.source(), ip.destination(), segment),
    }
}

#[derive(Debug, Clone)]
pub struct ParsedUdp {
    pub src: SocketAddrV4,
    pub dst: SocketAddrV4,
    pub payload: Vec<u8>,
    pub checksum_ok: bool,
}

pub fn parse_udp(packet: &NetBuffer) -> ParsedUdp {
    let bytes = packet.remaining();
    let ip = Ipv4Header::from_bytes(bytes).expect("ipv4 header");
    assert_eq!(ip.protocol, IPPROTO_UDP, "not a UDP packet");
    let range = ip.payload_range(bytes.len()).expect("ipv4 payload");
    let udp = UdpDatagram::parse(&bytes[range]).expect("udp datagram");
    ParsedUdp {
        src: SocketAddrV4::new(ip.source(), udp.header.src_port()),
        dst: SocketAddrV4::new(ip.destination(), udp.header.dst_port()),
        payload: udp.payload.to_vec(),
        checksum_ok: udp.verify_checksum(ip.source(), ip.destination()),
    }
}

#[derive(Debug, Clone)]
pub struct ParsedRudp {
    pub header: RudpHeader,
    pub payload: Vec<u8>,
}

impl ParsedRudp {
    pub fn has(&self, flag: u8) -> bool {
        self.header.has(flag)
    }

    pub fn seq(&self) -> u32 {
        self.header.seq()
    }

    pub fn ack(&self) -> u32 {
        self.header.ack()
    }
}

pub fn parse_rudp(packet: &NetBuffer) -> ParsedRudp {
    let bytes = packet.remaining();
    let header = RudpHeader::from_bytes(bytes).expect("rudp header");
    ParsedRudp {
        header,
        payload: bytes[RudpHeader::SIZE..].to_vec(),
    }
}
