//! Tunnel-side framing: parse captured IPv4 frames, build replies.
//!
//! Outbound packets travel from `key.dst` (the emulated remote host) to
//! `key.src` (the local application) and are handed to the downstream
//! addressed to `key.src`.

use std::net::Ipv4Addr;

use meshtun::{DnsTunnelConfig, Endpoint, FlowKey, Protocol, Result, StackError};
use meshtun_codec::{
    ip_version, Ipv4Header, Ipv4HeaderBuilder, NetBuffer, TcpHeaderBuilder, TcpOption, TcpSegment, UdpDatagram,
    UdpHeaderBuilder, DEFAULT_HEADROOM, IPPROTO_TCP, IPPROTO_UDP, UDP_HEADER_SIZE,
};

/// Redirect a query sent to the tunnel DNS address to the real resolver.
///
/// `dst_port` narrows the match to one port (TCP only answers port 53);
/// `None` rewrites any datagram addressed to the tunnel.
pub fn inbound_dns(dns: &DnsTunnelConfig, src: Ipv4Addr, dst: Ipv4Addr, dst_port: Option<u16>) -> (Ipv4Addr, Ipv4Addr) {
    let port_ok = dst_port.map_or(true, |port| port == dns.dns_port);
    if dst == dns.tunnel_address && port_ok {
        (dns.tunnel_address, dns.server_address)
    } else {
        (src, dst)
    }
}

/// Make a resolver answer look like it came from the tunnel DNS address.
pub fn outbound_dns(dns: &DnsTunnelConfig, from: Ipv4Addr, to: Ipv4Addr) -> (Ipv4Addr, Ipv4Addr) {
    if to == dns.tunnel_address {
        (dns.tunnel_address, dns.vpn_address)
    } else {
        (from, to)
    }
}

fn ipv4_frame(frame: &NetBuffer, protocol: u8) -> Option<(Ipv4Header, std::ops::Range<usize>)> {
    let bytes = frame.remaining();
    match ip_version(bytes) {
        Some(4) => {}
        Some(6) => {
            trace_warn!("dropping IPv6 frame ({} bytes)", bytes.len());
            return None;
        }
        _other => {
            trace_debug!("dropping frame with IP version {:?}", _other);
            return None;
        }
    }
    let ip = match Ipv4Header::from_bytes(bytes) {
        Ok(ip) => ip,
        Err(_e) => {
            trace_debug!("dropping frame: {}", _e);
            return None;
        }
    };
    if ip.protocol != protocol {
        trace_debug!("dropping frame with protocol {}", ip.protocol);
        return None;
    }
    match ip.payload_range(bytes.len()) {
        Ok(range) => Some((ip, range)),
        Err(_e) => {
            trace_debug!("dropping frame: {}", _e);
            None
        }
    }
}

/// Copy of the frame up to the transport payload end, read cursor on the payload.
fn payload_view(frame: &NetBuffer, start: usize, end: usize) -> Option<NetBuffer> {
    let mut payload = NetBuffer::from_vec(frame.remaining()[..end].to_vec());
    payload.set_read_pos(start).ok()?;
    Some(payload)
}

/// One TCP segment captured from the tunnel.
#[derive(Debug)]
pub(crate) struct TcpInput {
    pub key: FlowKey,
    pub seq: u32,
    pub ack: u32,
    pub flags: u8,
    pub window: u16,
    pub window_scale: u8,
    pub mss: Option<u16>,
    pub payload: NetBuffer,
}

impl TcpInput {
    #[inline]
    pub fn has(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.remaining_len()
    }
}

pub(crate) fn parse_tcp(frame: &NetBuffer, dns: &DnsTunnelConfig) -> Option<TcpInput> {
    let (ip, range) = ipv4_frame(frame, IPPROTO_TCP)?;
    let segment = match TcpSegment::parse(&frame.remaining()[range.clone()]) {
        Ok(segment) => segment,
        Err(_e) => {
            trace_debug!("dropping TCP segment: {}", _e);
            return None;
        }
    };
    let hdr = &segment.header;
    let (src, dst) = inbound_dns(dns, ip.source(), ip.destination(), Some(hdr.dst_port()));
    let key = FlowKey::new(
        Endpoint::ipv4(src, hdr.src_port(), Protocol::Tcp),
        Endpoint::ipv4(dst, hdr.dst_port(), Protocol::Tcp),
    );
    let payload = payload_view(frame, range.start + segment.payload_offset, range.end)?;
    Some(TcpInput {
        key,
        seq: hdr.seq(),
        ack: hdr.ack(),
        flags: hdr.flags,
        window: hdr.window(),
        window_scale: segment.window_scale(),
        mss: segment.mss(),
        payload,
    })
}

/// One UDP datagram captured from the tunnel.
#[derive(Debug)]
pub(crate) struct UdpInput {
    pub key: FlowKey,
    pub payload: NetBuffer,
}

pub(crate) fn parse_udp(frame: &NetBuffer, dns: &DnsTunnelConfig) -> Option<UdpInput> {
    let (ip, range) = ipv4_frame(frame, IPPROTO_UDP)?;
    let datagram = match UdpDatagram::parse(&frame.remaining()[range.clone()]) {
        Ok(datagram) => datagram,
        Err(_e) => {
            trace_debug!("dropping UDP datagram: {}", _e);
            return None;
        }
    };
    let hdr = &datagram.header;
    let (src, dst) = inbound_dns(dns, ip.source(), ip.destination(), None);
    let key = FlowKey::new(
        Endpoint::ipv4(src, hdr.src_port(), Protocol::Udp),
        Endpoint::ipv4(dst, hdr.dst_port(), Protocol::Udp),
    );
    let start = range.start + UDP_HEADER_SIZE;
    let payload = payload_view(frame, start, start + datagram.payload.len())?;
    Some(UdpInput { key, payload })
}

fn ipv4_of(endpoint: &Endpoint) -> Result<Ipv4Addr> {
    let ip = endpoint
        .addr
        .as_ipv4()
        .ok_or_else(|| StackError::UnsupportedAddress(endpoint.to_string()))?;
    if ip.is_unspecified() {
        trace_error!("refusing to frame packet for unspecified address {}", endpoint);
        return Err(StackError::invalid_address(format!("unspecified address in {}", endpoint)));
    }
    Ok(ip)
}

/// Outbound (from, to) addresses for `key`, DNS rewrite applied.
fn reply_addresses(key: &FlowKey, dns: &DnsTunnelConfig) -> Result<(Ipv4Addr, Ipv4Addr)> {
    let from = ipv4_of(&key.dst)?;
    let to = ipv4_of(&key.src)?;
    Ok(outbound_dns(dns, from, to))
}

/// Header fields of one segment sent back into the tunnel.
#[derive(Debug, Clone)]
pub(crate) struct TcpReply {
    pub seq: u32,
    pub ack: u32,
    pub flags: u8,
    pub window: u16,
    pub options: Vec<TcpOption>,
}

impl TcpReply {
    pub fn new(seq: u32, ack: u32, flags: u8, window: u16) -> Self {
        Self {
            seq,
            ack,
            flags,
            window,
            options: Vec::new(),
        }
    }

    pub fn options(mut self, options: Vec<TcpOption>) -> Self {
        self.options = options;
        self
    }

    /// Prepend TCP and IPv4 headers to `buf`, which must be in backward mode.
    pub fn frame(self, mut buf: NetBuffer, key: &FlowKey, dns: &DnsTunnelConfig) -> Result<NetBuffer> {
        if !buf.is_backward() {
            return Err(StackError::backward_required());
        }
        let (from, to) = reply_addresses(key, dns)?;
        TcpHeaderBuilder::new(key.dst.port, key.src.port)
            .seq(self.seq)
            .ack(self.ack)
            .flags(self.flags)
            .window(self.window)
            .options(self.options)
            .build(&mut buf, from, to)?;
        Ipv4HeaderBuilder::new(from, to, IPPROTO_TCP).build(&mut buf)?;
        Ok(buf)
    }

    /// Header-only segment.
    pub fn frame_empty(self, key: &FlowKey, dns: &DnsTunnelConfig) -> Result<NetBuffer> {
        self.frame(NetBuffer::backward(DEFAULT_HEADROOM), key, dns)
    }
}

/// Prepend UDP and IPv4 headers to a backward-mode payload.
pub(crate) fn frame_udp(mut buf: NetBuffer, key: &FlowKey, dns: &DnsTunnelConfig) -> Result<NetBuffer> {
    if !buf.is_backward() {
        return Err(StackError::backward_required());
    }
    let (from, to) = reply_addresses(key, dns)?;
    UdpHeaderBuilder::new(key.dst.port, key.src.port).build(&mut buf, from, to)?;
    Ipv4HeaderBuilder::new(from, to, IPPROTO_UDP).build(&mut buf)?;
    Ok(buf)
}
