//! # meshtun-codec
//!
//! Packet buffers and wire headers shared by the meshtun engines.
//!
//! This crate provides the byte-level types both protocol engines build on:
//!
//! - [`NetBuffer`]: packet buffer with read/write cursors and a backward
//!   (prepend) mode for framing headers right-to-left
//! - [`Ipv4Header`], [`TcpHeader`], [`UdpHeader`]: tunnel-side headers
//! - [`RudpHeader`]: 16-byte mesh reliable-UDP header
//! - Internet checksum utilities
//!
//! ## Layer Diagram
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ meshtun-vpn / meshtun-rudp (engines)    │
//! │ - TCB, UCB, RUCB state machines         │
//! └────────────────────┬────────────────────┘
//!                      │
//! ┌────────────────────┴────────────────────┐
//! │ meshtun-codec (Wire Layer)              │
//! │ - NetBuffer, IPv4/TCP/UDP/RUDP headers  │  ← This crate
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use meshtun_codec::{Ipv4HeaderBuilder, NetBuffer, UdpHeaderBuilder, IPPROTO_UDP};
//! use std::net::Ipv4Addr;
//!
//! let src = Ipv4Addr::new(10, 0, 0, 1);
//! let dst = Ipv4Addr::new(10, 0, 0, 9);
//!
//! // Payload first, then headers prepended right-to-left
//! let mut buf = NetBuffer::backward_with_payload(b"hello");
//! UdpHeaderBuilder::new(5000, 53).build(&mut buf, src, dst).unwrap();
//! Ipv4HeaderBuilder::new(src, dst, IPPROTO_UDP).build(&mut buf).unwrap();
//!
//! assert_eq!(buf.len(), 20 + 8 + 5);
//! ```

mod buffer;
mod error;
mod header;
mod ipv4;
mod tcp;
mod udp;

pub mod checksum;

pub use buffer::{NetBuffer, DEFAULT_HEADROOM};
pub use error::{CodecError, Result};
pub use header::{
    RudpHeader, RudpHeaderBuilder, EAK_RANGE_SIZE, MESH_PROTO_ICMP, MESH_PROTO_RUDP,
    MESH_PROTO_UDP, RUDP_ACK, RUDP_CWR, RUDP_EAK, RUDP_ECE, RUDP_FIN, RUDP_HEADER_SIZE, RUDP_RST,
    RUDP_SYN, RUDP_URG,
};
pub use ipv4::{ip_version, Ipv4Header, Ipv4HeaderBuilder, IPPROTO_TCP, IPPROTO_UDP, IPV4_HEADER_SIZE};
pub use tcp::{
    verify_checksum as verify_tcp_checksum, TcpHeader, TcpHeaderBuilder, TcpOption, TcpSegment,
    TCP_ACK, TCP_FIN, TCP_HEADER_SIZE, TCP_PSH, TCP_RST, TCP_SYN, TCP_URG,
};
pub use udp::{UdpDatagram, UdpHeader, UdpHeaderBuilder, UDP_HEADER_SIZE};
