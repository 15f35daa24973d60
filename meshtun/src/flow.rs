//! Flow identity.
//!
//! A flow is keyed by its (source, destination) endpoint pair. For tunnel
//! flows the source is the local application behind the virtual interface;
//! for mesh flows the source is this node.

use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Transport a flow runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// TCP terminated at the tunnel endpoint
    Tcp,
    /// UDP through the tunnel endpoint
    Udp,
    /// Reliable UDP between mesh peers
    MeshRudp,
    /// Plain datagrams between mesh peers
    MeshUdp,
}

/// Network-layer address of one side of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Address {
    Ipv4(Ipv4Addr),
    /// Mesh node identifier
    Mesh(Uuid),
}

impl Address {
    pub fn as_ipv4(&self) -> Option<Ipv4Addr> {
        match self {
            Address::Ipv4(ip) => Some(*ip),
            Address::Mesh(_) => None,
        }
    }

    pub fn is_mesh(&self) -> bool {
        matches!(self, Address::Mesh(_))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Ipv4(ip) => write!(f, "{}", ip),
            Address::Mesh(uid) => write!(f, "mesh:{}", uid),
        }
    }
}

/// Address, port and protocol of one side of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub addr: Address,
    pub port: u16,
    pub protocol: Protocol,
}

impl Endpoint {
    pub fn new(addr: Address, port: u16, protocol: Protocol) -> Self {
        Self {
            addr,
            port,
            protocol,
        }
    }

    pub fn ipv4(ip: Ipv4Addr, port: u16, protocol: Protocol) -> Self {
        Self::new(Address::Ipv4(ip), port, protocol)
    }

    pub fn mesh(uid: Uuid, port: u16) -> Self {
        Self::new(Address::Mesh(uid), port, Protocol::MeshRudp)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

/// Immutable (source, destination) pair identifying a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowKey {
    pub src: Endpoint,
    pub dst: Endpoint,
}

impl FlowKey {
    pub fn new(src: Endpoint, dst: Endpoint) -> Self {
        Self { src, dst }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.src, self.dst)
    }
}

/// Small numeric id addressing a live flow without its full key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowId(pub u16);

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Id and key of a flow, handed to the upper layer with every notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowInfo {
    pub id: FlowId,
    pub key: FlowKey,
}
