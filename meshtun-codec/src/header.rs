//! Mesh reliable-UDP header.

use bytemuck::{Pod, Zeroable};

use crate::buffer::NetBuffer;
use crate::error::{CodecError, Result};

/// Mesh RUDP header size in bytes.
pub const RUDP_HEADER_SIZE: usize = 16;

/// Mesh protocol numbers carried in the first header byte.
pub const MESH_PROTO_ICMP: u8 = 1;
pub const MESH_PROTO_RUDP: u8 = 6;
pub const MESH_PROTO_UDP: u8 = 17;

pub const RUDP_FIN: u8 = 0x01;
pub const RUDP_SYN: u8 = 0x02;
pub const RUDP_RST: u8 = 0x04;
/// Extended ACK: payload lists out-of-order ranges held by the receiver
pub const RUDP_EAK: u8 = 0x08;
pub const RUDP_ACK: u8 = 0x10;
pub const RUDP_URG: u8 = 0x20;
pub const RUDP_ECE: u8 = 0x40;
pub const RUDP_CWR: u8 = 0x80;

/// One EACK range on the wire: start (u32) + end (u32), end exclusive.
pub const EAK_RANGE_SIZE: usize = 8;

/// Mesh RUDP header (16 bytes, network byte order).
///
/// Layout:
/// ```text
/// Offset  Size  Field
/// 0       1     protocol (6 = RUDP)
/// 1       1     flags (FIN SYN RST EAK ACK URG ECE CWR)
/// 2       2     window
/// 4       2     source port
/// 6       2     destination port
/// 8       4     sequence number
/// 12      4     acknowledgement number
/// ```
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct RudpHeader {
    pub protocol: u8,
    pub flags: u8,
    window: [u8; 2],
    src_port: [u8; 2],
    dst_port: [u8; 2],
    seq: [u8; 4],
    ack: [u8; 4],
}

impl RudpHeader {
    pub const SIZE: usize = RUDP_HEADER_SIZE;

    /// Parse from the start of `buf`; the payload follows at [`Self::SIZE`].
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(CodecError::TooShort {
                expected: Self::SIZE,
                actual: buf.len(),
            });
        }
        let header: Self = bytemuck::pod_read_unaligned(&buf[..Self::SIZE]);
        if header.protocol != MESH_PROTO_RUDP {
            return Err(CodecError::Malformed("mesh RUDP"));
        }
        Ok(header)
    }

    #[inline]
    pub fn window(&self) -> u16 {
        u16::from_be_bytes(self.window)
    }

    #[inline]
    pub fn src_port(&self) -> u16 {
        u16::from_be_bytes(self.src_port)
    }

    #[inline]
    pub fn dst_port(&self) -> u16 {
        u16::from_be_bytes(self.dst_port)
    }

    #[inline]
    pub fn seq(&self) -> u32 {
        u32::from_be_bytes(self.seq)
    }

    #[inline]
    pub fn ack(&self) -> u32 {
        u32::from_be_bytes(self.ack)
    }

    #[inline]
    pub fn has(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    #[inline]
    pub fn to_bytes(&self) -> [u8; RUDP_HEADER_SIZE] {
        let mut out = [0u8; RUDP_HEADER_SIZE];
        out.copy_from_slice(bytemuck::bytes_of(self));
        out
    }

    /// Encode EACK ranges as the payload of an ACK|EAK packet.
    pub fn encode_eak_ranges(ranges: &[(u32, u32)]) -> Vec<u8> {
        let mut out = Vec::with_capacity(ranges.len() * EAK_RANGE_SIZE);
        for &(start, end) in ranges {
            out.extend_from_slice(&start.to_be_bytes());
            out.extend_from_slice(&end.to_be_bytes());
        }
        out
    }

    /// Decode the ranges carried by an EACK payload.
    pub fn decode_eak_ranges(payload: &[u8]) -> Result<Vec<(u32, u32)>> {
        if payload.len() % EAK_RANGE_SIZE != 0 {
            return Err(CodecError::Malformed("EACK"));
        }
        Ok(payload
            .chunks_exact(EAK_RANGE_SIZE)
            .map(|c| {
                (
                    u32::from_be_bytes([c[0], c[1], c[2], c[3]]),
                    u32::from_be_bytes([c[4], c[5], c[6], c[7]]),
                )
            })
            .collect())
    }
}

/// Prepends a mesh RUDP header to a backward-mode buffer.
#[derive(Debug, Clone, Default)]
pub struct RudpHeaderBuilder {
    flags: u8,
    window: u16,
    src_port: u16,
    dst_port: u16,
    seq: u32,
    ack: u32,
}

impl RudpHeaderBuilder {
    pub fn new(src_port: u16, dst_port: u16) -> Self {
        Self {
            src_port,
            dst_port,
            ..Default::default()
        }
    }

    pub fn flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    pub fn window(mut self, window: u16) -> Self {
        self.window = window;
        self
    }

    pub fn seq(mut self, seq: u32) -> Self {
        self.seq = seq;
        self
    }

    pub fn ack(mut self, ack: u32) -> Self {
        self.ack = ack;
        self
    }

    pub fn build(&self, buf: &mut NetBuffer) -> Result<RudpHeader> {
        if !buf.is_backward() {
            return Err(CodecError::WrongDirection);
        }
        let header = RudpHeader {
            protocol: MESH_PROTO_RUDP,
            flags: self.flags,
            window: self.window.to_be_bytes(),
            src_port: self.src_port.to_be_bytes(),
            dst_port: self.dst_port.to_be_bytes(),
            seq: self.seq.to_be_bytes(),
            ack: self.ack.to_be_bytes(),
        };
        buf.prepend(bytemuck::bytes_of(&header))?;
        Ok(header)
    }
}
