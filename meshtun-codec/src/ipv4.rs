//! IPv4 header.

use bytemuck::{Pod, Zeroable};
use std::net::Ipv4Addr;

use crate::buffer::NetBuffer;
use crate::checksum::internet_checksum;
use crate::error::{CodecError, Result};

/// Header size without options.
pub const IPV4_HEADER_SIZE: usize = 20;

pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;

const DEFAULT_TTL: u8 = 64;
const FLAG_DONT_FRAGMENT: u16 = 0x4000;

/// IP version nibble of the frame starting at `buf[0]`.
#[inline]
pub fn ip_version(buf: &[u8]) -> Option<u8> {
    buf.first().map(|b| b >> 4)
}

/// Fixed part of the IPv4 header (20 bytes, network byte order).
///
/// Layout:
/// ```text
/// Offset  Size  Field
/// 0       1     version (4) | ihl (4)
/// 1       1     tos
/// 2       2     total_length
/// 4       2     identification
/// 6       2     flags (3) | fragment offset (13)
/// 8       1     ttl
/// 9       1     protocol
/// 10      2     checksum
/// 12      4     source
/// 16      4     destination
/// ```
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Ipv4Header {
    pub version_ihl: u8,
    pub tos: u8,
    total_length: [u8; 2],
    identification: [u8; 2],
    flags_fragment: [u8; 2],
    pub ttl: u8,
    pub protocol: u8,
    checksum: [u8; 2],
    source: [u8; 4],
    destination: [u8; 4],
}

impl Ipv4Header {
    pub const SIZE: usize = IPV4_HEADER_SIZE;

    /// Parse the fixed header from the start of `buf`.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(CodecError::TooShort {
                expected: Self::SIZE,
                actual: buf.len(),
            });
        }
        let header: Self = bytemuck::pod_read_unaligned(&buf[..Self::SIZE]);
        if header.version() != 4 {
            return Err(CodecError::Malformed("IPv4"));
        }
        let header_len = header.header_len();
        if header_len < Self::SIZE || buf.len() < header_len {
            return Err(CodecError::Malformed("IPv4"));
        }
        Ok(header)
    }

    #[inline]
    pub fn version(&self) -> u8 {
        self.version_ihl >> 4
    }

    /// Header length in bytes, options included.
    #[inline]
    pub fn header_len(&self) -> usize {
        ((self.version_ihl & 0x0f) as usize) * 4
    }

    #[inline]
    pub fn total_length(&self) -> u16 {
        u16::from_be_bytes(self.total_length)
    }

    #[inline]
    pub fn identification(&self) -> u16 {
        u16::from_be_bytes(self.identification)
    }

    #[inline]
    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes(self.checksum)
    }

    #[inline]
    pub fn source(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.source)
    }

    #[inline]
    pub fn destination(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.destination)
    }

    pub fn set_source(&mut self, addr: Ipv4Addr) {
        self.source = addr.octets();
    }

    pub fn set_destination(&mut self, addr: Ipv4Addr) {
        self.destination = addr.octets();
    }

    /// Recompute the header checksum over the fixed part.
    pub fn update_checksum(&mut self) {
        self.checksum = [0, 0];
        self.checksum = internet_checksum(bytemuck::bytes_of(self)).to_be_bytes();
    }

    /// Whether the stored checksum is valid for the fixed part.
    pub fn verify_checksum(&self) -> bool {
        internet_checksum(bytemuck::bytes_of(self)) == 0
    }

    /// Byte range of the transport segment inside a frame of `frame_len` bytes.
    ///
    /// Trailing link padding beyond `total_length` is excluded.
    pub fn payload_range(&self, frame_len: usize) -> Result<std::ops::Range<usize>> {
        let total = self.total_length() as usize;
        if total < self.header_len() || total > frame_len {
            return Err(CodecError::Malformed("IPv4"));
        }
        Ok(self.header_len()..total)
    }
}

/// Prepends an IPv4 header to a backward-mode buffer.
#[derive(Debug, Clone)]
pub struct Ipv4HeaderBuilder {
    source: Ipv4Addr,
    destination: Ipv4Addr,
    protocol: u8,
    identification: u16,
    ttl: u8,
}

impl Ipv4HeaderBuilder {
    pub fn new(source: Ipv4Addr, destination: Ipv4Addr, protocol: u8) -> Self {
        Self {
            source,
            destination,
            protocol,
            identification: 0,
            ttl: DEFAULT_TTL,
        }
    }

    pub fn identification(mut self, id: u16) -> Self {
        self.identification = id;
        self
    }

    pub fn ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    /// Prepend the header; total length covers everything already in `buf`.
    ///
    /// Fails on an unspecified source or destination: that is a caller bug,
    /// never a network condition.
    pub fn build(&self, buf: &mut NetBuffer) -> Result<Ipv4Header> {
        if !buf.is_backward() {
            return Err(CodecError::WrongDirection);
        }
        if self.source.is_unspecified() {
            return Err(CodecError::UnspecifiedAddress("source"));
        }
        if self.destination.is_unspecified() {
            return Err(CodecError::UnspecifiedAddress("destination"));
        }

        let total = (IPV4_HEADER_SIZE + buf.len()) as u16;
        let mut header = Ipv4Header {
            version_ihl: 0x45,
            tos: 0,
            total_length: total.to_be_bytes(),
            identification: self.identification.to_be_bytes(),
            flags_fragment: FLAG_DONT_FRAGMENT.to_be_bytes(),
            ttl: self.ttl,
            protocol: self.protocol,
            checksum: [0, 0],
            source: self.source.octets(),
            destination: self.destination.octets(),
        };
        header.update_checksum();
        buf.prepend(bytemuck::bytes_of(&header))?;
        Ok(header)
    }
}
