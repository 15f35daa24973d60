//! UDP header.

use bytemuck::{Pod, Zeroable};
use std::net::Ipv4Addr;

use crate::buffer::NetBuffer;
use crate::checksum::transport_checksum;
use crate::error::{CodecError, Result};
use crate::ipv4::IPPROTO_UDP;

pub const UDP_HEADER_SIZE: usize = 8;

/// UDP header (8 bytes, network byte order).
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct UdpHeader {
    src_port: [u8; 2],
    dst_port: [u8; 2],
    length: [u8; 2],
    checksum: [u8; 2],
}

impl UdpHeader {
    pub const SIZE: usize = UDP_HEADER_SIZE;

    #[inline]
    pub fn src_port(&self) -> u16 {
        u16::from_be_bytes(self.src_port)
    }

    #[inline]
    pub fn dst_port(&self) -> u16 {
        u16::from_be_bytes(self.dst_port)
    }

    /// Header plus payload length.
    #[inline]
    pub fn length(&self) -> u16 {
        u16::from_be_bytes(self.length)
    }

    #[inline]
    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes(self.checksum)
    }
}

/// Parsed view over one UDP datagram.
#[derive(Debug, Clone)]
pub struct UdpDatagram<'a> {
    pub header: UdpHeader,
    pub payload: &'a [u8],
}

impl<'a> UdpDatagram<'a> {
    pub fn parse(datagram: &'a [u8]) -> Result<Self> {
        if datagram.len() < UDP_HEADER_SIZE {
            return Err(CodecError::TooShort {
                expected: UDP_HEADER_SIZE,
                actual: datagram.len(),
            });
        }
        let header: UdpHeader = bytemuck::pod_read_unaligned(&datagram[..UDP_HEADER_SIZE]);
        let length = header.length() as usize;
        if length < UDP_HEADER_SIZE || length > datagram.len() {
            return Err(CodecError::Malformed("UDP"));
        }
        Ok(Self {
            header,
            payload: &datagram[UDP_HEADER_SIZE..length],
        })
    }

    /// A zero checksum means the sender did not compute one.
    pub fn verify_checksum(&self, src: Ipv4Addr, dst: Ipv4Addr) -> bool {
        if self.header.checksum() == 0 {
            return true;
        }
        let mut bytes = Vec::with_capacity(UDP_HEADER_SIZE + self.payload.len());
        bytes.extend_from_slice(bytemuck::bytes_of(&self.header));
        bytes.extend_from_slice(self.payload);
        transport_checksum(src, dst, IPPROTO_UDP, &bytes) == 0
    }
}

/// Prepends a UDP header to a backward-mode buffer.
#[derive(Debug, Clone)]
pub struct UdpHeaderBuilder {
    src_port: u16,
    dst_port: u16,
}

impl UdpHeaderBuilder {
    pub fn new(src_port: u16, dst_port: u16) -> Self {
        Self { src_port, dst_port }
    }

    pub fn build(&self, buf: &mut NetBuffer, src: Ipv4Addr, dst: Ipv4Addr) -> Result<UdpHeader> {
        if !buf.is_backward() {
            return Err(CodecError::WrongDirection);
        }
        let length = (UDP_HEADER_SIZE + buf.len()) as u16;
        let mut header = UdpHeader {
            src_port: self.src_port.to_be_bytes(),
            dst_port: self.dst_port.to_be_bytes(),
            length: length.to_be_bytes(),
            checksum: [0, 0],
        };
        buf.prepend(bytemuck::bytes_of(&header))?;

        let mut checksum = transport_checksum(src, dst, IPPROTO_UDP, buf.as_slice());
        if checksum == 0 {
            // All-zero means "no checksum" on the wire
            checksum = 0xffff;
        }
        buf.put_u16(6, checksum)?;
        header.checksum = checksum.to_be_bytes();
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_then_parse() {
        let src = Ipv4Addr::new(10, 0, 0, 2);
        let dst = Ipv4Addr::new(10, 0, 0, 1);
        let mut buf = NetBuffer::backward_with_payload(b"dns answer");
        UdpHeaderBuilder::new(53, 41000).build(&mut buf, src, dst).unwrap();

        let dgram = UdpDatagram::parse(buf.as_slice()).unwrap();
        assert_eq!(dgram.header.src_port(), 53);
        assert_eq!(dgram.header.dst_port(), 41000);
        assert_eq!(dgram.header.length(), 18);
        assert_eq!(dgram.payload, b"dns answer");
        assert!(dgram.verify_checksum(src, dst));
        assert!(!dgram.verify_checksum(src, Ipv4Addr::new(10, 0, 0, 3)));
    }

    #[test]
    fn test_length_beyond_frame_is_malformed() {
        let raw = [0, 53, 0, 53, 0, 40, 0, 0, 1, 2];
        assert_eq!(UdpDatagram::parse(&raw).unwrap_err(), CodecError::Malformed("UDP"));
    }
}
