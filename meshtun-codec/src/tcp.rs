//! TCP header and the option subset the tunnel endpoint negotiates.

use bytemuck::{Pod, Zeroable};
use std::net::Ipv4Addr;

use crate::buffer::NetBuffer;
use crate::checksum::transport_checksum;
use crate::error::{CodecError, Result};
use crate::ipv4::IPPROTO_TCP;

/// Header size without options.
pub const TCP_HEADER_SIZE: usize = 20;

pub const TCP_FIN: u8 = 0x01;
pub const TCP_SYN: u8 = 0x02;
pub const TCP_RST: u8 = 0x04;
pub const TCP_PSH: u8 = 0x08;
pub const TCP_ACK: u8 = 0x10;
pub const TCP_URG: u8 = 0x20;

const OPT_EOL: u8 = 0;
const OPT_NOP: u8 = 1;
const OPT_MSS: u8 = 2;
const OPT_WS: u8 = 3;
const OPT_SACK_PERMITTED: u8 = 4;

/// Largest header the data-offset nibble can express.
const MAX_HEADER_SIZE: usize = 60;

/// TCP option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpOption {
    /// Maximum segment size
    Mss(u16),
    /// Window scale shift count
    WindowScale(u8),
    /// SACK permitted
    SackPermitted,
    /// Any other option kind, skipped on parse
    Unknown(u8),
}

impl TcpOption {
    /// Encoded length in bytes.
    pub fn encoded_len(&self) -> usize {
        match self {
            TcpOption::Mss(_) => 4,
            TcpOption::WindowScale(_) => 3,
            TcpOption::SackPermitted => 2,
            TcpOption::Unknown(_) => 0,
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        match *self {
            TcpOption::Mss(mss) => {
                out.extend_from_slice(&[OPT_MSS, 4]);
                out.extend_from_slice(&mss.to_be_bytes());
            }
            TcpOption::WindowScale(shift) => out.extend_from_slice(&[OPT_WS, 3, shift]),
            TcpOption::SackPermitted => out.extend_from_slice(&[OPT_SACK_PERMITTED, 2]),
            TcpOption::Unknown(_) => {}
        }
    }
}

/// Fixed part of the TCP header (20 bytes, network byte order).
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct TcpHeader {
    src_port: [u8; 2],
    dst_port: [u8; 2],
    seq: [u8; 4],
    ack: [u8; 4],
    /// Data offset in 32-bit words, upper nibble
    pub data_offset: u8,
    pub flags: u8,
    window: [u8; 2],
    checksum: [u8; 2],
    urgent: [u8; 2],
}

impl TcpHeader {
    pub const SIZE: usize = TCP_HEADER_SIZE;

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
    pub fn window(&self) -> u16 {
        u16::from_be_bytes(self.window)
    }

    #[inline]
    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes(self.checksum)
    }

    /// Header length in bytes, options included.
    #[inline]
    pub fn header_len(&self) -> usize {
        ((self.data_offset >> 4) as usize) * 4
    }

    #[inline]
    pub fn is_syn(&self) -> bool {
        self.flags & TCP_SYN != 0
    }

    #[inline]
    pub fn is_ack(&self) -> bool {
        self.flags & TCP_ACK != 0
    }

    #[inline]
    pub fn is_fin(&self) -> bool {
        self.flags & TCP_FIN != 0
    }

    #[inline]
    pub fn is_rst(&self) -> bool {
        self.flags & TCP_RST != 0
    }
}

/// Parsed view over one TCP segment (header, options and payload).
#[derive(Debug, Clone)]
pub struct TcpSegment<'a> {
    pub header: TcpHeader,
    pub options: Vec<TcpOption>,
    /// Offset of the payload from the start of the segment
    pub payload_offset: usize,
    pub payload: &'a [u8],
}

impl<'a> TcpSegment<'a> {
    /// Parse a segment occupying all of `segment`.
    pub fn parse(segment: &'a [u8]) -> Result<Self> {
        if segment.len() < TCP_HEADER_SIZE {
            return Err(CodecError::TooShort {
                expected: TCP_HEADER_SIZE,
                actual: segment.len(),
            });
        }
        let header: TcpHeader = bytemuck::pod_read_unaligned(&segment[..TCP_HEADER_SIZE]);
        let header_len = header.header_len();
        if header_len < TCP_HEADER_SIZE || header_len > segment.len() {
            return Err(CodecError::Malformed("TCP"));
        }
        let options = parse_options(&segment[TCP_HEADER_SIZE..header_len])?;
        Ok(Self {
            header,
            options,
            payload_offset: header_len,
            payload: &segment[header_len..],
        })
    }

    pub fn mss(&self) -> Option<u16> {
        self.options.iter().find_map(|o| match o {
            TcpOption::Mss(mss) => Some(*mss),
            _ => None,
        })
    }

    /// Advertised window scale, 0 when the option is absent.
    pub fn window_scale(&self) -> u8 {
        self.options
            .iter()
            .find_map(|o| match o {
                TcpOption::WindowScale(ws) => Some(*ws),
                _ => None,
            })
            .unwrap_or(0)
    }

    pub fn sack_permitted(&self) -> bool {
        self.options.contains(&TcpOption::SackPermitted)
    }
}

fn parse_options(mut raw: &[u8]) -> Result<Vec<TcpOption>> {
    let mut options = Vec::new();
    while let Some(&kind) = raw.first() {
        match kind {
            OPT_EOL => break,
            OPT_NOP => {
                raw = &raw[1..];
                continue;
            }
            _ => {}
        }
        let len = *raw.get(1).ok_or(CodecError::Malformed("TCP option"))? as usize;
        if len < 2 || len > raw.len() {
            return Err(CodecError::Malformed("TCP option"));
        }
        let body = &raw[2..len];
        let option = match (kind, body.len()) {
            (OPT_MSS, 2) => TcpOption::Mss(u16::from_be_bytes([body[0], body[1]])),
            (OPT_WS, 1) => TcpOption::WindowScale(body[0]),
            (OPT_SACK_PERMITTED, 0) => TcpOption::SackPermitted,
            _ => TcpOption::Unknown(kind),
        };
        options.push(option);
        raw = &raw[len..];
    }
    Ok(options)
}

/// Verify a segment's checksum against its pseudo header.
pub fn verify_checksum(src: Ipv4Addr, dst: Ipv4Addr, segment: &[u8]) -> bool {
    transport_checksum(src, dst, IPPROTO_TCP, segment) == 0
}

/// Prepends a TCP header (with options) to a backward-mode buffer.
#[derive(Debug, Clone, Default)]
pub struct TcpHeaderBuilder {
    src_port: u16,
    dst_port: u16,
    seq: u32,
    ack: u32,
    flags: u8,
    window: u16,
    options: Vec<TcpOption>,
}

impl TcpHeaderBuilder {
    pub fn new(src_port: u16, dst_port: u16) -> Self {
        Self {
            src_port,
            dst_port,
            ..Default::default()
        }
    }

    pub fn seq(mut self, seq: u32) -> Self {
        self.seq = seq;
        self
    }

    pub fn ack(mut self, ack: u32) -> Self {
        self.ack = ack;
        self
    }

    pub fn flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    pub fn window(mut self, window: u16) -> Self {
        self.window = window;
        self
    }

    pub fn options(mut self, options: Vec<TcpOption>) -> Self {
        self.options = options;
        self
    }

    /// Option bytes padded to a 4-byte boundary.
    fn encoded_options(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(MAX_HEADER_SIZE - TCP_HEADER_SIZE);
        for option in &self.options {
            option.encode(&mut out);
        }
        while out.len() % 4 != 0 {
            out.push(OPT_EOL);
        }
        out
    }

    /// Prepend the header and fill in the checksum over header plus payload.
    pub fn build(&self, buf: &mut NetBuffer, src: Ipv4Addr, dst: Ipv4Addr) -> Result<TcpHeader> {
        if !buf.is_backward() {
            return Err(CodecError::WrongDirection);
        }
        let options = self.encoded_options();
        let header_len = TCP_HEADER_SIZE + options.len();
        if header_len > MAX_HEADER_SIZE {
            return Err(CodecError::Malformed("TCP option"));
        }

        let mut header = TcpHeader {
            src_port: self.src_port.to_be_bytes(),
            dst_port: self.dst_port.to_be_bytes(),
            seq: self.seq.to_be_bytes(),
            ack: self.ack.to_be_bytes(),
            data_offset: ((header_len / 4) as u8) << 4,
            flags: self.flags,
            window: self.window.to_be_bytes(),
            checksum: [0, 0],
            urgent: [0, 0],
        };
        buf.prepend(&options)?;
        buf.prepend(bytemuck::bytes_of(&header))?;

        let checksum = transport_checksum(src, dst, IPPROTO_TCP, buf.as_slice());
        buf.put_u16(16, checksum)?;
        header.checksum = checksum.to_be_bytes();
        Ok(header)
    }
}
