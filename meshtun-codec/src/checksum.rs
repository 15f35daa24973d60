//! RFC 1071 Internet checksum.

use std::net::Ipv4Addr;

/// Add `data` to a running one's-complement sum.
#[inline]
pub fn sum(data: &[u8], initial: u32) -> u32 {
    let mut acc = initial;
    let mut chunks = data.chunks_exact(2);
    for pair in &mut chunks {
        acc = acc.wrapping_add(u16::from_be_bytes([pair[0], pair[1]]) as u32);
    }
    if let [last] = chunks.remainder() {
        acc = acc.wrapping_add((*last as u32) << 8);
    }
    acc
}

/// Fold a running sum into the final 16-bit checksum.
#[inline]
pub fn finish(mut acc: u32) -> u16 {
    while acc >> 16 != 0 {
        acc = (acc & 0xffff) + (acc >> 16);
    }
    !(acc as u16)
}

/// Checksum of a single contiguous region.
#[inline]
pub fn internet_checksum(data: &[u8]) -> u16 {
    finish(sum(data, 0))
}

/// Sum of the IPv4 pseudo header used by TCP and UDP.
pub fn pseudo_header_sum(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, length: u16) -> u32 {
    let mut acc = sum(&src.octets(), 0);
    acc = sum(&dst.octets(), acc);
    acc = acc.wrapping_add(protocol as u32);
    acc.wrapping_add(length as u32)
}

/// Transport checksum over pseudo header plus `segment` (header and payload).
pub fn transport_checksum(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, segment: &[u8]) -> u16 {
    let acc = pseudo_header_sum(src, dst, protocol, segment.len() as u16);
    finish(sum(segment, acc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc1071_example() {
        // Example from RFC 1071 section 3
        let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(internet_checksum(&data), !0xddf2);
    }

    #[test]
    fn test_odd_length_pads_with_zero() {
        assert_eq!(internet_checksum(&[0xab]), internet_checksum(&[0xab, 0x00]));
    }

    #[test]
    fn test_verifies_to_zero() {
        let mut data = vec![0x45, 0x00, 0x00, 0x1c, 0x12, 0x34, 0x40, 0x00, 0x40, 0x11];
        data.extend_from_slice(&[0, 0]);
        data.extend_from_slice(&[10, 0, 0, 1, 10, 0, 0, 2]);
        let csum = internet_checksum(&data);
        data[10..12].copy_from_slice(&csum.to_be_bytes());
        assert_eq!(internet_checksum(&data), 0);
    }
}
