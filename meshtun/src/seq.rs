//! 32-bit sequence-number arithmetic with wraparound.
//!
//! Two sequence numbers are compared by the sign of their difference taken
//! modulo 2^32, so ordering stays correct across the wrap point as long as
//! the values are within 2^31 of each other.

use std::cmp::Ordering;

/// Signed distance `a - b`.
#[inline]
pub fn seq_diff(a: u32, b: u32) -> i32 {
    a.wrapping_sub(b) as i32
}

/// Wraparound-safe ordering of `a` relative to `b`.
#[inline]
pub fn seq_cmp(a: u32, b: u32) -> Ordering {
    seq_diff(a, b).cmp(&0)
}

#[inline]
pub fn seq_lt(a: u32, b: u32) -> bool {
    seq_diff(a, b) < 0
}

#[inline]
pub fn seq_le(a: u32, b: u32) -> bool {
    seq_diff(a, b) <= 0
}

#[inline]
pub fn seq_gt(a: u32, b: u32) -> bool {
    seq_diff(a, b) > 0
}

#[inline]
pub fn seq_ge(a: u32, b: u32) -> bool {
    seq_diff(a, b) >= 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_ordering() {
        assert!(seq_lt(1, 2));
        assert!(seq_gt(2, 1));
        assert!(seq_le(5, 5) && seq_ge(5, 5));
        assert_eq!(seq_cmp(7, 7), Ordering::Equal);
    }

    #[test]
    fn test_ordering_across_wrap() {
        let before = u32::MAX - 10;
        let after = 5u32;
        assert!(seq_lt(before, after));
        assert!(seq_gt(after, before));
        assert_eq!(seq_diff(after, before), 16);
        assert_eq!(seq_cmp(before, after), Ordering::Less);
    }

    #[test]
    fn test_unacked_bytes_across_wrap() {
        // sendSeq wrapped past zero while acked has not
        let acked = u32::MAX - 99;
        let send_seq = acked.wrapping_add(500);
        assert_eq!(send_seq.wrapping_sub(acked), 500);
        assert_eq!(seq_diff(send_seq, acked), 500);
    }
}
