//! Pending outbound bytes of one flow.
//!
//! Chunks are queued in write order. The front of the queue is the oldest
//! unacknowledged byte (`acked`); bytes between `acked` and `sendSeq` are in
//! flight, everything after is not yet sent. Offsets passed in are relative
//! to the front.

use std::collections::VecDeque;

#[derive(Debug, Default, Clone)]
pub struct SendBuffer {
    chunks: VecDeque<Vec<u8>>,
    len: usize,
}

impl SendBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a chunk. Empty chunks are ignored.
    pub fn push(&mut self, chunk: Vec<u8>) {
        if chunk.is_empty() {
            return;
        }
        self.len += chunk.len();
        self.chunks.push_back(chunk);
    }

    /// Total queued bytes, in flight and unsent.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy up to `max_len` bytes starting at `offset`.
    ///
    /// `None` when there is nothing at `offset` or `max_len` is zero. The
    /// copy may span chunk boundaries.
    pub fn slice(&self, offset: usize, max_len: usize) -> Option<Vec<u8>> {
        if max_len == 0 || offset >= self.len {
            return None;
        }
        let want = max_len.min(self.len - offset);
        let mut out = Vec::with_capacity(want);
        let mut skip = offset;
        for chunk in &self.chunks {
            if skip >= chunk.len() {
                skip -= chunk.len();
                continue;
            }
            let take = (chunk.len() - skip).min(want - out.len());
            out.extend_from_slice(&chunk[skip..skip + take]);
            skip = 0;
            if out.len() == want {
                break;
            }
        }
        Some(out)
    }

    /// Drop `n` acknowledged bytes from the front.
    ///
    /// Returns how many of the `n` bytes were beyond the queued data, e.g.
    /// the sequence slot taken by a FIN.
    pub fn drop_front(&mut self, n: usize) -> usize {
        let mut left = n;
        while left > 0 {
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            if front.len() > left {
                front.drain(..left);
                self.len -= left;
                left = 0;
            } else {
                left -= front.len();
                self.len -= front.len();
                self.chunks.pop_front();
            }
        }
        left
    }

    /// Discard everything after the first `keep` bytes (the in-flight part).
    pub fn truncate(&mut self, keep: usize) {
        if keep >= self.len {
            return;
        }
        let mut kept = 0;
        let mut retained = VecDeque::with_capacity(self.chunks.len());
        while let Some(mut chunk) = self.chunks.pop_front() {
            if kept >= keep {
                break;
            }
            if kept + chunk.len() > keep {
                chunk.truncate(keep - kept);
            }
            kept += chunk.len();
            retained.push_back(chunk);
        }
        self.chunks = retained;
        self.len = kept;
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled() -> SendBuffer {
        let mut buf = SendBuffer::new();
        buf.push(b"hello ".to_vec());
        buf.push(b"mesh ".to_vec());
        buf.push(b"world".to_vec());
        buf
    }

    #[test]
    fn test_slice_spans_chunks() {
        let buf = filled();
        assert_eq!(buf.len(), 16);
        assert_eq!(buf.slice(4, 5).unwrap(), b"o mes");
        assert_eq!(buf.slice(11, 100).unwrap(), b"world");
        assert!(buf.slice(16, 4).is_none());
        assert!(buf.slice(0, 0).is_none());
    }

    #[test]
    fn test_drop_front_partial_chunk() {
        let mut buf = filled();
        assert_eq!(buf.drop_front(8), 0);
        assert_eq!(buf.len(), 8);
        assert_eq!(buf.slice(0, 8).unwrap(), b"sh world");
    }

    #[test]
    fn test_drop_front_reports_excess() {
        let mut buf = filled();
        // 16 data bytes plus one FIN
        assert_eq!(buf.drop_front(17), 1);
        assert!(buf.is_empty());
        assert_eq!(SendBuffer::new().drop_front(3), 3);
    }

    #[test]
    fn test_truncate_keeps_in_flight_prefix() {
        let mut buf = filled();
        buf.truncate(8);
        assert_eq!(buf.len(), 8);
        assert_eq!(buf.slice(0, 100).unwrap(), b"hello me");

        buf.truncate(0);
        assert!(buf.is_empty());
    }
}
