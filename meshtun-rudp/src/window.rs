//! Out-of-order bookkeeping on both sides of a flow.
//!
//! The receiver parks segments that arrive beyond a gap in a
//! [`ReorderWindow`] and reports what it holds as EACK ranges. The sender
//! keeps the ranges it was told about in an [`EackScoreboard`] so a
//! retransmission can skip bytes the peer already has.
//!
//! ```text
//!   next (= ack)
//!      │  gap        held         gap      held
//!      ▼─────────┬───────────┬─────────┬─────────┐
//!      │ missing │ 5842..7302│ missing │ 8762..  │
//!      └─────────┴───────────┴─────────┴─────────┘
//!   EACK ranges: [(5842, 7302), (8762, ..)]   (end exclusive)
//! ```
//!
//! Sequence numbers are compared with wraparound arithmetic throughout.

use meshtun::seq::{seq_cmp, seq_diff, seq_gt, seq_le, seq_lt};

/// Outcome of offering an out-of-order segment to the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reassembly {
    Buffered,
    /// Already held (or already delivered)
    Duplicate,
    /// Beyond the receive window, or the window is full
    OutOfWindow,
}

#[derive(Debug, Clone)]
pub struct ReorderWindow {
    /// Held segments sorted by sequence number
    segments: Vec<(u32, Vec<u8>)>,
    bytes: usize,
    capacity: usize,
}

impl ReorderWindow {
    /// Window holding at most `capacity` bytes ahead of the next expected one.
    pub fn new(capacity: usize) -> Self {
        Self {
            segments: Vec::new(),
            bytes: 0,
            capacity,
        }
    }

    /// Hold `data` starting at `seq` while `next` is still missing.
    pub fn insert(&mut self, next: u32, seq: u32, data: &[u8]) -> Reassembly {
        let offset = seq_diff(seq, next);
        if offset <= 0 {
            return Reassembly::Duplicate;
        }
        if data.is_empty() || offset as usize + data.len() > self.capacity {
            return Reassembly::OutOfWindow;
        }
        let end = seq.wrapping_add(data.len() as u32);
        let held = self.segments.iter().any(|(s, d)| {
            let held_end = s.wrapping_add(d.len() as u32);
            seq_le(*s, seq) && seq_le(end, held_end)
        });
        if held {
            return Reassembly::Duplicate;
        }
        if self.bytes + data.len() > self.capacity {
            return Reassembly::OutOfWindow;
        }

        let at = self
            .segments
            .iter()
            .position(|(s, _)| seq_lt(seq, *s))
            .unwrap_or(self.segments.len());
        self.segments.insert(at, (seq, data.to_vec()));
        self.bytes += data.len();
        Reassembly::Buffered
    }

    /// Take the held segments that are now contiguous with `next`, advancing
    /// it past them. Overlap with bytes already delivered is trimmed.
    pub fn drain_ready(&mut self, next: &mut u32) -> Vec<Vec<u8>> {
        let mut ready = Vec::new();
        while let Some((seq, _)) = self.segments.first() {
            if seq_gt(*seq, *next) {
                break;
            }
            let (seq, data) = self.segments.remove(0);
            self.bytes -= data.len();
            let end = seq.wrapping_add(data.len() as u32);
            if seq_gt(end, *next) {
                let skip = next.wrapping_sub(seq) as usize;
                ready.push(data[skip..].to_vec());
                *next = end;
            }
        }
        ready
    }

    /// Held data as merged `(start, end)` ranges, at most `max` of them.
    pub fn ranges(&self, max: usize) -> Vec<(u32, u32)> {
        let mut ranges: Vec<(u32, u32)> = Vec::new();
        for (seq, data) in &self.segments {
            let end = seq.wrapping_add(data.len() as u32);
            match ranges.last_mut() {
                Some(last) if seq_le(*seq, last.1) => {
                    if seq_gt(end, last.1) {
                        last.1 = end;
                    }
                }
                _ => {
                    if ranges.len() == max {
                        break;
                    }
                    ranges.push((*seq, end));
                }
            }
        }
        ranges
    }

    /// Number of held segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn buffered_bytes(&self) -> usize {
        self.bytes
    }

    pub fn clear(&mut self) {
        self.segments.clear();
        self.bytes = 0;
    }
}

/// Ranges the peer reported holding beyond our oldest unacknowledged byte.
#[derive(Debug, Clone, Default)]
pub struct EackScoreboard {
    ranges: Vec<(u32, u32)>,
}

impl EackScoreboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge ranges from an EACK. Ranges outside `(acked, sent]` are ignored.
    pub fn record(&mut self, acked: u32, sent: u32, reported: &[(u32, u32)]) {
        for &(start, end) in reported {
            if !seq_lt(start, end) || seq_le(end, acked) || seq_gt(end, sent) {
                continue;
            }
            let start = if seq_lt(start, acked) { acked } else { start };
            self.ranges.push((start, end));
        }
        self.ranges.sort_by(|a, b| seq_cmp(a.0, b.0));
        let mut merged: Vec<(u32, u32)> = Vec::with_capacity(self.ranges.len());
        for (start, end) in self.ranges.drain(..) {
            match merged.last_mut() {
                Some(last) if seq_le(start, last.1) => {
                    if seq_gt(end, last.1) {
                        last.1 = end;
                    }
                }
                _ => merged.push((start, end)),
            }
        }
        self.ranges = merged;
    }

    /// Forget everything at or below `acked`.
    pub fn prune(&mut self, acked: u32) {
        self.ranges.retain(|&(_, end)| seq_gt(end, acked));
        for range in &mut self.ranges {
            if seq_lt(range.0, acked) {
                range.0 = acked;
            }
        }
    }

    /// End of the reported range containing `seq`.
    pub fn covering(&self, seq: u32) -> Option<u32> {
        self.ranges
            .iter()
            .find(|&&(start, end)| seq_le(start, seq) && seq_lt(seq, end))
            .map(|&(_, end)| end)
    }

    /// Start of the first reported range beyond `seq`.
    pub fn next_start(&self, seq: u32) -> Option<u32> {
        self.ranges
            .iter()
            .find(|&&(start, _)| seq_gt(start, seq))
            .map(|&(start, _)| start)
    }

    pub fn ranges(&self) -> &[(u32, u32)] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gap_fill_delivers_in_order() {
        let mut window = ReorderWindow::new(8000);
        let mut next = 100;
        assert_eq!(window.insert(next, 110, b"bbbbb"), Reassembly::Buffered);
        assert_eq!(window.insert(next, 115, b"ccc"), Reassembly::Buffered);
        assert!(window.drain_ready(&mut next).is_empty(), "gap at 100 still open");

        // in-order bytes 100..110 delivered by the caller
        next = 110;
        let ready = window.drain_ready(&mut next);
        assert_eq!(ready, vec![b"bbbbb".to_vec(), b"ccc".to_vec()]);
        assert_eq!(next, 118);
        assert!(window.is_empty());
        assert_eq!(window.buffered_bytes(), 0);
    }

    #[test]
    fn test_duplicates_are_held_once() {
        let mut window = ReorderWindow::new(8000);
        assert_eq!(window.insert(1, 50, b"xyz"), Reassembly::Buffered);
        assert_eq!(window.insert(1, 50, b"xyz"), Reassembly::Duplicate);
        assert_eq!(window.insert(1, 51, b"y"), Reassembly::Duplicate);
        assert_eq!(window.insert(1, 1, b"a"), Reassembly::Duplicate, "not beyond the gap");
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn test_window_bounds() {
        let mut window = ReorderWindow::new(10);
        assert_eq!(window.insert(0, 5, b"123456"), Reassembly::OutOfWindow);
        assert_eq!(window.insert(0, 5, b"12345"), Reassembly::Buffered);
    }

    #[test]
    fn test_overlapping_segment_is_trimmed() {
        let mut window = ReorderWindow::new(100);
        window.insert(0, 4, b"efgh");
        let mut next = 6;
        assert_eq!(window.drain_ready(&mut next), vec![b"gh".to_vec()]);
        assert_eq!(next, 8);
    }

    #[test]
    fn test_ranges_merge_and_cap() {
        let mut window = ReorderWindow::new(8000);
        window.insert(0, 10, &[0; 10]);
        window.insert(0, 20, &[0; 5]);
        window.insert(0, 40, &[0; 5]);
        window.insert(0, 60, &[0; 5]);
        assert_eq!(window.ranges(8), vec![(10, 25), (40, 45), (60, 65)]);
        assert_eq!(window.ranges(2), vec![(10, 25), (40, 45)]);
    }

    #[test]
    fn test_ranges_across_wrap() {
        let mut window = ReorderWindow::new(8000);
        let next = u32::MAX - 20;
        window.insert(next, u32::MAX - 4, &[0; 10]);
        assert_eq!(window.ranges(8), vec![(u32::MAX - 4, 5)]);
    }

    #[test]
    fn test_scoreboard_merges_and_prunes() {
        let mut board = EackScoreboard::new();
        board.record(100, 1000, &[(300, 400), (200, 250), (380, 500)]);
        assert_eq!(board.ranges(), &[(200, 250), (300, 500)]);

        board.record(100, 1000, &[(50, 90), (900, 1200), (10, 5)]);
        assert_eq!(board.ranges().len(), 2, "stale, unsent and inverted ranges ignored");

        assert_eq!(board.covering(320), Some(500));
        assert_eq!(board.covering(250), None, "end is exclusive");
        assert_eq!(board.next_start(250), Some(300));

        board.prune(320);
        assert_eq!(board.ranges(), &[(320, 500)]);
        board.prune(500);
        assert!(board.is_empty());
    }
}
