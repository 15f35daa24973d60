//! Per-flow RUDP timers, advanced by the engine's periodic tick.
//!
//! The retransmission timer (REMT) only counts while activated. Sending new
//! data re-activates it, seeding `seq` with the end of what was sent; an ACK
//! at or beyond `seq` deactivates it. On expiry the engine retransmits and
//! calls [`RetransmitTimer::backoff`], which restarts the count with the next
//! multiplier from the backoff table:
//!
//! ```text
//!   expires when  ticks * tick_ms >= rto_ms * backoff[shift]
//!
//!   shift:     0    1    2    3     4     5     6     7 ..
//!   rto(ms): 600  600  600  1200  1200  2400  4800  9600 ..
//! ```

/// Actions owed by one flow after a timer tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerActions(u8);

impl TimerActions {
    pub const NONE: Self = Self(0);
    /// A delayed ACK is due
    pub const ACK_NOW: Self = Self(0b01);
    /// The retransmission timer expired
    pub const RETRANSMIT: Self = Self(0b10);

    #[inline]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    #[inline]
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetransmitTimer {
    active: bool,
    /// Sequence number the outstanding data ends at
    seq: u32,
    ticks: u32,
    shift: usize,
}

impl RetransmitTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start counting from zero for data sent up to `seq`.
    pub fn activate(&mut self, seq: u32) {
        self.active = true;
        self.seq = seq;
        self.ticks = 0;
        self.shift = 0;
    }

    pub fn deactivate(&mut self) {
        self.active = false;
        self.seq = 0;
        self.ticks = 0;
        self.shift = 0;
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[inline]
    pub fn seq(&self) -> u32 {
        self.seq
    }

    #[inline]
    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    #[inline]
    pub fn shift(&self) -> usize {
        self.shift
    }

    /// Timeout for the current backoff step.
    pub fn current_rto(&self, rto_ms: u64, backoff: &[u32]) -> u64 {
        let multiplier = backoff
            .get(self.shift)
            .or_else(|| backoff.last())
            .copied()
            .unwrap_or(1);
        rto_ms * multiplier as u64
    }

    /// Count one tick. Returns true when the timeout has elapsed.
    pub fn tick(&mut self, tick_ms: u64, rto_ms: u64, backoff: &[u32]) -> bool {
        if !self.active {
            return false;
        }
        self.ticks += 1;
        self.ticks as u64 * tick_ms >= self.current_rto(rto_ms, backoff)
    }

    /// Restart the count after a retransmission, one backoff step further.
    pub fn backoff(&mut self, table_len: usize) {
        self.ticks = 0;
        if self.shift + 1 < table_len {
            self.shift += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BACKOFF: [u32; 13] = [1, 1, 1, 2, 2, 4, 8, 16, 16, 16, 16, 16, 16];

    fn ticks_until_expiry(timer: &mut RetransmitTimer) -> u32 {
        let mut n = 0;
        loop {
            n += 1;
            if timer.tick(100, 600, &BACKOFF) {
                return n;
            }
        }
    }

    #[test]
    fn test_inactive_timer_never_fires() {
        let mut timer = RetransmitTimer::new();
        for _ in 0..100 {
            assert!(!timer.tick(100, 600, &BACKOFF));
        }
        assert_eq!(timer.ticks(), 0);
    }

    #[test]
    fn test_backoff_schedule() {
        let mut timer = RetransmitTimer::new();
        timer.activate(1000);
        let mut schedule = Vec::new();
        for _ in 0..8 {
            schedule.push(ticks_until_expiry(&mut timer));
            timer.backoff(BACKOFF.len());
        }
        assert_eq!(schedule, vec![6, 6, 6, 12, 12, 24, 48, 96]);
    }

    #[test]
    fn test_shift_is_capped_at_table_end() {
        let mut timer = RetransmitTimer::new();
        timer.activate(1);
        for _ in 0..40 {
            timer.backoff(BACKOFF.len());
        }
        assert_eq!(timer.shift(), 12);
        assert_eq!(timer.current_rto(600, &BACKOFF), 9600);
    }

    #[test]
    fn test_activation_resets_backoff() {
        let mut timer = RetransmitTimer::new();
        timer.activate(10);
        timer.backoff(BACKOFF.len());
        timer.backoff(BACKOFF.len());
        timer.backoff(BACKOFF.len());
        timer.tick(100, 600, &BACKOFF);

        timer.activate(20);
        assert_eq!((timer.seq(), timer.ticks(), timer.shift()), (20, 0, 0));

        timer.deactivate();
        assert!(!timer.is_active());
    }

    #[test]
    fn test_actions() {
        let mut actions = TimerActions::NONE;
        assert!(actions.is_empty());
        assert!(!actions.contains(TimerActions::NONE));
        actions.insert(TimerActions::RETRANSMIT);
        assert!(actions.contains(TimerActions::RETRANSMIT));
        assert!(!actions.contains(TimerActions::ACK_NOW));
    }
}
