//! UDP control block: a flow id and an idle counter.

use meshtun::FlowInfo;

#[derive(Debug, Clone)]
pub struct Ucb {
    info: FlowInfo,
    pub(crate) idle_ticks: u32,
}

impl Ucb {
    pub(crate) fn new(info: FlowInfo) -> Self {
        Self { info, idle_ticks: 0 }
    }

    #[inline]
    pub fn info(&self) -> &FlowInfo {
        &self.info
    }

    /// Sweeps since the last datagram in either direction.
    #[inline]
    pub fn idle_ticks(&self) -> u32 {
        self.idle_ticks
    }
}
