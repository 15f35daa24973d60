//! Reliable-UDP control block.
//!
//! ```text
//!                    acked                seq
//!   write buffer:  [ in flight ........... | unsent ....... ]
//!
//!   unacked            = seq - acked            (+1 while a FIN is unacked)
//!   remain_send_window = (send_window << send_ws) - unacked
//! ```
//!
//! Both ends number their stream from 1: the SYN takes sequence number 1 and
//! the first data byte of the connecting side is 2. The accepting side sends
//! no SYN, so its first data byte is 1.

use meshtun::{FlowInfo, PortGuard, RudpConfig, SendBuffer};
use meshtun_codec::RudpHeader;

use crate::timer::{RetransmitTimer, TimerActions};
use crate::window::{EackScoreboard, ReorderWindow};

/// Sequence number carried by a SYN.
pub(crate) const SYN_SEQ: u32 = 1;

/// Transient per-flow conditions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RucbFlags(u8);

impl RucbFlags {
    /// Data arrived and has not been acknowledged yet
    pub const DELAYED_ACK: Self = Self(0b01);
    /// Close requested while data was still unacknowledged
    pub const DO_FIN: Self = Self(0b10);

    #[inline]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    #[inline]
    pub fn take(&mut self, other: Self) -> bool {
        let set = self.contains(other);
        self.remove(other);
        set
    }
}

/// Connection states. Everything below `Established` is pre-connection,
/// everything above it is teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RucbState {
    Closed,
    /// SYN sent, nothing heard from the peer yet
    SynSent,
    Established,
    CloseWait,
    FinWait1,
    Closing,
    LastAck,
    FinWait2,
}

#[derive(Debug)]
pub struct Rucb {
    info: FlowInfo,
    pub(crate) state: RucbState,
    /// Next sequence number to send
    pub(crate) seq: u32,
    /// Next sequence number expected from the peer
    pub(crate) ack: u32,
    /// Oldest sequence number not yet acknowledged by the peer
    pub(crate) acked: u32,
    pub(crate) send_window: u16,
    pub(crate) send_ws: u8,
    pub(crate) recv_window: u16,
    pub(crate) recv_ws: u8,
    pub(crate) mss: u16,
    pub(crate) flags: RucbFlags,
    pub(crate) write: SendBuffer,
    pub(crate) reorder: ReorderWindow,
    pub(crate) eacked: EackScoreboard,
    pub(crate) rexmt: RetransmitTimer,
    pub(crate) dup_acks: u16,
    pub(crate) idle_ticks: u32,
    /// Local port leased by `connect`; `None` on the accepting side
    pub(crate) port: Option<PortGuard>,
}

impl Rucb {
    fn with_config(info: FlowInfo, state: RucbState, config: &RudpConfig) -> Self {
        let mut rucb = Self {
            info,
            state,
            seq: SYN_SEQ,
            ack: SYN_SEQ,
            acked: SYN_SEQ,
            send_window: config.window,
            send_ws: config.window_scale,
            recv_window: config.window,
            recv_ws: config.window_scale,
            mss: config.segment_size,
            flags: RucbFlags::default(),
            write: SendBuffer::new(),
            reorder: ReorderWindow::new(0),
            eacked: EackScoreboard::new(),
            rexmt: RetransmitTimer::new(),
            dup_acks: 0,
            idle_ticks: 0,
            port: None,
        };
        rucb.reorder = ReorderWindow::new(rucb.calculated_recv_window() as usize);
        rucb
    }

    /// Control block for a locally initiated flow, before its SYN goes out.
    pub(crate) fn connect(info: FlowInfo, config: &RudpConfig, port: PortGuard) -> Self {
        Self {
            port: Some(port),
            ..Self::with_config(info, RucbState::SynSent, config)
        }
    }

    /// Control block for a peer's SYN.
    pub(crate) fn accept(info: FlowInfo, syn: &RudpHeader, config: &RudpConfig) -> Self {
        let mut rucb = Self::with_config(info, RucbState::Established, config);
        rucb.ack = syn.seq().wrapping_add(1);
        if syn.window() != 0 {
            rucb.send_window = syn.window();
        }
        rucb
    }

    #[inline]
    pub fn info(&self) -> &FlowInfo {
        &self.info
    }

    #[inline]
    pub fn state(&self) -> RucbState {
        self.state
    }

    #[inline]
    pub fn seq(&self) -> u32 {
        self.seq
    }

    #[inline]
    pub fn ack(&self) -> u32 {
        self.ack
    }

    #[inline]
    pub fn acked(&self) -> u32 {
        self.acked
    }

    #[inline]
    pub fn mss(&self) -> u16 {
        self.mss
    }

    #[inline]
    pub fn flags(&self) -> RucbFlags {
        self.flags
    }

    #[inline]
    pub fn dup_acks(&self) -> u16 {
        self.dup_acks
    }

    #[inline]
    pub fn retransmit_timer(&self) -> &RetransmitTimer {
        &self.rexmt
    }

    /// Local port leased for this flow, if it was locally initiated.
    pub fn leased_port(&self) -> Option<u16> {
        self.port.as_ref().map(PortGuard::port)
    }

    /// Out-of-order bytes held for delivery.
    pub fn reordered_bytes(&self) -> usize {
        self.reorder.buffered_bytes()
    }

    /// Bytes (and a FIN, once sent) in flight.
    #[inline]
    pub fn unacked(&self) -> u32 {
        self.seq.wrapping_sub(self.acked)
    }

    /// Bytes queued by the upper layer and not yet acknowledged.
    #[inline]
    pub fn buffered(&self) -> usize {
        self.write.len()
    }

    pub fn calculated_send_window(&self) -> u64 {
        (self.send_window as u64) << self.send_ws
    }

    /// Bytes of out-of-order data this end is willing to hold.
    pub fn calculated_recv_window(&self) -> u64 {
        (self.recv_window as u64) << self.recv_ws
    }

    pub fn remain_send_window(&self) -> i64 {
        self.calculated_send_window() as i64 - self.unacked() as i64
    }

    /// Data bytes in flight, excluding a sent FIN.
    pub(crate) fn unacked_data(&self) -> usize {
        (self.unacked() as usize).min(self.write.len())
    }

    pub(crate) fn has_unsent(&self) -> bool {
        self.write.len() > self.unacked() as usize
    }

    /// Whether our FIN is out and not yet acknowledged.
    pub(crate) fn fin_in_flight(&self) -> bool {
        self.unacked() as usize > self.write.len()
    }

    /// Open for writes from the upper layer.
    pub(crate) fn is_open(&self) -> bool {
        matches!(self.state, RucbState::SynSent | RucbState::Established)
    }

    /// Advance the per-flow timers by one tick.
    pub(crate) fn tick_timers(&mut self, config: &RudpConfig) -> TimerActions {
        let mut actions = TimerActions::NONE;
        if self.flags.take(RucbFlags::DELAYED_ACK) {
            actions.insert(TimerActions::ACK_NOW);
        }
        if self.rexmt.tick(config.delayed_ack_ms, config.rto_ms, &config.backoff) {
            actions.insert(TimerActions::RETRANSMIT);
        }
        actions
    }

    /// Drop per-flow resources once the flow is gone, releasing its port.
    pub(crate) fn release(&mut self) {
        self.state = RucbState::Closed;
        self.write.clear();
        self.reorder.clear();
        self.eacked.clear();
        self.rexmt.deactivate();
        self.flags = RucbFlags::default();
        self.port = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshtun::{Endpoint, FlowId, FlowKey, PortAllocator};
    use meshtun_codec::{NetBuffer, RudpHeaderBuilder, RUDP_SYN};
    use uuid::Uuid;

    fn info() -> FlowInfo {
        FlowInfo {
            id: FlowId(9),
            key: FlowKey::new(Endpoint::mesh(Uuid::new_v4(), 101), Endpoint::mesh(Uuid::new_v4(), 7000)),
        }
    }

    fn syn(seq: u32, window: u16) -> RudpHeader {
        let mut buf = NetBuffer::backward(RudpHeader::SIZE);
        RudpHeaderBuilder::new(7000, 101)
            .flags(RUDP_SYN)
            .window(window)
            .seq(seq)
            .build(&mut buf)
            .unwrap()
    }

    #[test]
    fn test_accept_numbers_from_one() {
        let rucb = Rucb::accept(info(), &syn(1, 4000), &RudpConfig::default());
        assert_eq!(rucb.state(), RucbState::Established);
        assert_eq!((rucb.seq(), rucb.ack(), rucb.acked()), (1, 2, 1));
        assert_eq!(rucb.calculated_send_window(), 16000);
        assert_eq!(rucb.calculated_recv_window(), 32000);
        assert_eq!(rucb.mss(), 1460);
        assert!(rucb.leased_port().is_none());
    }

    #[test]
    fn test_release_returns_the_port() {
        let ports = PortAllocator::new(101, 200);
        let guard = ports.acquire().unwrap();
        let mut rucb = Rucb::connect(info(), &RudpConfig::default(), guard);
        assert_eq!(rucb.state(), RucbState::SynSent);
        assert_eq!(rucb.leased_port(), Some(101));
        assert!(ports.is_in_use(101));

        rucb.release();
        assert_eq!(rucb.state(), RucbState::Closed);
        assert!(!ports.is_in_use(101));
    }

    #[test]
    fn test_fin_in_flight() {
        let mut rucb = Rucb::accept(info(), &syn(1, 8000), &RudpConfig::default());
        rucb.write.push(vec![0; 10]);
        rucb.seq = rucb.acked.wrapping_add(10);
        assert!(!rucb.fin_in_flight());
        assert_eq!(rucb.unacked_data(), 10);

        rucb.seq = rucb.seq.wrapping_add(1);
        assert!(rucb.fin_in_flight());
        assert_eq!(rucb.unacked_data(), 10);
    }

    #[test]
    fn test_tick_reports_delayed_ack_once() {
        let config = RudpConfig::default();
        let mut rucb = Rucb::accept(info(), &syn(1, 8000), &config);
        rucb.flags.insert(RucbFlags::DELAYED_ACK);
        assert!(rucb.tick_timers(&config).contains(TimerActions::ACK_NOW));
        assert!(rucb.tick_timers(&config).is_empty());
    }

    #[test]
    fn test_state_ordering() {
        assert!(RucbState::SynSent < RucbState::Established);
        assert!(RucbState::FinWait2 > RucbState::Established);
    }
}
