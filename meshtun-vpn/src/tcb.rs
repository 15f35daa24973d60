//! TCP control block of one tunnel flow.
//!
//! ```text
//!                      acked            seq
//!   write buffer:  [ in flight ......... | unsent ....... ]
//!                  ^ front                                 ^ len
//!
//!   unacked           = seq - acked
//!   remain_send_window = (send_window << send_ws) - unacked
//! ```

use meshtun::{FlowInfo, SendBuffer, TcpConfig};

use crate::packet::TcpInput;

/// MSS assumed when the client's SYN carries no MSS option.
const DEFAULT_CLIENT_MSS: u16 = 536;

/// Transient per-flow conditions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcbFlags(u8);

impl TcbFlags {
    /// A delayed ACK is armed; the next tick or the next data segment sends it
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

    /// Clear `other`, returning whether it was set.
    #[inline]
    pub fn take(&mut self, other: Self) -> bool {
        let set = self.contains(other);
        self.remove(other);
        set
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TcbState {
    Closed,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    Closing,
    CloseWait,
    LastAck,
}

#[derive(Debug)]
pub struct Tcb {
    info: FlowInfo,
    pub(crate) state: TcbState,
    /// Next sequence number to send
    pub(crate) seq: u32,
    /// Next sequence number expected from the client
    pub(crate) ack: u32,
    /// Oldest sequence number not yet acknowledged by the client
    pub(crate) acked: u32,
    pub(crate) send_window: u16,
    pub(crate) send_ws: u8,
    pub(crate) recv_window: u16,
    pub(crate) recv_ws: u8,
    pub(crate) mss: u16,
    pub(crate) flags: TcbFlags,
    pub(crate) write: SendBuffer,
    pub(crate) dup_acks: u16,
    pub(crate) idle_ticks: u32,
}

impl Tcb {
    /// Control block for a client SYN, in `SynReceived` with `isn` consumed
    /// by the SYN-ACK about to be sent.
    pub(crate) fn accept(info: FlowInfo, syn: &TcpInput, config: &TcpConfig, isn: u32) -> Self {
        Self {
            info,
            state: TcbState::SynReceived,
            seq: isn,
            ack: syn.seq.wrapping_add(1),
            acked: isn,
            send_window: syn.window,
            send_ws: syn.window_scale,
            recv_window: config.window,
            recv_ws: config.window_scale,
            mss: config.mss.min(syn.mss.unwrap_or(DEFAULT_CLIENT_MSS)),
            flags: TcbFlags::default(),
            write: SendBuffer::new(),
            dup_acks: 0,
            idle_ticks: 0,
        }
    }

    #[inline]
    pub fn info(&self) -> &FlowInfo {
        &self.info
    }

    #[inline]
    pub fn state(&self) -> TcbState {
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
    pub fn flags(&self) -> TcbFlags {
        self.flags
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

    /// Room left in the client's window; negative when it shrank below
    /// what is already in flight.
    pub fn remain_send_window(&self) -> i64 {
        self.calculated_send_window() as i64 - self.unacked() as i64
    }

    /// Unsent bytes waiting behind the in-flight ones.
    pub(crate) fn has_unsent(&self) -> bool {
        self.write.len() > self.unacked() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshtun::{Endpoint, FlowId, FlowKey, Protocol};
    use meshtun_codec::NetBuffer;
    use std::net::Ipv4Addr;

    fn syn(mss: Option<u16>, window_scale: u8) -> TcpInput {
        TcpInput {
            key: FlowKey::new(
                Endpoint::ipv4(Ipv4Addr::new(10, 0, 0, 1), 40000, Protocol::Tcp),
                Endpoint::ipv4(Ipv4Addr::new(1, 1, 1, 1), 443, Protocol::Tcp),
            ),
            seq: 100,
            ack: 0,
            flags: meshtun_codec::TCP_SYN,
            window: 1000,
            window_scale,
            mss,
            payload: NetBuffer::new(),
        }
    }

    fn accept(input: &TcpInput) -> Tcb {
        let info = FlowInfo {
            id: FlowId(1),
            key: input.key,
        };
        Tcb::accept(info, input, &TcpConfig::default(), 5000)
    }

    #[test]
    fn test_accept_takes_client_parameters() {
        let tcb = accept(&syn(Some(1400), 3));
        assert_eq!(tcb.state(), TcbState::SynReceived);
        assert_eq!(tcb.ack(), 101);
        assert_eq!(tcb.mss(), 1400);
        assert_eq!(tcb.calculated_send_window(), 8000);
        assert_eq!(tcb.recv_window, 65535);
    }

    #[test]
    fn test_mss_defaults_when_option_missing() {
        assert_eq!(accept(&syn(None, 0)).mss(), 536);
        assert_eq!(accept(&syn(Some(9000), 0)).mss(), 7960, "never above our own MSS");
    }

    #[test]
    fn test_remaining_window_can_go_negative() {
        let mut tcb = accept(&syn(Some(1400), 0));
        tcb.seq = tcb.acked.wrapping_add(1500);
        assert_eq!(tcb.unacked(), 1500);
        assert_eq!(tcb.remain_send_window(), -500);
    }

    #[test]
    fn test_flags() {
        let mut flags = TcbFlags::default();
        flags.insert(TcbFlags::DO_FIN);
        assert!(flags.contains(TcbFlags::DO_FIN));
        assert!(!flags.take(TcbFlags::DELAYED_ACK));
        assert!(flags.take(TcbFlags::DO_FIN));
        assert_eq!(flags, TcbFlags::default());
    }

    #[test]
    fn test_state_ordering() {
        assert!(TcbState::SynReceived < TcbState::Established);
        assert!(TcbState::LastAck > TcbState::Established);
    }
}
