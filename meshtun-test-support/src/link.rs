//! Lossy downstream link.
//!
//! Packets handed to the link are queued, not delivered: the test pumps them
//! into the peer engine with [`LossyLink::take`]. Delivering inline would
//! re-enter the peer while the sender still holds its flow lock.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use meshtun::{Downstream, Endpoint};
use meshtun_codec::NetBuffer;

use crate::loss::{DropDecision, LossGenerator};

struct LinkState {
    loss: LossGenerator,
    queue: VecDeque<(Endpoint, NetBuffer)>,
    /// Deliver every Nth surviving packet twice
    duplicate_every: Option<u64>,
    passed: u64,
}

pub struct LossyLink {
    state: Mutex<LinkState>,
}

impl LossyLink {
    pub fn new(loss: LossGenerator) -> Self {
        Self {
            state: Mutex::new(LinkState {
                loss,
                queue: VecDeque::new(),
                duplicate_every: None,
                passed: 0,
            }),
        }
    }

    pub fn reliable() -> Self {
        Self::new(LossGenerator::none())
    }

    pub fn with_duplicates(self, every_n: u64) -> Self {
        self.state.lock().duplicate_every = Some(every_n.max(1));
        self
    }

    /// Drain the packets that survived the link.
    pub fn take(&self) -> Vec<(Endpoint, NetBuffer)> {
        self.state.lock().queue.drain(..).collect()
    }

    pub fn dropped(&self) -> u64 {
        self.state.lock().loss.dropped()
    }

    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }
}

impl Downstream for LossyLink {
    fn send_packet(&self, dst: &Endpoint, packet: NetBuffer) {
        let mut state = self.state.lock();
        if state.loss.roll() == DropDecision::Drop {
            return;
        }
        state.passed += 1;
        if let Some(every) = state.duplicate_every {
            if state.passed % every == 0 {
                state.queue.push_back((*dst, packet.clone()));
            }
        }
        state.queue.push_back((*dst, packet));
    }
}

/// Rounds [`LinkPair::pump`] runs before giving up on a chatty exchange.
const MAX_PUMP_ROUNDS: usize = 10_000;

/// Two engines joined back to back, each direction with its own loss.
///
/// Hand [`LinkPair::a`] to engine A as its downstream and [`LinkPair::b`]
/// to engine B, then [`LinkPair::pump`] until the exchange settles.
pub struct LinkPair {
    a_to_b: Arc<LossyLink>,
    b_to_a: Arc<LossyLink>,
}

impl LinkPair {
    pub fn new(a_to_b: LossGenerator, b_to_a: LossGenerator) -> Self {
        Self {
            a_to_b: Arc::new(LossyLink::new(a_to_b)),
            b_to_a: Arc::new(LossyLink::new(b_to_a)),
        }
    }

    pub fn reliable() -> Self {
        Self::new(LossGenerator::none(), LossGenerator::none())
    }

    /// Downstream of side A; packets travel towards B.
    pub fn a(&self) -> Arc<LossyLink> {
        Arc::clone(&self.a_to_b)
    }

    /// Downstream of side B; packets travel towards A.
    pub fn b(&self) -> Arc<LossyLink> {
        Arc::clone(&self.b_to_a)
    }

    /// Deliver queued packets in both directions until neither side has
    /// anything left to say. Returns the number of packets delivered.
    pub fn pump(&self, mut to_b: impl FnMut(NetBuffer), mut to_a: impl FnMut(NetBuffer)) -> usize {
        let mut delivered = 0;
        for _ in 0..MAX_PUMP_ROUNDS {
            let forward = self.a_to_b.take();
            let backward = self.b_to_a.take();
            if forward.is_empty() && backward.is_empty() {
                break;
            }
            delivered += forward.len() + backward.len();
            for (_, packet) in forward {
                to_b(packet);
            }
            for (_, packet) in backward {
                to_a(packet);
            }
        }
        delivered
    }

    /// Packets lost in either direction.
    pub fn dropped(&self) -> u64 {
        self.a_to_b.dropped() + self.b_to_a.dropped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshtun::Protocol;
    use std::net::Ipv4Addr;

    fn ep() -> Endpoint {
        Endpoint::ipv4(Ipv4Addr::new(10, 0, 0, 1), 1, Protocol::Udp)
    }

    #[test]
    fn test_drops_and_queues() {
        let link = LossyLink::new(LossGenerator::specific([1]));
        for i in 0..3u8 {
            link.send_packet(&ep(), NetBuffer::from_vec(vec![i]));
        }
        let got: Vec<u8> = link.take().iter().map(|(_, b)| b.as_slice()[0]).collect();
        assert_eq!(got, vec![0, 2]);
        assert_eq!(link.dropped(), 1);
        assert_eq!(link.pending(), 0);
    }

    #[test]
    fn test_duplicates() {
        let link = LossyLink::reliable().with_duplicates(2);
        for i in 0..4u8 {
            link.send_packet(&ep(), NetBuffer::from_vec(vec![i]));
        }
        let got: Vec<u8> = link.take().iter().map(|(_, b)| b.as_slice()[0]).collect();
        assert_eq!(got, vec![0, 1, 1, 2, 3, 3]);
    }

    #[test]
    fn test_pair_pumps_until_quiet() {
        let pair = LinkPair::new(LossGenerator::none(), LossGenerator::specific([0]));
        let a = pair.a();
        let b = pair.b();
        a.send_packet(&ep(), NetBuffer::from_vec(vec![3]));

        // B echoes with one less until zero; A echoes back unchanged
        let delivered = pair.pump(
            |p| {
                let n = p.as_slice()[0];
                if n > 0 {
                    b.send_packet(&ep(), NetBuffer::from_vec(vec![n - 1]));
                }
            },
            |p| a.send_packet(&ep(), p),
        );
        // 3 -> B, 2 dropped on the way back
        assert_eq!(delivered, 1);
        assert_eq!(pair.dropped(), 1);
    }
}
