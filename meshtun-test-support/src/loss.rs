//! Packet loss patterns for exercising retransmission.
//!
//! Decisions are made per packet index (0, 1, 2, ... in send order), and the
//! random pattern is seeded so a failing test replays the same drops.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;

/// Decision for whether to drop a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropDecision {
    Drop,
    Pass,
}

#[derive(Debug, Clone)]
pub enum LossPattern {
    /// Pass everything
    None,
    /// Drop every Nth packet (the Nth, 2Nth, ...)
    Periodic { every_n: u64 },
    /// Drop with the given probability (0.0-1.0)
    Random { probability: f64, seed: u64 },
    /// Drop `length` packets starting at index `start`
    Burst { start: u64, length: u64 },
    /// Drop exactly these indices
    Specific { indices: HashSet<u64> },
    /// Drop when any of the patterns would
    Combined(Vec<LossPattern>),
}

/// Stateful drop oracle.
///
/// ```
/// use meshtun_test_support::loss::{DropDecision, LossGenerator};
///
/// let mut gen = LossGenerator::specific([1, 3]);
/// let drops: Vec<bool> = (0..4).map(|_| gen.roll() == DropDecision::Drop).collect();
/// assert_eq!(drops, vec![false, true, false, true]);
/// ```
pub struct LossGenerator {
    pattern: LossPattern,
    index: u64,
    dropped: u64,
    rng: StdRng,
}

impl LossGenerator {
    pub fn new(pattern: LossPattern) -> Self {
        let seed = match &pattern {
            LossPattern::Random { seed, .. } => *seed,
            _ => 0,
        };
        Self {
            pattern,
            index: 0,
            dropped: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn none() -> Self {
        Self::new(LossPattern::None)
    }

    pub fn periodic(every_n: u64) -> Self {
        Self::new(LossPattern::Periodic { every_n })
    }

    pub fn random(probability: f64, seed: u64) -> Self {
        Self::new(LossPattern::Random {
            probability: probability.clamp(0.0, 1.0),
            seed,
        })
    }

    pub fn burst(start: u64, length: u64) -> Self {
        Self::new(LossPattern::Burst { start, length })
    }

    pub fn specific(indices: impl IntoIterator<Item = u64>) -> Self {
        Self::new(LossPattern::Specific {
            indices: indices.into_iter().collect(),
        })
    }

    /// Decide the fate of the next packet.
    pub fn roll(&mut self) -> DropDecision {
        let index = self.index;
        self.index += 1;
        let pattern = self.pattern.clone();
        let decision = self.decide(index, &pattern);
        if decision == DropDecision::Drop {
            self.dropped += 1;
        }
        decision
    }

    fn decide(&mut self, index: u64, pattern: &LossPattern) -> DropDecision {
        let drop = match pattern {
            LossPattern::None => false,
            LossPattern::Periodic { every_n } => *every_n > 0 && (index + 1) % *every_n == 0,
            LossPattern::Random { probability, .. } => self.rng.gen::<f64>() < *probability,
            LossPattern::Burst { start, length } => index >= *start && index < start + length,
            LossPattern::Specific { indices } => indices.contains(&index),
            LossPattern::Combined(patterns) => patterns
                .iter()
                .any(|p| self.decide(index, p) == DropDecision::Drop),
        };
        if drop {
            DropDecision::Drop
        } else {
            DropDecision::Pass
        }
    }

    pub fn seen(&self) -> u64 {
        self.index
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dropped_indices(mut gen: LossGenerator, n: u64) -> Vec<u64> {
        (0..n)
            .filter_map(|i| (gen.roll() == DropDecision::Drop).then_some(i))
            .collect()
    }

    #[test]
    fn test_no_loss() {
        let mut gen = LossGenerator::none();
        for _ in 0..100 {
            assert_eq!(gen.roll(), DropDecision::Pass);
        }
        assert_eq!(gen.dropped(), 0);
        assert_eq!(gen.seen(), 100);
    }

    #[test]
    fn test_periodic_loss() {
        assert_eq!(dropped_indices(LossGenerator::periodic(10), 30), vec![9, 19, 29]);
    }

    #[test]
    fn test_burst_loss() {
        assert_eq!(dropped_indices(LossGenerator::burst(5, 3), 20), vec![5, 6, 7]);
    }

    #[test]
    fn test_random_loss_is_seeded() {
        let a = dropped_indices(LossGenerator::random(0.1, 42), 10_000);
        let b = dropped_indices(LossGenerator::random(0.1, 42), 10_000);
        assert_eq!(a, b);
        assert!(a.len() > 800 && a.len() < 1200, "drops = {}", a.len());
    }

    #[test]
    fn test_combined() {
        let gen = LossGenerator::new(LossPattern::Combined(vec![
            LossPattern::Burst { start: 0, length: 1 },
            LossPattern::Specific {
                indices: [4].into_iter().collect(),
            },
        ]));
        assert_eq!(dropped_indices(gen, 6), vec![0, 4]);
    }
}
