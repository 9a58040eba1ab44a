use crate::{Chooser, Peer};
use call::Request;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

/// Cycles through the available peers in ring order.
///
/// New peers are spliced in at a random position so that a fleet of
/// callers restarted together does not converge on the same first peer.
/// The cursor is adjusted on membership changes to keep pointing at the
/// same logical position.
pub struct RoundRobin {
    ring: Vec<Arc<Peer>>,
    next: usize,
    rng: SmallRng,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::with_rng(SmallRng::from_entropy())
    }

    /// Deterministic insertion order, for tests.
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(SmallRng::seed_from_u64(seed))
    }

    fn with_rng(rng: SmallRng) -> Self {
        Self {
            ring: Vec::new(),
            next: 0,
            rng,
        }
    }

    fn position(&self, peer: &Arc<Peer>) -> Option<usize> {
        self.ring.iter().position(|p| p.id() == peer.id())
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl Chooser for RoundRobin {
    fn add(&mut self, peer: &Arc<Peer>) {
        let at = self.rng.gen_range(0..=self.ring.len());
        self.ring.insert(at, peer.clone());
        if at < self.next {
            self.next += 1;
        }
    }

    fn remove(&mut self, peer: &Arc<Peer>) {
        let Some(at) = self.position(peer) else {
            return;
        };
        self.ring.remove(at);
        if at < self.next {
            self.next -= 1;
        }
        if self.next >= self.ring.len() {
            self.next = 0;
        }
    }

    fn pick(&mut self, _request: &Request) -> call::Result<Option<Arc<Peer>>> {
        if self.ring.is_empty() {
            return Ok(None);
        }
        let peer = self.ring[self.next].clone();
        self.next = (self.next + 1) % self.ring.len();
        Ok(Some(peer))
    }
}
