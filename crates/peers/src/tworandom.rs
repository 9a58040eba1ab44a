use crate::{Chooser, Peer, PeerId};
use call::Request;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;

/// The power of two random choices: sample two distinct available peers
/// uniformly at random and take the one with fewer pending requests.
/// Ties break towards the lexicographically smaller identifier.
pub struct TwoRandomChoices {
    peers: Vec<Arc<Peer>>,
    index: HashMap<PeerId, usize>,
    rng: SmallRng,
}

impl TwoRandomChoices {
    pub fn new() -> Self {
        Self::with_rng(SmallRng::from_entropy())
    }

    /// Deterministic sampling, for tests.
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(SmallRng::seed_from_u64(seed))
    }

    fn with_rng(rng: SmallRng) -> Self {
        Self {
            peers: Vec::new(),
            index: HashMap::new(),
            rng,
        }
    }
}

impl Default for TwoRandomChoices {
    fn default() -> Self {
        Self::new()
    }
}

impl Chooser for TwoRandomChoices {
    fn add(&mut self, peer: &Arc<Peer>) {
        if self.index.contains_key(peer.id()) {
            return;
        }
        self.index.insert(peer.id().clone(), self.peers.len());
        self.peers.push(peer.clone());
    }

    fn remove(&mut self, peer: &Arc<Peer>) {
        let Some(at) = self.index.remove(peer.id()) else {
            return;
        };
        self.peers.swap_remove(at);
        if at < self.peers.len() {
            self.index.insert(self.peers[at].id().clone(), at);
        }
    }

    fn pick(&mut self, _request: &Request) -> call::Result<Option<Arc<Peer>>> {
        match self.peers.len() {
            0 => Ok(None),
            1 => Ok(Some(self.peers[0].clone())),
            len => {
                let first = self.rng.gen_range(0..len);
                let mut second = self.rng.gen_range(0..len - 1);
                if second >= first {
                    second += 1;
                }
                let (a, b) = (&self.peers[first], &self.peers[second]);
                let chosen = if (a.pending(), a.id()) <= (b.pending(), b.id()) {
                    a
                } else {
                    b
                };
                Ok(Some(chosen.clone()))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use call::Encoding;

    fn request() -> Request {
        Request::new("caller", "svc", "Get", Encoding::Raw)
    }

    #[test]
    fn prefers_fewer_pending() {
        let mut chooser = TwoRandomChoices::seeded(11);
        let light = Peer::new(PeerId::new("light"));
        let heavy = Peer::new(PeerId::new("heavy"));
        heavy.begin_request();
        heavy.begin_request();
        chooser.add(&light);
        chooser.add(&heavy);

        // With exactly two peers, every sample compares both.
        for _ in 0..20 {
            let picked = chooser.pick(&request()).unwrap().unwrap();
            assert_eq!(picked.id().as_str(), "light");
        }
    }

    #[test]
    fn ties_break_lexicographically() {
        let mut chooser = TwoRandomChoices::seeded(13);
        chooser.add(&Peer::new(PeerId::new("bravo")));
        chooser.add(&Peer::new(PeerId::new("alpha")));

        for _ in 0..20 {
            let picked = chooser.pick(&request()).unwrap().unwrap();
            assert_eq!(picked.id().as_str(), "alpha");
        }
    }

    #[test]
    fn swap_remove_keeps_index_consistent() {
        let mut chooser = TwoRandomChoices::seeded(17);
        let peers: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|id| Peer::new(PeerId::new(id)))
            .collect();
        for peer in &peers {
            chooser.add(peer);
        }
        chooser.remove(&peers[0]);
        chooser.remove(&peers[0]); // second removal is a no-op

        for _ in 0..10 {
            let picked = chooser.pick(&request()).unwrap().unwrap();
            assert_ne!(picked.id().as_str(), "a");
        }
    }
}
