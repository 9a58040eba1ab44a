use crate::{Chooser, Peer, PeerId};
use call::Request;
use std::collections::HashMap;
use std::sync::Arc;

/// Always selects the available peer with the fewest pending requests.
///
/// Backed by an indexed binary min-heap keyed on (pending, identifier);
/// the identifier component makes ordering total and deterministic. The
/// list re-sifts entries whenever a peer's pending count changes.
pub struct FewestPending {
    heap: Vec<Arc<Peer>>,
    index: HashMap<PeerId, usize>,
}

impl FewestPending {
    pub fn new() -> Self {
        Self {
            heap: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn less(a: &Arc<Peer>, b: &Arc<Peer>) -> bool {
        (a.pending(), a.id()) < (b.pending(), b.id())
    }

    fn swap(&mut self, i: usize, j: usize) {
        self.heap.swap(i, j);
        self.index.insert(self.heap[i].id().clone(), i);
        self.index.insert(self.heap[j].id().clone(), j);
    }

    fn sift_up(&mut self, mut at: usize) -> usize {
        while at > 0 {
            let parent = (at - 1) / 2;
            if Self::less(&self.heap[at], &self.heap[parent]) {
                self.swap(at, parent);
                at = parent;
            } else {
                break;
            }
        }
        at
    }

    fn sift_down(&mut self, mut at: usize) -> usize {
        loop {
            let mut smallest = at;
            for child in [2 * at + 1, 2 * at + 2] {
                if child < self.heap.len() && Self::less(&self.heap[child], &self.heap[smallest]) {
                    smallest = child;
                }
            }
            if smallest == at {
                return at;
            }
            self.swap(at, smallest);
            at = smallest;
        }
    }
}

impl Default for FewestPending {
    fn default() -> Self {
        Self::new()
    }
}

impl Chooser for FewestPending {
    fn add(&mut self, peer: &Arc<Peer>) {
        if self.index.contains_key(peer.id()) {
            return;
        }
        let at = self.heap.len();
        self.heap.push(peer.clone());
        self.index.insert(peer.id().clone(), at);
        self.sift_up(at);
    }

    fn remove(&mut self, peer: &Arc<Peer>) {
        // Removing a peer the heap has already evicted is a no-op.
        let Some(at) = self.index.remove(peer.id()) else {
            return;
        };
        let last = self.heap.len() - 1;
        if at != last {
            self.swap(at, last);
        }
        self.heap.pop();
        self.index.remove(peer.id());
        if at < self.heap.len() {
            let settled = self.sift_down(at);
            self.sift_up(settled);
        }
    }

    fn update(&mut self, peer: &Arc<Peer>) {
        let Some(&at) = self.index.get(peer.id()) else {
            return;
        };
        let settled = self.sift_down(at);
        self.sift_up(settled);
    }

    fn pick(&mut self, _request: &Request) -> call::Result<Option<Arc<Peer>>> {
        Ok(self.heap.first().cloned())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use call::Encoding;

    fn request() -> Request {
        Request::new("caller", "svc", "Get", Encoding::Raw)
    }

    fn peer(id: &str, pending: usize) -> Arc<Peer> {
        let peer = Peer::new(PeerId::new(id));
        for _ in 0..pending {
            peer.begin_request();
        }
        peer
    }

    #[test]
    fn picks_least_loaded() {
        let mut heap = FewestPending::new();
        heap.add(&peer("b", 2));
        heap.add(&peer("a", 0));
        heap.add(&peer("c", 5));

        let picked = heap.pick(&request()).unwrap().unwrap();
        assert_eq!(picked.id().as_str(), "a");
    }

    #[test]
    fn resifts_on_update() {
        let mut heap = FewestPending::new();
        let a = peer("a", 0);
        let b = peer("b", 1);
        heap.add(&a);
        heap.add(&b);

        a.begin_request();
        a.begin_request();
        heap.update(&a);
        assert_eq!(heap.pick(&request()).unwrap().unwrap().id().as_str(), "b");

        a.end_request();
        a.end_request();
        heap.update(&a);
        assert_eq!(heap.pick(&request()).unwrap().unwrap().id().as_str(), "a");
    }

    #[test]
    fn equal_load_orders_by_identifier() {
        let mut heap = FewestPending::new();
        heap.add(&peer("delta", 1));
        heap.add(&peer("alpha", 1));
        heap.add(&peer("charlie", 1));

        assert_eq!(heap.pick(&request()).unwrap().unwrap().id().as_str(), "alpha");
    }

    #[test]
    fn double_remove_is_noop() {
        let mut heap = FewestPending::new();
        let a = peer("a", 0);
        let b = peer("b", 0);
        heap.add(&a);
        heap.add(&b);

        heap.remove(&a);
        heap.remove(&a);
        assert_eq!(heap.pick(&request()).unwrap().unwrap().id().as_str(), "b");

        heap.remove(&b);
        assert!(heap.pick(&request()).unwrap().is_none());
    }
}
