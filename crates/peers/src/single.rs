use crate::{Chooser, Peer};
use call::Request;
use std::sync::Arc;

/// The degenerate list of exactly one peer.
#[derive(Default)]
pub struct Single {
    peer: Option<Arc<Peer>>,
}

impl Single {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Chooser for Single {
    fn add(&mut self, peer: &Arc<Peer>) {
        if self.peer.is_none() {
            self.peer = Some(peer.clone());
        }
    }

    fn remove(&mut self, peer: &Arc<Peer>) {
        if self.peer.as_ref().map(|p| p.id()) == Some(peer.id()) {
            self.peer = None;
        }
    }

    fn pick(&mut self, _request: &Request) -> call::Result<Option<Arc<Peer>>> {
        Ok(self.peer.clone())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::PeerId;
    use call::Encoding;

    #[test]
    fn holds_exactly_one_peer() {
        let request = Request::new("caller", "svc", "Get", Encoding::Raw);
        let mut single = Single::new();
        let a = Peer::new(PeerId::new("a"));
        let b = Peer::new(PeerId::new("b"));

        single.add(&a);
        single.add(&b); // ignored: the slot is taken
        assert_eq!(single.pick(&request).unwrap().unwrap().id().as_str(), "a");

        single.remove(&b); // no-op
        assert!(single.pick(&request).unwrap().is_some());

        single.remove(&a);
        assert!(single.pick(&request).unwrap().is_none());
    }
}
