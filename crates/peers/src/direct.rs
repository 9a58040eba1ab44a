use crate::{Chooser, Peer, PeerId};
use call::{Error, Request};
use std::collections::HashMap;
use std::sync::Arc;

/// No selection at all: the request's shard key names the peer.
///
/// Waiting cannot produce a different answer for an addressed peer, so
/// a missing or unavailable peer is a terminal error rather than a
/// reason to block.
#[derive(Default)]
pub struct Direct {
    available: HashMap<PeerId, Arc<Peer>>,
}

impl Direct {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Chooser for Direct {
    fn add(&mut self, peer: &Arc<Peer>) {
        self.available.insert(peer.id().clone(), peer.clone());
    }

    fn remove(&mut self, peer: &Arc<Peer>) {
        self.available.remove(peer.id());
    }

    fn pick(&mut self, request: &Request) -> call::Result<Option<Arc<Peer>>> {
        let Some(shard_key) = request.shard_key.as_deref() else {
            return Err(Error::invalid_argument(
                "direct peer selection requires a shard key",
            ));
        };
        match self.available.get(&PeerId::new(shard_key)) {
            Some(peer) => Ok(Some(peer.clone())),
            None => Err(Error::unavailable(format!(
                "no available peer for shard key {shard_key:?}"
            ))),
        }
    }
}
