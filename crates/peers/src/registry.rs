use crate::{Peer, PeerId, PeerProvider, Subscriber};
use call::Error;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

struct Entry {
    peer: Arc<Peer>,
    refs: usize,
}

/// A transport-side arena of peers keyed by identifier.
///
/// Lists retain peers from the registry and release them symmetrically;
/// the registry tears a peer down exactly when its last retainer lets
/// go. Embed one per peer-selection-capable transport.
#[derive(Default)]
pub struct Registry {
    entries: Mutex<HashMap<PeerId, Entry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take (or add) a reference on the peer with `id` and subscribe to
    /// its status changes.
    pub fn retain(&self, id: &PeerId, subscriber: &Arc<dyn Subscriber>) -> Arc<Peer> {
        let peer = {
            let mut entries = self.entries.lock().expect("registry lock is never poisoned");
            let entry = entries.entry(id.clone()).or_insert_with(|| Entry {
                peer: Peer::new(id.clone()),
                refs: 0,
            });
            entry.refs += 1;
            entry.peer.clone()
        };
        // Subscribe outside the registry lock; the peer takes its own.
        peer.subscribe(subscriber);
        peer
    }

    /// Drop a reference. Returns the peer when this was the last
    /// reference, so the owning transport can tear it down.
    pub fn release(
        &self,
        id: &PeerId,
        subscriber: &Arc<dyn Subscriber>,
    ) -> call::Result<Option<Arc<Peer>>> {
        let (peer, torn_down) = {
            let mut entries = self.entries.lock().expect("registry lock is never poisoned");
            let entry = entries.get_mut(id).ok_or_else(|| {
                Error::not_found(format!("no retained peer with identifier {id:?}"))
            })?;
            entry.refs -= 1;
            let peer = entry.peer.clone();
            if entry.refs == 0 {
                entries.remove(id);
                (peer, true)
            } else {
                (peer, false)
            }
        };
        peer.unsubscribe(subscriber);
        Ok(torn_down.then_some(peer))
    }

    /// Number of distinct peers currently retained.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("registry lock is never poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &PeerId) -> Option<Arc<Peer>> {
        self.entries
            .lock()
            .expect("registry lock is never poisoned")
            .get(id)
            .map(|entry| entry.peer.clone())
    }
}

impl PeerProvider for Registry {
    fn retain_peer(
        &self,
        id: &PeerId,
        subscriber: &Arc<dyn Subscriber>,
    ) -> call::Result<Arc<Peer>> {
        Ok(self.retain(id, subscriber))
    }

    fn release_peer(&self, id: &PeerId, subscriber: &Arc<dyn Subscriber>) -> call::Result<()> {
        self.release(id, subscriber).map(|_| ())
    }
}
