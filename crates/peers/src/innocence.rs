use crate::{Peer, PeerId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Attempts a fresh connection to a peer. Supplied by the transport
/// that owns the peer's connections.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Returns true when the peer answered and may serve traffic again.
    async fn probe(&self, id: &PeerId) -> bool;
}

/// Spontaneous re-probing of unavailable peers.
///
/// When a call fails with a connection error, the transport reports the
/// peer suspect; it transitions to Unavailable and, once per window, a
/// single probe is attempted. A successful probe restores the peer to
/// Available; a failed one leaves it Unavailable and resets the window.
pub struct Innocence {
    window: Duration,
    probe: Arc<dyn Probe>,
    armed: Mutex<HashMap<PeerId, CancellationToken>>,
}

impl Innocence {
    pub fn new(window: Duration, probe: Arc<dyn Probe>) -> Arc<Self> {
        Arc::new(Self {
            window,
            probe,
            armed: Mutex::new(HashMap::new()),
        })
    }

    /// Report a connection failure on `peer`. Marks it Unavailable and
    /// arms the re-probe cycle if it is not armed already.
    pub fn suspect(self: &Arc<Self>, peer: &Arc<Peer>) {
        peer.connect_failed();

        let token = {
            let mut armed = self.armed.lock().expect("innocence lock is never poisoned");
            if armed.contains_key(peer.id()) {
                return;
            }
            let token = CancellationToken::new();
            armed.insert(peer.id().clone(), token.clone());
            token
        };

        let this = self.clone();
        let peer = peer.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = tokio::time::sleep(this.window) => {}
                    () = token.cancelled() => return,
                }
                if this.probe.probe(peer.id()).await {
                    tracing::debug!(peer = %peer.id(), "re-probe succeeded");
                    peer.connected();
                    this.disarm(peer.id());
                    return;
                }
                tracing::debug!(peer = %peer.id(), "re-probe failed; window reset");
                // Still guilty: stay Unavailable and wait out another window.
            }
        });
    }

    /// Stop probing `id`, e.g. because the peer was released.
    pub fn forgive(&self, id: &PeerId) {
        self.disarm(id);
    }

    /// Cancel all outstanding probe cycles.
    pub fn shutdown(&self) {
        let mut armed = self.armed.lock().expect("innocence lock is never poisoned");
        for (_, token) in armed.drain() {
            token.cancel();
        }
    }

    fn disarm(&self, id: &PeerId) {
        if let Some(token) = self
            .armed
            .lock()
            .expect("innocence lock is never poisoned")
            .remove(id)
        {
            token.cancel();
        }
    }
}
