use crate::{Chooser, List, PeerId};
use async_trait::async_trait;
use std::sync::Arc;

/// Feeds membership changes to a list. Implementations push add/remove
/// batches via [`List::update`] — a DNS watcher, a service-discovery
/// subscription, or a fixed set from configuration.
#[async_trait]
pub trait Updater<C: Chooser>: Send + Sync {
    /// Begin feeding `list`. Invoked after the list has started.
    async fn start(&self, list: &Arc<List<C>>) -> call::Result<()>;

    /// Stop feeding the list. Invoked before the list stops; peers
    /// still retained are released by the list itself.
    async fn stop(&self) -> call::Result<()>;
}

/// A list coupled with the updater that feeds it, under one lifecycle:
/// start brings up the list and then its updater, stop tears them down
/// in reverse.
pub struct Bound<C: Chooser> {
    list: Arc<List<C>>,
    updater: Arc<dyn Updater<C>>,
}

impl<C: Chooser> Bound<C> {
    pub fn new(list: Arc<List<C>>, updater: Arc<dyn Updater<C>>) -> Self {
        Self { list, updater }
    }

    pub fn list(&self) -> &Arc<List<C>> {
        &self.list
    }

    pub async fn start(&self) -> call::Result<()> {
        self.list.start().await?;
        self.updater.start(&self.list).await
    }

    pub async fn stop(&self) -> call::Result<()> {
        let updater = self.updater.stop().await;
        let list = self.list.stop().await;
        updater.and(list)
    }
}

/// The simplest updater: a fixed peer set from configuration, bound
/// once at start.
pub struct FixedPeers {
    peers: Vec<PeerId>,
}

impl FixedPeers {
    pub fn new(peers: impl IntoIterator<Item = PeerId>) -> Self {
        Self {
            peers: peers.into_iter().collect(),
        }
    }
}

#[async_trait]
impl<C: Chooser> Updater<C> for FixedPeers {
    async fn start(&self, list: &Arc<List<C>>) -> call::Result<()> {
        list.update(self.peers.clone(), Vec::new())
    }

    async fn stop(&self) -> call::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{ListOptions, Registry, RoundRobin};

    #[tokio::test]
    async fn fixed_peers_bind_at_start_and_release_at_stop() {
        let registry = Arc::new(Registry::new());
        let list = List::new(
            "round-robin",
            RoundRobin::seeded(23),
            registry.clone(),
            ListOptions::default(),
        );
        let bound = Bound::new(
            list,
            Arc::new(FixedPeers::new([PeerId::new("a"), PeerId::new("b")])),
        );

        assert_eq!(bound.list().len(), 0);
        bound.start().await.unwrap();
        assert_eq!(bound.list().len(), 2);
        assert_eq!(registry.len(), 2);

        bound.stop().await.unwrap();
        assert!(registry.is_empty());
    }
}
