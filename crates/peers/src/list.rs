use crate::{Chooser, Peer, PeerId, PeerProvider, Status, Subscriber};
use call::{Context, Error, Lifecycle, Request};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::Notify;

/// Construction options for a [`List`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ListOptions {
    /// Fail immediately when no peer is available instead of waiting
    /// for one (up to the caller's deadline).
    pub fail_fast: bool,
}

struct ListInner<C> {
    available: HashMap<PeerId, Arc<Peer>>,
    unavailable: HashMap<PeerId, Arc<Peer>>,
    chooser: C,
}

/// A collection of retained peers, fed by an updater with add/remove
/// batches and consumed by callers choosing one peer per outbound call.
///
/// Every known peer is in exactly one of the available/unavailable
/// partitions; peer status notifications move it between them and feed
/// the chooser policy.
pub struct List<C: Chooser> {
    name: &'static str,
    provider: Arc<dyn PeerProvider>,
    lifecycle: Lifecycle,
    inner: Mutex<ListInner<C>>,
    // Signalled when a peer may have become available.
    notify: Notify,
    fail_fast: bool,
    subscriber: Mutex<Option<Arc<dyn Subscriber>>>,
}

impl<C: Chooser> List<C> {
    /// `name` identifies the policy in errors and logs, e.g.
    /// "round-robin".
    pub fn new(
        name: &'static str,
        chooser: C,
        provider: Arc<dyn PeerProvider>,
        options: ListOptions,
    ) -> Arc<Self> {
        let list = Arc::new(Self {
            name,
            provider,
            lifecycle: Lifecycle::new(),
            inner: Mutex::new(ListInner {
                available: HashMap::new(),
                unavailable: HashMap::new(),
                chooser,
            }),
            notify: Notify::new(),
            fail_fast: options.fail_fast,
            subscriber: Mutex::new(None),
        });
        let subscriber: Arc<dyn Subscriber> = Arc::new(ListSubscriber {
            list: Arc::downgrade(&list),
        });
        *list.subscriber.lock().expect("list subscriber lock is never poisoned") =
            Some(subscriber);
        list
    }

    fn subscriber(&self) -> Arc<dyn Subscriber> {
        self.subscriber
            .lock()
            .expect("list subscriber lock is never poisoned")
            .clone()
            .expect("subscriber is installed at construction")
    }

    pub async fn start(&self) -> call::Result<()> {
        self.lifecycle.start(|| async { Ok(()) }).await?;
        // Choosers blocked waiting for start re-check now.
        self.notify.notify_waiters();
        Ok(())
    }

    /// Stop the list, releasing every retained peer.
    pub async fn stop(&self) -> call::Result<()> {
        let result = self
            .lifecycle
            .stop(|| async {
                let peers: Vec<Arc<Peer>> = {
                    let mut guard = self.lock_inner();
                    let inner = &mut *guard;
                    let drained: Vec<_> = inner
                        .available
                        .drain()
                        .map(|(_, peer)| {
                            inner.chooser.remove(&peer);
                            peer
                        })
                        .collect();
                    drained
                        .into_iter()
                        .chain(inner.unavailable.drain().map(|(_, peer)| peer))
                        .collect()
                };
                let subscriber = self.subscriber();
                let mut first_err = None;
                for peer in peers {
                    if let Err(err) = self.provider.release_peer(peer.id(), &subscriber) {
                        tracing::warn!(peer = %peer.id(), error = %err, "failed to release peer");
                        first_err.get_or_insert(err);
                    }
                }
                match first_err {
                    Some(err) => Err(err),
                    None => Ok(()),
                }
            })
            .await;
        self.notify.notify_waiters();
        result
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    /// Apply an updater batch: retain `additions`, release `removals`.
    ///
    /// Peers are retained from the provider before the list lock is
    /// taken, so a peer that notifies during retention cannot deadlock
    /// against the list.
    pub fn update(&self, additions: Vec<PeerId>, removals: Vec<PeerId>) -> call::Result<()> {
        let subscriber = self.subscriber();
        let mut errors: Vec<Error> = Vec::new();

        for id in removals {
            let removed = {
                let mut inner = self.lock_inner();
                match inner.available.remove(&id) {
                    Some(peer) => {
                        inner.chooser.remove(&peer);
                        Some(peer)
                    }
                    None => inner.unavailable.remove(&id),
                }
            };
            match removed {
                Some(_) => {
                    if let Err(err) = self.provider.release_peer(&id, &subscriber) {
                        errors.push(err);
                    }
                }
                None => {
                    errors.push(Error::not_found(format!(
                        "peer list has no peer with identifier {id:?}"
                    )));
                }
            }
        }

        for id in additions {
            let peer = match self.provider.retain_peer(&id, &subscriber) {
                Ok(peer) => peer,
                Err(err) => {
                    errors.push(err);
                    continue;
                }
            };
            let mut became_available = false;
            {
                let mut inner = self.lock_inner();
                if inner.available.contains_key(&id) || inner.unavailable.contains_key(&id) {
                    drop(inner);
                    // Undo the duplicate retention.
                    let _ = self.provider.release_peer(&id, &subscriber);
                    errors.push(Error::invalid_argument(format!(
                        "peer list already has peer {id:?}"
                    )));
                    continue;
                }
                // Partition on the status observed now; a notification
                // racing this insert will re-partition under this lock
                // right after.
                if peer.status() == Status::Available {
                    inner.chooser.add(&peer);
                    inner.available.insert(id.clone(), peer);
                    became_available = true;
                } else {
                    inner.unavailable.insert(id.clone(), peer);
                }
            }
            if became_available {
                self.notify.notify_waiters();
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            let combined = errors
                .iter()
                .map(Error::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            Err(Error::new(errors[0].code(), combined))
        }
    }

    /// Select an available peer for `request`.
    ///
    /// Blocks until the list is started and a peer is available (or
    /// fails fast when so configured), honouring the context deadline.
    /// The returned [`CallPermit`] must accompany the request; dropping
    /// it marks the call complete and releases the pending slot.
    pub async fn choose(
        self: &Arc<Self>,
        ctx: &Context,
        request: &Request,
    ) -> call::Result<(Arc<Peer>, CallPermit)> {
        let name = self.name;
        ctx.run(async {
            self.lifecycle
                .started()
                .await
                .map_err(|err| err.context(format!("{name} peer list is not running")))?;
            loop {
                // Register for wakeups before checking, to not miss one.
                let notified = self.notify.notified();
                {
                    let mut inner = self.lock_inner();
                    if let Some(peer) = inner.chooser.pick(request)? {
                        peer.begin_request();
                        inner.chooser.update(&peer);
                        let permit = CallPermit {
                            peer: Some(peer.clone()),
                            sink: Arc::downgrade(self) as Weak<dyn PendingSink>,
                        };
                        return Ok((peer, permit));
                    }
                }
                if !self.lifecycle.is_running() {
                    return Err(Error::failed_precondition(format!(
                        "{name} peer list is not running"
                    )));
                }
                if self.fail_fast {
                    return Err(Error::unavailable(format!(
                        "{name} peer list has no available peers"
                    )));
                }
                notified.await;
            }
        })
        .await
    }

    pub fn num_available(&self) -> usize {
        self.lock_inner().available.len()
    }

    pub fn num_unavailable(&self) -> usize {
        self.lock_inner().unavailable.len()
    }

    /// Total peers known to the list, available or not.
    pub fn len(&self) -> usize {
        let inner = self.lock_inner();
        inner.available.len() + inner.unavailable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, ListInner<C>> {
        self.inner.lock().expect("list lock is never poisoned")
    }

    fn on_status_changed(&self, id: &PeerId, status: Status) {
        let mut became_available = false;
        {
            let mut inner = self.lock_inner();
            match status {
                Status::Available => {
                    if let Some(peer) = inner.unavailable.remove(id) {
                        inner.chooser.add(&peer);
                        inner.available.insert(id.clone(), peer);
                        became_available = true;
                    }
                }
                Status::Connecting | Status::Unavailable => {
                    if let Some(peer) = inner.available.remove(id) {
                        inner.chooser.remove(&peer);
                        inner.unavailable.insert(id.clone(), peer);
                    }
                }
            }
        }
        if became_available {
            self.notify.notify_waiters();
        }
    }
}

trait PendingSink: Send + Sync {
    fn pending_changed(&self, peer: &Arc<Peer>);
}

impl<C: Chooser> PendingSink for List<C> {
    fn pending_changed(&self, peer: &Arc<Peer>) {
        let mut inner = self.lock_inner();
        if inner.available.contains_key(peer.id()) {
            inner.chooser.update(peer);
        }
        // A peer removed while a call was in flight is simply gone; the
        // completed call has nothing left to update.
    }
}

struct ListSubscriber<C: Chooser> {
    list: Weak<List<C>>,
}

impl<C: Chooser> Subscriber for ListSubscriber<C> {
    fn status_changed(&self, id: &PeerId, status: Status) {
        if let Some(list) = self.list.upgrade() {
            list.on_status_changed(id, status);
        }
    }
}

/// Tracks one chosen call. Invoke [`CallPermit::finish`] (or just drop
/// it) when the request completes so the peer's pending count and the
/// chooser's ordering stay accurate.
pub struct CallPermit {
    peer: Option<Arc<Peer>>,
    sink: Weak<dyn PendingSink>,
}

impl std::fmt::Debug for CallPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallPermit").finish_non_exhaustive()
    }
}

impl CallPermit {
    pub fn finish(mut self) {
        self.complete();
    }

    fn complete(&mut self) {
        if let Some(peer) = self.peer.take() {
            peer.end_request();
            if let Some(sink) = self.sink.upgrade() {
                sink.pending_changed(&peer);
            }
        }
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        self.complete();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{Registry, RoundRobin};
    use call::Encoding;
    use std::time::Duration;

    fn request() -> Request {
        Request::new("caller", "svc", "Get", Encoding::Json)
    }

    fn fixture(options: ListOptions) -> (Arc<Registry>, Arc<List<RoundRobin>>) {
        let registry = Arc::new(Registry::new());
        let list = List::new(
            "round-robin",
            RoundRobin::seeded(7),
            registry.clone(),
            options,
        );
        (registry, list)
    }

    fn add_available(registry: &Registry, list: &Arc<List<RoundRobin>>, ids: &[&str]) {
        list.update(ids.iter().map(|id| PeerId::new(id)).collect(), Vec::new())
            .unwrap();
        for id in ids {
            registry.get(&PeerId::new(id)).unwrap().connected();
        }
    }

    #[tokio::test]
    async fn partitions_follow_status() {
        let (registry, list) = fixture(ListOptions::default());
        list.start().await.unwrap();
        add_available(&registry, &list, &["a", "b", "c"]);

        assert_eq!(list.num_available(), 3);
        assert_eq!(list.num_unavailable(), 0);
        assert_eq!(list.len(), 3);

        registry.get(&PeerId::new("b")).unwrap().disconnected();
        assert_eq!(list.num_available(), 2);
        assert_eq!(list.num_unavailable(), 1);
        assert_eq!(list.len(), 3);

        registry.get(&PeerId::new("b")).unwrap().connected();
        assert_eq!(list.num_available(), 3);
        assert_eq!(list.num_unavailable(), 0);
    }

    #[tokio::test]
    async fn round_robin_rotation() {
        let (registry, list) = fixture(ListOptions::default());
        list.start().await.unwrap();
        add_available(&registry, &list, &["a", "b", "c"]);

        let ctx = Context::with_default_ttl();
        let mut picks = Vec::new();
        for _ in 0..6 {
            let (peer, permit) = list.choose(&ctx, &request()).await.unwrap();
            picks.push(peer.id().as_str().to_string());
            permit.finish();
        }
        // Each peer exactly twice, in a stable rotation.
        for id in ["a", "b", "c"] {
            assert_eq!(picks.iter().filter(|p| *p == id).count(), 2, "{picks:?}");
        }
        assert_eq!(picks[..3], picks[3..], "{picks:?}");
    }

    #[tokio::test]
    async fn choose_blocks_until_started_and_available() {
        let (registry, list) = fixture(ListOptions::default());

        let chooser = {
            let list = list.clone();
            tokio::spawn(async move {
                let ctx = Context::with_default_ttl();
                list.choose(&ctx, &request())
                    .await
                    .map(|(peer, permit)| {
                        permit.finish();
                        peer.id().as_str().to_string()
                    })
            })
        };
        tokio::task::yield_now().await;

        list.start().await.unwrap();
        add_available(&registry, &list, &["only"]);

        assert_eq!(chooser.await.unwrap().unwrap(), "only");
    }

    #[tokio::test(start_paused = true)]
    async fn choose_times_out_when_nothing_available() {
        let (_registry, list) = fixture(ListOptions::default());
        list.start().await.unwrap();

        let ctx = Context::new(Duration::from_millis(50));
        let err = list.choose(&ctx, &request()).await.unwrap_err();
        assert_eq!(err.code(), call::Code::DeadlineExceeded);
    }

    #[tokio::test]
    async fn fail_fast_errors_immediately() {
        let (_registry, list) = fixture(ListOptions { fail_fast: true });
        list.start().await.unwrap();

        let ctx = Context::with_default_ttl();
        let err = list.choose(&ctx, &request()).await.unwrap_err();
        assert_eq!(err.code(), call::Code::Unavailable);
    }

    #[tokio::test]
    async fn removal_during_flight_is_safe() {
        let (registry, list) = fixture(ListOptions::default());
        list.start().await.unwrap();
        add_available(&registry, &list, &["a"]);

        let ctx = Context::with_default_ttl();
        let (peer, permit) = list.choose(&ctx, &request()).await.unwrap();
        assert_eq!(peer.pending(), 1);

        // Remove the peer while its call is still in flight.
        list.update(Vec::new(), vec![PeerId::new("a")]).unwrap();
        assert_eq!(list.len(), 0);

        // Completing the call must not panic or resurrect the peer.
        permit.finish();
        assert_eq!(peer.pending(), 0);
        assert_eq!(list.len(), 0);
    }

    #[tokio::test]
    async fn stop_releases_all_peers() {
        let (registry, list) = fixture(ListOptions::default());
        list.start().await.unwrap();
        add_available(&registry, &list, &["a", "b"]);
        assert_eq!(registry.len(), 2);

        list.stop().await.unwrap();
        assert!(registry.is_empty());
        assert!(list.is_empty());

        let ctx = Context::with_default_ttl();
        let err = list.choose(&ctx, &request()).await.unwrap_err();
        assert_eq!(err.code(), call::Code::FailedPrecondition);
    }

    #[tokio::test]
    async fn duplicate_addition_is_rejected_without_leaking() {
        let (registry, list) = fixture(ListOptions::default());
        list.start().await.unwrap();
        add_available(&registry, &list, &["a"]);

        let err = list
            .update(vec![PeerId::new("a")], Vec::new())
            .unwrap_err();
        assert_eq!(err.code(), call::Code::InvalidArgument);
        assert_eq!(list.len(), 1);

        // The duplicate retention was undone: one release tears down.
        list.update(Vec::new(), vec![PeerId::new("a")]).unwrap();
        assert!(registry.is_empty());
    }
}
