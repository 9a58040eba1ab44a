use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Opaque peer identity. Typically "host:port", but the substrate never
/// interprets it.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(Arc<str>);

impl PeerId {
    pub fn new(id: impl AsRef<str>) -> Self {
        PeerId(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        PeerId::new(id)
    }
}

/// Connection liveness of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Connecting,
    Available,
    Unavailable,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Connecting => "connecting",
            Status::Available => "available",
            Status::Unavailable => "unavailable",
        }
    }
}

/// Receives peer status change notifications.
///
/// Callbacks are never invoked while the peer's own lock is held, so a
/// subscriber may freely call back into the peer or into a list.
pub trait Subscriber: Send + Sync {
    fn status_changed(&self, id: &PeerId, status: Status);
}

/// The peer-management surface a peer-selection-capable transport
/// exposes. Retain/release follow a reference-count discipline: a peer
/// is torn down by its owning transport when its last retainer releases.
pub trait PeerProvider: Send + Sync {
    fn retain_peer(
        &self,
        id: &PeerId,
        subscriber: &Arc<dyn Subscriber>,
    ) -> call::Result<Arc<Peer>>;

    fn release_peer(&self, id: &PeerId, subscriber: &Arc<dyn Subscriber>) -> call::Result<()>;
}

struct PeerState {
    status: Status,
    subscribers: Vec<Weak<dyn Subscriber>>,
}

/// A remote peer: identity, liveness, and an in-flight request count.
///
/// Owned by its transport; lists hold it only through retention. The
/// back-references to interested lists are weak subscriber handles.
pub struct Peer {
    id: PeerId,
    pending: AtomicUsize,
    state: Mutex<PeerState>,
    // Held across subscriber callbacks (but never with `state` locked)
    // so notifications are delivered in the order observed.
    notifying: Mutex<()>,
}

impl Peer {
    pub fn new(id: PeerId) -> Arc<Self> {
        Arc::new(Self {
            id,
            pending: AtomicUsize::new(0),
            state: Mutex::new(PeerState {
                status: Status::Connecting,
                subscribers: Vec::new(),
            }),
            notifying: Mutex::new(()),
        })
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub fn status(&self) -> Status {
        self.state.lock().expect("peer lock is never poisoned").status
    }

    /// Number of requests currently in flight to this peer.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub(crate) fn begin_request(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn end_request(&self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }

    /// Register for status notifications. Holds only a weak handle; a
    /// dropped subscriber is pruned on the next notification.
    pub fn subscribe(&self, subscriber: &Arc<dyn Subscriber>) {
        let mut state = self.state.lock().expect("peer lock is never poisoned");
        state.subscribers.push(Arc::downgrade(subscriber));
    }

    /// Remove one registration of `subscriber`. Subscriptions pair with
    /// retentions one-for-one, so a subscriber retained twice keeps its
    /// other registration.
    pub fn unsubscribe(&self, subscriber: &Arc<dyn Subscriber>) {
        let mut state = self.state.lock().expect("peer lock is never poisoned");
        let target = Arc::as_ptr(subscriber) as *const ();
        let position = state.subscribers.iter().position(|weak| {
            weak.upgrade()
                .is_some_and(|live| Arc::as_ptr(&live) as *const () == target)
        });
        if let Some(position) = position {
            state.subscribers.remove(position);
        }
    }

    /// Connection established: Connecting or Unavailable → Available.
    pub fn connected(&self) {
        self.set_status(Status::Available);
    }

    /// Connection attempt failed: → Unavailable.
    pub fn connect_failed(&self) {
        self.set_status(Status::Unavailable);
    }

    /// Remote close observed: Available → Unavailable.
    pub fn disconnected(&self) {
        self.set_status(Status::Unavailable);
    }

    fn set_status(&self, status: Status) {
        // Take the notification order lock first; the state lock is
        // released before any subscriber runs.
        let _order = self.notifying.lock().expect("peer notify lock is never poisoned");
        let subscribers: Vec<Arc<dyn Subscriber>> = {
            let mut state = self.state.lock().expect("peer lock is never poisoned");
            if state.status == status {
                return;
            }
            state.status = status;
            state.subscribers.retain(|weak| weak.upgrade().is_some());
            state.subscribers.iter().filter_map(Weak::upgrade).collect()
        };
        tracing::debug!(peer = %self.id, status = status.as_str(), "peer status changed");
        for subscriber in subscribers {
            subscriber.status_changed(&self.id, status);
        }
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("pending", &self.pending())
            .finish()
    }
}
