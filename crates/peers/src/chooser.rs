use crate::Peer;
use call::Request;
use std::sync::Arc;

/// A selection policy over the available peers of a list.
///
/// All methods are invoked with the owning list's lock held, so
/// implementations are plain single-threaded data structures; they must
/// not block and must not call back into the list.
pub trait Chooser: Send + 'static {
    /// A peer became available to the list.
    fn add(&mut self, peer: &Arc<Peer>);

    /// A peer left the available set. Removing a peer the policy has
    /// already evicted must be a no-op.
    fn remove(&mut self, peer: &Arc<Peer>);

    /// The peer's pending-request count changed. Policies keyed on load
    /// re-order here; others ignore it.
    fn update(&mut self, _peer: &Arc<Peer>) {}

    /// Select a peer for `request`.
    ///
    /// `Ok(None)` means no peer is currently available and the list may
    /// block for one; an `Err` is terminal for this call (used by
    /// policies where waiting cannot help, e.g. shard-addressed
    /// selection with no shard key).
    fn pick(&mut self, request: &Request) -> call::Result<Option<Arc<Peer>>>;
}
