use crate::Error;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// An absolute point in time by which a call must complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn after(ttl: Duration) -> Self {
        Deadline(Instant::now() + ttl)
    }

    pub fn at(instant: Instant) -> Self {
        Deadline(instant)
    }

    pub fn instant(&self) -> Instant {
        self.0
    }

    /// Time left before expiry, saturating at zero.
    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    pub fn ttl_ms(&self) -> u64 {
        self.remaining().as_millis() as u64
    }

    pub fn has_expired(&self) -> bool {
        self.remaining() == Duration::ZERO
    }
}

/// Per-call context: the deadline plus a cancellation signal, passed to
/// every operation that may suspend.
///
/// A handler issuing a dependent outbound call derives a child context so
/// the downstream deadline is truncated to `min(now + ttl, parent)` and
/// cancellation propagates down the call graph.
#[derive(Debug, Clone)]
pub struct Context {
    deadline: Deadline,
    cancel: CancellationToken,
}

impl Context {
    /// A root context expiring after `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            deadline: Deadline::after(ttl),
            cancel: CancellationToken::new(),
        }
    }

    /// A root context with the wire-default TTL.
    pub fn with_default_ttl() -> Self {
        Self::new(crate::wire::DEFAULT_TTL)
    }

    pub fn with_deadline(deadline: Deadline) -> Self {
        Self {
            deadline,
            cancel: CancellationToken::new(),
        }
    }

    /// Derive a child for a dependent call. The child's deadline never
    /// extends past the parent's, and cancelling the parent cancels the
    /// child (but not vice versa).
    pub fn child(&self, ttl: Duration) -> Self {
        let intrinsic = Instant::now() + ttl;
        Self {
            deadline: Deadline::at(intrinsic.min(self.deadline.instant())),
            cancel: self.cancel.child_token(),
        }
    }

    pub fn deadline(&self) -> Deadline {
        self.deadline
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Race `fut` against this context's deadline and cancellation.
    ///
    /// Suspended work wakes with `deadline-exceeded` on expiry and
    /// `cancelled` on cancellation; already-started work is not forcibly
    /// terminated, it is simply no longer awaited.
    pub async fn run<T, F>(&self, fut: F) -> crate::Result<T>
    where
        F: Future<Output = crate::Result<T>>,
    {
        tokio::select! {
            result = fut => result,
            () = self.cancel.cancelled() => Err(Error::cancelled("context cancelled")),
            () = tokio::time::sleep_until(self.deadline.instant()) => {
                Err(Error::deadline_exceeded("context deadline expired"))
            }
        }
    }
}
