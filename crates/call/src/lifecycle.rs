use crate::Error;
use std::future::Future;
use std::sync::Mutex;
use tokio::sync::Notify;

/// Observable lifecycle position of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Once-semantics for start/stop transitions.
///
/// `start` and `stop` each run their closure at most once per lifetime;
/// concurrent callers block on the in-flight transition and then observe
/// its outcome. A failed start leaves the component Stopped.
pub struct Lifecycle {
    state: Mutex<LifecycleState>,
    changed: Notify,
    // Serializes transitions. Held across the closure's await points, so
    // it must be the async mutex.
    gate: tokio::sync::Mutex<()>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LifecycleState::Idle),
            changed: Notify::new(),
            gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock().expect("lifecycle state lock is never poisoned")
    }

    pub fn is_running(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    fn set(&self, next: LifecycleState) {
        *self.state.lock().expect("lifecycle state lock is never poisoned") = next;
        tracing::trace!(state = ?next, "lifecycle transition");
        self.changed.notify_waiters();
    }

    /// Transition Idle → Running by way of `f`. A second start after a
    /// successful one is a no-op; a start after stop (or after a failed
    /// start) is a lifecycle error.
    pub async fn start<F, Fut>(&self, f: F) -> crate::Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = crate::Result<()>>,
    {
        let _gate = self.gate.lock().await;
        match self.state() {
            LifecycleState::Running => return Ok(()),
            LifecycleState::Stopping | LifecycleState::Stopped => {
                return Err(Error::failed_precondition("lifecycle has already stopped"));
            }
            LifecycleState::Idle => {}
            // The gate serializes transitions.
            LifecycleState::Starting => unreachable!("start observed while gate is held"),
        }
        self.set(LifecycleState::Starting);
        match f().await {
            Ok(()) => {
                self.set(LifecycleState::Running);
                Ok(())
            }
            Err(err) => {
                self.set(LifecycleState::Stopped);
                Err(err)
            }
        }
    }

    /// Transition Running → Stopped by way of `f`. Stopping an Idle
    /// component marks it Stopped without running `f`; stopping twice is
    /// a no-op.
    pub async fn stop<F, Fut>(&self, f: F) -> crate::Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = crate::Result<()>>,
    {
        let _gate = self.gate.lock().await;
        match self.state() {
            LifecycleState::Stopped => return Ok(()),
            LifecycleState::Idle => {
                self.set(LifecycleState::Stopped);
                return Ok(());
            }
            LifecycleState::Running => {}
            LifecycleState::Starting | LifecycleState::Stopping => {
                unreachable!("transition observed while gate is held")
            }
        }
        self.set(LifecycleState::Stopping);
        let result = f().await;
        self.set(LifecycleState::Stopped);
        result
    }

    /// Wait until Running. Errors once the component stops (or fails to
    /// start) instead, so waiters are not stranded.
    pub async fn started(&self) -> crate::Result<()> {
        loop {
            // Register interest before checking, to not miss a wakeup.
            let changed = self.changed.notified();
            match self.state() {
                LifecycleState::Running => return Ok(()),
                LifecycleState::Stopping | LifecycleState::Stopped => {
                    return Err(Error::failed_precondition("lifecycle stopped before start"));
                }
                LifecycleState::Idle | LifecycleState::Starting => changed.await,
            }
        }
    }
}
