use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Why a shared refresh did not produce a credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshFailure(pub String);

impl std::fmt::Display for RefreshFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub type RefreshOutcome = Result<String, RefreshFailure>;

#[derive(Debug, Default)]
struct RefreshState {
    in_progress: bool,
    waiters: Vec<oneshot::Sender<RefreshOutcome>>,
}

/// Single-flight coordinator for one credential namespace.
///
/// The first caller of [`RefreshCoordinator::begin`] while no refresh is
/// running becomes the leader and must settle its [`RefreshLease`]; every
/// caller arriving before that is queued and receives the leader's outcome in
/// arrival order. Cloning shares the state.
#[derive(Debug, Clone, Default)]
pub struct RefreshCoordinator {
    state: Arc<Mutex<RefreshState>>,
}

pub enum RefreshTicket {
    Leader(RefreshLease),
    Waiter(RefreshWaiter),
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check-then-set in one critical section: either take the lease or join the queue.
    pub fn begin(&self) -> RefreshTicket {
        let mut state = self.lock();
        if state.in_progress {
            let (tx, rx) = oneshot::channel();
            state.waiters.push(tx);
            debug!(queued = state.waiters.len(), "refresh in progress, request queued");
            RefreshTicket::Waiter(RefreshWaiter { rx })
        } else {
            state.in_progress = true;
            debug!("starting credential refresh");
            RefreshTicket::Leader(RefreshLease {
                coordinator: self.clone(),
                settled: false,
            })
        }
    }

    pub fn is_refreshing(&self) -> bool {
        self.lock().in_progress
    }

    pub fn queued(&self) -> usize {
        self.lock().waiters.len()
    }

    fn settle(&self, outcome: RefreshOutcome) -> usize {
        let waiters = {
            let mut state = self.lock();
            state.in_progress = false;
            std::mem::take(&mut state.waiters)
        };
        let released = waiters.len();
        for tx in waiters {
            // receiver may have been dropped by a cancelled caller
            let _ = tx.send(outcome.clone());
        }
        released
    }

    fn lock(&self) -> MutexGuard<'_, RefreshState> {
        match self.state.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        }
    }
}

/// Held by the task performing the refresh exchange.
///
/// Dropping an unsettled lease (e.g. the leading future was cancelled)
/// clears the flag and rejects every waiter.
pub struct RefreshLease {
    coordinator: RefreshCoordinator,
    settled: bool,
}

impl RefreshLease {
    /// Clear the in-progress flag and hand `token` to every queued caller.
    pub fn publish(mut self, token: &str) -> usize {
        self.settled = true;
        self.coordinator.settle(Ok(token.to_string()))
    }

    /// Clear the in-progress flag and reject every queued caller.
    pub fn fail(mut self, reason: impl Into<String>) -> usize {
        self.settled = true;
        self.coordinator.settle(Err(RefreshFailure(reason.into())))
    }
}

impl Drop for RefreshLease {
    fn drop(&mut self) {
        if !self.settled {
            let released = self
                .coordinator
                .settle(Err(RefreshFailure("credential refresh abandoned".to_string())));
            warn!(released, "refresh lease dropped before completion");
        }
    }
}

pub struct RefreshWaiter {
    rx: oneshot::Receiver<RefreshOutcome>,
}

impl RefreshWaiter {
    pub async fn wait(self) -> RefreshOutcome {
        self.rx.await.unwrap_or_else(|_| {
            Err(RefreshFailure("credential refresh abandoned".to_string()))
        })
    }
}
