//! The refresh controller.
//!
//! Every change of the active actor starts a new epoch. A fetch started
//! in an older epoch may still complete, but its result is dropped: the
//! user-scoped state only ever reflects the latest actor.

use johndao_canister::{Actor, CallResult};
use johndao_sync::{Cell, Observable, Readable, Subscription};
use johndao_types::{User, UserState};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::notify::{Notifier, Toast};

struct Inner {
    state: Cell<UserState>,
    /// Current epoch. Compared inside each state write, so a stale fetch
    /// can never overwrite the state of a newer epoch.
    epoch: AtomicU64,
    notifier: Arc<dyn Notifier>,
    runtime: Handle,
    in_flight: Mutex<Vec<JoinHandle<()>>>,
}

impl Inner {
    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    /// Writes `next` unless a newer epoch has begun.
    fn write(&self, epoch: u64, next: UserState) -> bool {
        self.state
            .try_update(|_| self.is_current(epoch).then_some(next))
    }

    fn refresh(self: &Arc<Self>, actor: Option<Actor>) {
        let current = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;

        let Some(actor) = actor else {
            tracing::debug!(epoch = current, "no active actor");
            self.write(current, UserState::NotLoggedIn);
            return;
        };

        if !self.write(current, UserState::Loading) {
            return;
        }

        tracing::debug!(epoch = current, principal = %actor.principal(), "fetching user");
        let inner = self.clone();
        let task = self.runtime.spawn(async move {
            let outcome = actor.get_user().await;
            inner.complete(current, outcome);
        });

        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        in_flight.retain(|task| !task.is_finished());
        in_flight.push(task);
    }

    fn complete(&self, started: u64, outcome: CallResult<User>) {
        let next = match outcome {
            Ok(Ok(user)) => UserState::Loaded { user },
            Ok(Err(error)) => UserState::Error { error },
            Err(e) => {
                if self.is_current(started) {
                    tracing::error!(error = %e, "get_user call failed");
                    self.notifier.notify(Toast::error(format!("Call failed: {e}")));
                } else {
                    tracing::debug!(epoch = started, error = %e, "discarding stale failure");
                }
                return;
            }
        };

        if let UserState::Error { error } = &next {
            tracing::info!(error = %error, "canister returned an error for get_user");
        }
        if !self.write(started, next) {
            tracing::debug!(
                epoch = started,
                current = self.epoch.load(Ordering::SeqCst),
                "discarding stale fetch"
            );
        }
    }
}

/// Drives the user-scoped state from the active actor.
///
/// State subscribers may call [`RefreshController::refresh`]; the newer
/// epoch's state is delivered after the current one.
pub struct RefreshController {
    inner: Arc<Inner>,
    _selector: Subscription,
}

impl RefreshController {
    /// Subscribes to `selector` and refreshes on every emission, starting
    /// with its current value.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new<S>(selector: &S, notifier: Arc<dyn Notifier>) -> Self
    where
        S: Observable<Option<Actor>>,
    {
        Self::with_runtime(selector, notifier, Handle::current())
    }

    /// Like [`RefreshController::new`], spawning fetches on `runtime`.
    pub fn with_runtime<S>(selector: &S, notifier: Arc<dyn Notifier>, runtime: Handle) -> Self
    where
        S: Observable<Option<Actor>>,
    {
        let inner = Arc::new(Inner {
            state: Cell::new(UserState::NotLoggedIn),
            epoch: AtomicU64::new(0),
            notifier,
            runtime,
            in_flight: Mutex::new(Vec::new()),
        });
        let driver = inner.clone();
        let subscription = selector.subscribe(move |actor: &Option<Actor>| {
            driver.refresh(actor.clone());
        });
        Self {
            inner,
            _selector: subscription,
        }
    }

    /// The user-scoped state.
    pub fn state(&self) -> Readable<UserState> {
        self.inner.state.readable()
    }

    /// Starts a new epoch for `actor`, as if the selector had emitted it.
    pub fn refresh(&self, actor: Option<Actor>) {
        self.inner.refresh(actor);
    }

    /// The current epoch.
    pub fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst)
    }

    /// Waits until every fetch started so far has completed.
    pub async fn settle(&self) {
        loop {
            let pending: Vec<JoinHandle<()>> = self
                .inner
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .drain(..)
                .collect();
            if pending.is_empty() {
                return;
            }
            for task in pending {
                if let Err(e) = task.await {
                    tracing::error!(error = %e, "fetch task failed");
                }
            }
        }
    }
}
