//! Observable cells.
//!
//! A [`Cell`] holds a value and an ordered list of subscribers. Every
//! `set` notifies the subscribers synchronously, in subscription order, with
//! the cell's lock released so callbacks may read or write other cells.
//!
//! A cell may carry a *start* hook. It runs when the first subscriber
//! attaches and returns an optional [`StopFn`] that runs when the last
//! subscriber detaches. Document subscriptions use this to open a remote
//! listener lazily and to release it exactly once.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Bound shared by every value a cell can hold.
pub trait CellValue: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> CellValue for T {}

/// A subscriber callback.
pub type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Teardown returned by a start hook.
pub type StopFn = Box<dyn FnOnce() + Send>;

type StartFn<T> = Arc<dyn Fn(Setter<T>) -> Option<StopFn> + Send + Sync>;

/// Anything that can be subscribed to and read.
pub trait Observable<T: CellValue> {
    /// Attaches a boxed subscriber. It is called at once with the current value.
    fn subscribe_with(&self, callback: Callback<T>) -> Subscription;

    /// Returns a clone of the current value.
    fn get(&self) -> T;

    /// Attaches a subscriber. It is called at once with the current value.
    fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription
    where
        Self: Sized,
    {
        self.subscribe_with(Arc::new(callback))
    }
}

struct State<T> {
    value: T,
    subscribers: Vec<(u64, Callback<T>)>,
    next_id: u64,
    /// False while a start hook is pending; writes are stored but not delivered.
    running: bool,
    stop: Option<StopFn>,
    notifying: bool,
    pending: VecDeque<T>,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    start: Option<StartFn<T>>,
}

impl<T: CellValue> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, value: T) {
        self.write(|_| Some(value));
    }

    /// Computes the next value from the current one under the state lock,
    /// so concurrent writers cannot interleave. `None` leaves the cell as is.
    fn write(&self, next: impl FnOnce(&T) -> Option<T>) {
        let mut state = self.lock();
        let Some(value) = next(&state.value) else {
            return;
        };
        if state.notifying {
            // A subscriber wrote back into this cell; the running delivery
            // loop picks the value up after the current round.
            state.value = value.clone();
            state.pending.push_back(value);
            return;
        }
        state.value = value.clone();
        if !state.running || state.subscribers.is_empty() {
            return;
        }
        state.notifying = true;

        let mut next = value;
        loop {
            let callbacks: Vec<Callback<T>> =
                state.subscribers.iter().map(|(_, cb)| cb.clone()).collect();
            drop(state);

            for callback in &callbacks {
                callback(&next);
            }

            state = self.lock();
            match state.pending.pop_front() {
                Some(value) => next = value,
                None => {
                    state.notifying = false;
                    return;
                }
            }
        }
    }

    fn set_distinct(&self, value: T)
    where
        T: PartialEq,
    {
        self.write(|current| (*current != value).then_some(value));
    }

    fn unsubscribe(&self, id: u64) {
        let stop = {
            let mut state = self.lock();
            state.subscribers.retain(|(sid, _)| *sid != id);
            if state.subscribers.is_empty() && self.start.is_some() {
                state.running = false;
                state.stop.take()
            } else {
                None
            }
        };
        if let Some(stop) = stop {
            stop();
        }
    }
}

/// A writable observable cell.
pub struct Cell<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Cell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: CellValue> Cell<T> {
    /// Creates a plain cell holding `value`.
    pub fn new(value: T) -> Self {
        Self::build(value, None)
    }

    /// Creates a cell whose `start` hook runs on first subscribe.
    ///
    /// The hook receives a [`Setter`] for this cell. Values written through
    /// it before the hook returns become the cell's value without being
    /// delivered; the first subscriber then sees the latest one.
    pub fn with_start(
        value: T,
        start: impl Fn(Setter<T>) -> Option<StopFn> + Send + Sync + 'static,
    ) -> Self {
        Self::build(value, Some(Arc::new(start)))
    }

    fn build(value: T, start: Option<StartFn<T>>) -> Self {
        let running = start.is_none();
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    value,
                    subscribers: Vec::new(),
                    next_id: 0,
                    running,
                    stop: None,
                    notifying: false,
                    pending: VecDeque::new(),
                }),
                start,
            }),
        }
    }

    /// Replaces the value and notifies subscribers.
    pub fn set(&self, value: T) {
        self.inner.set(value);
    }

    /// Replaces the value and notifies subscribers, unless it is unchanged.
    pub fn set_distinct(&self, value: T)
    where
        T: PartialEq,
    {
        self.inner.set_distinct(value);
    }

    /// Replaces the value with `f(current)` and notifies subscribers.
    ///
    /// `f` runs with the cell locked and must not touch this cell.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        self.inner.write(|current| Some(f(current)));
    }

    /// Like [`Cell::update`], but `f` may return `None` to leave the value
    /// untouched. Returns whether a value was written.
    pub fn try_update(&self, f: impl FnOnce(&T) -> Option<T>) -> bool {
        let mut written = false;
        self.inner.write(|current| {
            let next = f(current);
            written = next.is_some();
            next
        });
        written
    }

    /// A weak handle that writes into this cell.
    pub fn setter(&self) -> Setter<T> {
        Setter {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// A read-only view of this cell.
    pub fn readable(&self) -> Readable<T> {
        Readable { cell: self.clone() }
    }

    /// Number of attached subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }
}

impl<T: CellValue> Observable<T> for Cell<T> {
    fn subscribe_with(&self, callback: Callback<T>) -> Subscription {
        let (id, needs_start) = {
            let mut state = self.inner.lock();
            let id = state.next_id;
            state.next_id += 1;
            state.subscribers.push((id, callback.clone()));
            let needs_start =
                state.subscribers.len() == 1 && !state.running && self.inner.start.is_some();
            (id, needs_start)
        };

        if needs_start {
            if let Some(start) = self.inner.start.clone() {
                let stop = start(self.setter());
                let mut state = self.inner.lock();
                state.stop = stop;
                state.running = true;
            }
        }

        let value = self.inner.lock().value.clone();
        callback(&value);

        let inner = self.inner.clone();
        Subscription::new(move || inner.unsubscribe(id))
    }

    fn get(&self) -> T {
        self.inner.lock().value.clone()
    }
}

impl<T: CellValue + fmt::Debug> fmt::Debug for Cell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("Cell")
            .field("value", &state.value)
            .field("subscribers", &state.subscribers.len())
            .finish()
    }
}

/// A read-only view of a [`Cell`].
pub struct Readable<T> {
    cell: Cell<T>,
}

impl<T> Clone for Readable<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<T: CellValue> Readable<T> {
    /// Number of attached subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.cell.subscriber_count()
    }
}

impl<T: CellValue> Observable<T> for Readable<T> {
    fn subscribe_with(&self, callback: Callback<T>) -> Subscription {
        self.cell.subscribe_with(callback)
    }

    fn get(&self) -> T {
        self.cell.get()
    }
}

impl<T: CellValue + fmt::Debug> fmt::Debug for Readable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.cell.fmt(f)
    }
}

/// Weak write handle to a cell. Writes after the cell is gone are dropped.
pub struct Setter<T> {
    inner: Weak<Inner<T>>,
}

impl<T> Clone for Setter<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: CellValue> Setter<T> {
    /// Writes `value` into the cell, if it still exists.
    pub fn set(&self, value: T) {
        if let Some(inner) = self.inner.upgrade() {
            inner.set(value);
        }
    }

    /// Like [`Setter::set`], but skips values equal to the current one.
    pub fn set_distinct(&self, value: T)
    where
        T: PartialEq,
    {
        if let Some(inner) = self.inner.upgrade() {
            inner.set_distinct(value);
        }
    }
}

/// Keeps a subscriber attached. Dropping it detaches the subscriber.
#[must_use = "dropping a Subscription detaches the subscriber immediately"]
pub struct Subscription {
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    fn new(detach: impl FnOnce() + Send + 'static) -> Self {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    /// Detaches the subscriber now.
    pub fn unsubscribe(mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("attached", &self.detach.is_some())
            .finish()
    }
}
