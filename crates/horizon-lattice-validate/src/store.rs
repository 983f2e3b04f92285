//! Observable containers for the validation graph.
//!
//! This module provides the publish/subscribe layer every validator node is
//! built on. It plays the role signals and properties play in the rest of
//! Horizon Lattice, with one extra guarantee: delivery is ordered so that a
//! derived value never recomputes from a half-updated set of inputs.
//!
//! # Key Types
//!
//! - [`Store<T>`] - A shared value with change notification
//! - [`Listener<T>`] - A value callback plus an optional invalidation callback
//! - [`Subscription`] - RAII guard that unsubscribes when dropped
//! - [`Readable`] - Anything that can be listened to (stores, aggregates, nodes)
//!
//! # Delivery Order
//!
//! Setting a store runs every listener's invalidation callback immediately,
//! then queues the value callbacks on a per-thread FIFO queue. When a value
//! callback sets another store, that store's callbacks are appended to the
//! same queue instead of running re-entrantly. The result is breadth-first
//! propagation: every direct dependent learns that an input is about to
//! change before any of them recomputes.
//!
//! # Threads
//!
//! Publication is serialized process-wide by a reentrant lock. A store
//! write runs its invalidations and drains its value callbacks as one step,
//! and aggregates and validator nodes take the same lock while they
//! recompute. Two threads settling results at once therefore never
//! interleave a read of inputs with a write of a derived value. Callbacks
//! may publish again on their own thread, but must not block on another
//! thread that publishes.
//!
//! # Example
//!
//! ```
//! use horizon_lattice_validate::store::Store;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let name = Store::gated("Ada".to_string());
//! let calls = Arc::new(AtomicUsize::new(0));
//!
//! let calls_clone = calls.clone();
//! let _sub = name.subscribe(move |_| {
//!     calls_clone.fetch_add(1, Ordering::SeqCst);
//! });
//!
//! // Equal values are swallowed by the gate.
//! assert!(!name.set("Ada".to_string()));
//! assert!(name.set("Grace".to_string()));
//! assert_eq!(calls.load(Ordering::SeqCst), 2); // initial delivery + one change
//! ```

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use slotmap::{new_key_type, SlotMap};

use crate::logging::targets;

new_key_type! {
    /// Identifies one listener registered on a [`Store`].
    pub struct ListenerId;
}

type ValueFn<T> = Arc<dyn Fn(&T) + Send + Sync>;
type InvalidateFn = Arc<dyn Fn() + Send + Sync>;
type Job = Box<dyn FnOnce()>;

thread_local! {
    static QUEUE: RefCell<VecDeque<Job>> = RefCell::new(VecDeque::new());
    static DRAINING: Cell<bool> = const { Cell::new(false) };
}

static PROPAGATION: ReentrantMutex<()> = parking_lot::const_reentrant_mutex(());

/// Hold the process-wide propagation lock.
///
/// Reentrant on the current thread; other threads wait until it is released.
pub(crate) fn propagation() -> ReentrantMutexGuard<'static, ()> {
    PROPAGATION.lock()
}

/// Resets the drain flag even if a callback unwinds, so a panicking listener
/// does not leave the thread unable to deliver notifications.
struct DrainGuard;

impl Drop for DrainGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            QUEUE.with(|queue| queue.borrow_mut().clear());
        }
        DRAINING.with(|draining| draining.set(false));
    }
}

fn dispatch(jobs: Vec<Job>) {
    QUEUE.with(|queue| queue.borrow_mut().extend(jobs));
    if DRAINING.with(|draining| draining.replace(true)) {
        return;
    }

    let _guard = DrainGuard;
    while let Some(job) = QUEUE.with(|queue| queue.borrow_mut().pop_front()) {
        job();
    }
}

/// A pair of callbacks registered on a [`Readable`].
///
/// The value callback receives every published value. The invalidation
/// callback, if present, runs synchronously when a source is about to
/// publish, before any value callback of the same round runs.
pub struct Listener<T> {
    on_value: ValueFn<T>,
    on_invalidate: Option<InvalidateFn>,
}

impl<T> Clone for Listener<T> {
    fn clone(&self) -> Self {
        Self {
            on_value: Arc::clone(&self.on_value),
            on_invalidate: self.on_invalidate.clone(),
        }
    }
}

impl<T> Listener<T> {
    /// Create a listener with only a value callback.
    pub fn new<F>(on_value: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        Self {
            on_value: Arc::new(on_value),
            on_invalidate: None,
        }
    }

    /// Attach an invalidation callback.
    pub fn with_invalidate<G>(mut self, on_invalidate: G) -> Self
    where
        G: Fn() + Send + Sync + 'static,
    {
        self.on_invalidate = Some(Arc::new(on_invalidate));
        self
    }

    /// Deliver a value.
    pub fn notify(&self, value: &T) {
        (self.on_value)(value);
    }

    /// Deliver an invalidation.
    pub fn invalidate(&self) {
        if let Some(on_invalidate) = &self.on_invalidate {
            on_invalidate();
        }
    }
}

impl<T> fmt::Debug for Listener<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("invalidates", &self.on_invalidate.is_some())
            .finish()
    }
}

/// A guard that removes its listener when dropped.
///
/// Returned by every `subscribe`/`listen` call in this crate. Keep it alive
/// for as long as notifications are wanted.
#[must_use = "dropping a Subscription immediately unsubscribes"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Create a subscription that runs `cancel` when dropped.
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with nothing to cancel.
    pub fn empty() -> Self {
        Self { cancel: None }
    }

    /// Unsubscribe now.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Something that publishes values of type `T`.
///
/// Implemented by [`Store`], by the aggregates in [`crate::aggregate`], and
/// by validator nodes. Aggregates track sources as `Arc<dyn Readable<T>>`
/// and compare them by pointer identity.
pub trait Readable<T>: Send + Sync {
    /// Register a listener. The current value, if any, is delivered
    /// immediately.
    fn listen(&self, listener: Listener<T>) -> Subscription;

    /// The most recently published value, if any.
    fn snapshot(&self) -> Option<T>;

    /// Register a value callback.
    fn subscribe<F>(&self, on_value: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
        Self: Sized,
    {
        self.listen(Listener::new(on_value))
    }
}

struct Slot<T> {
    value: T,
    listeners: SlotMap<ListenerId, Listener<T>>,
}

struct StoreInner<T> {
    slot: Mutex<Slot<T>>,
    same: Option<fn(&T, &T) -> bool>,
}

/// A shared, observable value.
///
/// Cloning a `Store` creates a new handle to the **same** value.
///
/// A store built with [`Store::gated`] only notifies when the new value is
/// not equal to the stored one. This is what stops a value that round-trips
/// through the graph unchanged from triggering another pass. A store built
/// with [`Store::new`] notifies on every `set`.
///
/// # Thread Safety
///
/// `Store<T>` is `Send + Sync`. No lock is held while listeners run.
pub struct Store<T> {
    inner: Arc<StoreInner<T>>,
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Store<T> {
    /// Create a store that notifies on every `set`.
    pub fn new(value: T) -> Self {
        Self::build(value, None)
    }

    fn build(value: T, same: Option<fn(&T, &T) -> bool>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                slot: Mutex::new(Slot {
                    value,
                    listeners: SlotMap::with_key(),
                }),
                same,
            }),
        }
    }

    /// Get the current value.
    pub fn get(&self) -> T {
        self.inner.slot.lock().value.clone()
    }

    /// Access the current value through a closure without cloning.
    ///
    /// The store is locked while `f` runs; `f` must not touch this store.
    pub fn with<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&T) -> R,
    {
        f(&self.inner.slot.lock().value)
    }

    /// Set the value, returning `true` if listeners were notified.
    pub fn set(&self, value: T) -> bool {
        let _propagating = propagation();
        let (listeners, value) = {
            let mut slot = self.inner.slot.lock();
            if let Some(same) = self.inner.same {
                if same(&slot.value, &value) {
                    return false;
                }
            }
            slot.value = value;
            let listeners: Vec<_> = slot.listeners.values().cloned().collect();
            (listeners, slot.value.clone())
        };

        tracing::trace!(target: targets::STORE, listeners = listeners.len(), "store changed");
        for listener in &listeners {
            listener.invalidate();
        }
        Self::deliver(listeners, value);
        true
    }

    /// Replace the value with `f(current)`.
    pub fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&T) -> T,
    {
        let next = self.with(f);
        self.set(next)
    }

    /// Tell listeners a new value is coming without delivering one.
    ///
    /// The caller is responsible for a following [`set`](Self::set) or
    /// [`touch`](Self::touch), otherwise dependents stay pending.
    pub fn invalidate(&self) {
        let _propagating = propagation();
        let listeners: Vec<_> = self.inner.slot.lock().listeners.values().cloned().collect();
        for listener in &listeners {
            listener.invalidate();
        }
    }

    /// Re-deliver the current value to every listener.
    pub fn touch(&self) {
        let _propagating = propagation();
        let (listeners, value) = {
            let slot = self.inner.slot.lock();
            let listeners: Vec<_> = slot.listeners.values().cloned().collect();
            (listeners, slot.value.clone())
        };
        Self::deliver(listeners, value);
    }

    fn deliver(listeners: Vec<Listener<T>>, value: T) {
        if listeners.is_empty() {
            return;
        }
        let value = Arc::new(value);
        let jobs = listeners
            .into_iter()
            .map(|listener| {
                let value = Arc::clone(&value);
                Box::new(move || listener.notify(&value)) as Job
            })
            .collect();
        dispatch(jobs);
    }

    /// Register a value callback; the current value is delivered first.
    pub fn subscribe<F>(&self, on_value: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.listen(Listener::new(on_value))
    }

    /// Register a value callback that only sees future changes.
    pub fn observe<F>(&self, on_value: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.inner.slot.lock().listeners.insert(Listener::new(on_value));
        self.subscription(id)
    }

    /// Register a listener; the current value is delivered first.
    pub fn listen(&self, listener: Listener<T>) -> Subscription {
        let (id, value) = {
            let mut slot = self.inner.slot.lock();
            let id = slot.listeners.insert(listener.clone());
            (id, slot.value.clone())
        };
        listener.notify(&value);
        self.subscription(id)
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.slot.lock().listeners.len()
    }

    fn subscription(&self, id: ListenerId) -> Subscription {
        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.slot.lock().listeners.remove(id);
            }
        })
    }
}

impl<T: Clone + Send + Sync + 'static> Store<T> {
    /// Create a store that only notifies when `same` reports a change.
    pub fn gated_by(value: T, same: fn(&T, &T) -> bool) -> Self {
        Self::build(value, Some(same))
    }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> Store<T> {
    /// Create a store that only notifies when the value actually changes.
    ///
    /// Equality is `PartialEq`. For JSON values that means `1` and `1.0`
    /// differ; use [`gated_by`](Self::gated_by) with
    /// [`same_option`](crate::shape::same_option) to compare numbers by value.
    pub fn gated(value: T) -> Self {
        Self::build(value, Some(<T as PartialEq>::eq as fn(&T, &T) -> bool))
    }
}

impl<T: Clone + Send + Sync + 'static> Readable<T> for Store<T> {
    fn listen(&self, listener: Listener<T>) -> Subscription {
        Store::listen(self, listener)
    }

    fn snapshot(&self) -> Option<T> {
        Some(self.get())
    }
}

impl<T: Clone + Default + Send + Sync + 'static> Default for Store<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for Store<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.inner.slot.lock();
        f.debug_struct("Store")
            .field("value", &slot.value)
            .field("listeners", &slot.listeners.len())
            .field("gated", &self.inner.same.is_some())
            .finish()
    }
}

static_assertions::assert_impl_all!(Store<serde_json::Value>: Send, Sync);
static_assertions::assert_impl_all!(Subscription: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_subscribe_delivers_current_value() {
        let store = Store::new(7);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_clone = seen.clone();
        let _sub = store.subscribe(move |&v| seen_clone.lock().push(v));

        assert_eq!(*seen.lock(), vec![7]);
    }

    #[test]
    fn test_gated_store_skips_equal_values() {
        let store = Store::gated(serde_json::json!({"a": [1, 2]}));
        let count = Arc::new(AtomicUsize::new(0));

        let count_clone = count.clone();
        let _sub = store.observe(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert!(store.set(serde_json::json!({"a": [1, 3]})));
        assert!(!store.set(serde_json::json!({"a": [1, 3]})));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_ungated_store_always_notifies() {
        let store = Store::new(1);
        let count = Arc::new(AtomicUsize::new(0));

        let count_clone = count.clone();
        let _sub = store.observe(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        store.set(1);
        store.set(1);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_drop_subscription_unsubscribes() {
        let store = Store::new(0);
        let seen = Arc::new(Mutex::new(Vec::new()));

        {
            let seen_clone = seen.clone();
            let _sub = store.observe(move |&v| seen_clone.lock().push(v));
            store.set(1);
            assert_eq!(store.listener_count(), 1);
        }

        store.set(2);
        assert_eq!(*seen.lock(), vec![1]);
        assert_eq!(store.listener_count(), 0);
    }

    #[test]
    fn test_invalidation_runs_before_any_value() {
        let store = Store::new(0);
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut subs = Vec::new();
        for name in ["a", "b"] {
            let on_value = log.clone();
            let on_invalidate = log.clone();
            let listener = Listener::new(move |_: &i32| on_value.lock().push(format!("{name}:value")))
                .with_invalidate(move || on_invalidate.lock().push(format!("{name}:invalidate")));
            subs.push(store.listen(listener));
        }
        log.lock().clear();

        store.set(1);
        assert_eq!(
            *log.lock(),
            vec!["a:invalidate", "b:invalidate", "a:value", "b:value"]
        );
    }

    #[test]
    fn test_nested_sets_are_breadth_first() {
        let first = Store::new(0);
        let second = Store::new(0);
        let log = Arc::new(Mutex::new(Vec::new()));

        let second_clone = second.clone();
        let log_a = log.clone();
        let _a = first.observe(move |&v| {
            log_a.lock().push("first-a");
            second_clone.set(v);
        });
        let log_b = log.clone();
        let _b = first.observe(move |_| log_b.lock().push("first-b"));
        let log_c = log.clone();
        let _c = second.observe(move |_| log_c.lock().push("second"));

        first.set(1);
        assert_eq!(*log.lock(), vec!["first-a", "first-b", "second"]);
    }

    #[test]
    fn test_touch_redelivers_without_change() {
        let store = Store::gated(5);
        let count = Arc::new(AtomicUsize::new(0));

        let count_clone = count.clone();
        let _sub = store.observe(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        store.touch();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_queue_recovers_after_panicking_listener() {
        let store = Store::new(0);
        let sub = store.observe(|&v| {
            if v == 1 {
                panic!("listener failure");
            }
        });

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            store.set(1);
        }));
        assert!(result.is_err());
        drop(sub);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let _sub = store.observe(move |&v| seen_clone.lock().push(v));
        store.set(2);
        assert_eq!(*seen.lock(), vec![2]);
    }
}
