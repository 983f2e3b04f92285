//! Derived values over a changing set of sources.
//!
//! [`Aggregate<S, T>`] combines an ordered list of [`Readable<S>`] sources
//! into one published `T`. Unlike a fixed binding, the list itself can be
//! replaced at any time: sources that stay keep their subscription and last
//! value, dropped sources are unsubscribed, new ones are subscribed. Outside
//! listeners never have to re-subscribe.
//!
//! [`KeyedAggregate<S, T>`] is the keyed variant used by collection
//! validators: it carries a key per source and hands the combine function
//! `(Key, S)` pairs in declared order.
//!
//! # Pending Sources
//!
//! Each tracked source has a pending flag, raised by the source's
//! invalidation callback and cleared when it delivers a value. The combine
//! function does not run while any source is pending. When the first source
//! turns pending the aggregate forwards an invalidation to its own listeners,
//! and the recomputation that follows always delivers, so pending flags
//! further downstream clear in turn.
//!
//! # Lifecycle
//!
//! An aggregate is lazy: the first listener subscribes it to every source
//! and computes the initial value; dropping the last listener's
//! [`Subscription`] tears all source subscriptions down again.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use slotmap::{new_key_type, SlotMap};

use crate::logging::targets;
use crate::spec::Key;
use crate::store::{self, Listener, Readable, Store, Subscription};

/// A tracked source.
pub type Source<S> = Arc<dyn Readable<S>>;

/// Cleanup callback returned by an effect combine function.
pub type Cleanup = Box<dyn FnOnce() + Send>;

type PureFn<S, T> = Box<dyn Fn(&[S]) -> T + Send + Sync>;
type EffectFn<S, T> = Box<dyn Fn(&[S], &Publisher<T>) -> Option<Cleanup> + Send + Sync>;

new_key_type! {
    struct EntryKey;
}

fn same_source<S>(a: &Source<S>, b: &Source<S>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

enum Combine<S, T> {
    /// The return value is published.
    Pure(PureFn<S, T>),
    /// Publishes through a [`Publisher`]; may return a cleanup callback.
    Effect(EffectFn<S, T>),
}

struct Entry<S> {
    source: Source<S>,
    last: Option<S>,
    pending: bool,
    subscription: Option<Subscription>,
}

impl<S> Entry<S> {
    fn new(source: Source<S>) -> Self {
        Self {
            source,
            last: None,
            pending: false,
            subscription: None,
        }
    }
}

struct Tracking<S> {
    entries: SlotMap<EntryKey, Entry<S>>,
    order: Vec<EntryKey>,
    started: bool,
    /// Set while sources are being (re)subscribed; recomputation waits.
    syncing: bool,
    cleanup: Option<Cleanup>,
}

impl<S: Clone> Tracking<S> {
    fn any_pending(&self) -> bool {
        self.order.iter().any(|key| self.entries[*key].pending)
    }

    /// Values in declared order, or `None` if the combine must not run yet.
    fn ready_values(&self) -> Option<Vec<S>> {
        if !self.started || self.syncing || self.any_pending() {
            return None;
        }
        self.order
            .iter()
            .map(|key| self.entries[*key].last.clone())
            .collect()
    }
}

struct AggregateInner<S, T> {
    this: Weak<Self>,
    combine: Combine<S, T>,
    output: Store<Option<T>>,
    tracking: Mutex<Tracking<S>>,
    publishes: AtomicU64,
}

/// Publishes values from an effect combine function.
///
/// Holds only a weak reference; publishing after the aggregate is gone is a
/// no-op.
pub struct Publisher<T> {
    target: Weak<dyn PublishTarget<T>>,
}

trait PublishTarget<T>: Send + Sync {
    fn publish(&self, value: T);
}

impl<S, T> PublishTarget<T> for AggregateInner<S, T>
where
    S: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn publish(&self, value: T) {
        self.publishes.fetch_add(1, Ordering::SeqCst);
        self.output.set(Some(value));
    }
}

impl<T> Clone for Publisher<T> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
        }
    }
}

impl<T> Publisher<T> {
    /// Publish a value to the aggregate's listeners.
    pub fn publish(&self, value: T) {
        if let Some(target) = self.target.upgrade() {
            target.publish(value);
        }
    }
}

/// A value derived from an ordered, replaceable list of sources.
///
/// Cloning an `Aggregate` creates a new handle to the **same** inner state.
///
/// # Example
///
/// ```
/// use horizon_lattice_validate::aggregate::{Aggregate, Source};
/// use horizon_lattice_validate::store::Store;
/// use std::sync::Arc;
///
/// let a = Store::gated(1);
/// let b = Store::gated(2);
/// let sum = Aggregate::pure(|values: &[i32]| values.iter().sum::<i32>());
/// sum.set(vec![Arc::new(a.clone()) as Source<i32>, Arc::new(b.clone())]);
///
/// let _sub = sum.subscribe(|total| println!("total = {total}"));
/// a.set(10);
/// assert_eq!(sum.get(), Some(12));
/// ```
pub struct Aggregate<S, T> {
    inner: Arc<AggregateInner<S, T>>,
}

impl<S, T> Clone for Aggregate<S, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, T> Aggregate<S, T>
where
    S: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn with_combine(combine: Combine<S, T>) -> Self {
        Self {
            inner: Arc::new_cyclic(|this| AggregateInner {
                this: this.clone(),
                combine,
                output: Store::new(None),
                tracking: Mutex::new(Tracking {
                    entries: SlotMap::with_key(),
                    order: Vec::new(),
                    started: false,
                    syncing: false,
                    cleanup: None,
                }),
                publishes: AtomicU64::new(0),
            }),
        }
    }

    /// Create an aggregate whose combine function's return value is
    /// published.
    pub fn pure<F>(combine: F) -> Self
    where
        F: Fn(&[S]) -> T + Send + Sync + 'static,
    {
        Self::with_combine(Combine::Pure(Box::new(combine)))
    }

    /// Create an aggregate whose combine function publishes through a
    /// [`Publisher`], possibly later, and may return a cleanup callback.
    ///
    /// The cleanup runs before the next recomputation and on teardown.
    pub fn effect<F>(combine: F) -> Self
    where
        F: Fn(&[S], &Publisher<T>) -> Option<Cleanup> + Send + Sync + 'static,
    {
        Self::with_combine(Combine::Effect(Box::new(combine)))
    }

    /// Replace the tracked sources.
    pub fn set(&self, sources: Vec<Source<S>>) {
        AggregateInner::retarget(&self.inner, sources);
    }

    /// Replace the tracked sources with `f(current)`.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(Vec<Source<S>>) -> Vec<Source<S>>,
    {
        let next = f(self.sources());
        self.set(next);
    }

    /// Start tracking additional sources.
    pub fn include(&self, sources: impl IntoIterator<Item = Source<S>>) {
        let sources: Vec<_> = sources.into_iter().collect();
        self.update(|mut current| {
            current.extend(sources);
            current
        });
    }

    /// Stop tracking the given sources.
    pub fn exclude(&self, sources: &[Source<S>]) {
        self.update(|current| {
            current
                .into_iter()
                .filter(|source| !sources.iter().any(|gone| same_source(source, gone)))
                .collect()
        });
    }

    /// The currently tracked sources, in declared order.
    pub fn sources(&self) -> Vec<Source<S>> {
        let tracking = self.inner.tracking.lock();
        tracking
            .order
            .iter()
            .map(|key| Arc::clone(&tracking.entries[*key].source))
            .collect()
    }

    /// The last published value, if any.
    pub fn get(&self) -> Option<T> {
        self.inner.output.get()
    }

    /// Whether the aggregate is currently subscribed to its sources.
    pub fn is_started(&self) -> bool {
        self.inner.tracking.lock().started
    }

    /// Register a listener, starting the aggregate if it is the first one.
    pub fn listen(&self, listener: Listener<T>) -> Subscription {
        if !self.is_started() {
            AggregateInner::start(&self.inner);
        }

        let forward = listener.clone();
        let wrapped = Listener::new(move |value: &Option<T>| {
            if let Some(value) = value {
                forward.notify(value);
            }
        })
        .with_invalidate(move || listener.invalidate());
        let subscription = self.inner.output.listen(wrapped);

        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            drop(subscription);
            if let Some(inner) = weak.upgrade() {
                if inner.output.listener_count() == 0 {
                    inner.stop();
                }
            }
        })
    }

    /// Register a value callback.
    pub fn subscribe<F>(&self, on_value: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.listen(Listener::new(on_value))
    }
}

impl<S, T> AggregateInner<S, T>
where
    S: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn entry_listener(this: &Arc<Self>, key: EntryKey) -> Listener<S> {
        let on_value = Arc::downgrade(this);
        let on_invalidate = Arc::downgrade(this);
        Listener::new(move |value: &S| {
            if let Some(inner) = on_value.upgrade() {
                inner.receive(key, value.clone());
            }
        })
        .with_invalidate(move || {
            if let Some(inner) = on_invalidate.upgrade() {
                inner.mark_pending(key);
            }
        })
    }

    fn start(this: &Arc<Self>) {
        let keys = {
            let mut tracking = this.tracking.lock();
            if tracking.started {
                return;
            }
            tracking.started = true;
            tracking.syncing = true;
            tracking.order.clone()
        };
        tracing::trace!(target: targets::AGGREGATE, sources = keys.len(), "aggregate started");
        Self::subscribe_entries(this, keys);
        this.tracking.lock().syncing = false;
        this.recompute();
    }

    fn stop(&self) {
        let (subscriptions, cleanup) = {
            let mut tracking = self.tracking.lock();
            tracking.started = false;
            let mut subscriptions = Vec::new();
            for entry in tracking.entries.values_mut() {
                entry.last = None;
                entry.pending = false;
                subscriptions.extend(entry.subscription.take());
            }
            (subscriptions, tracking.cleanup.take())
        };
        tracing::trace!(target: targets::AGGREGATE, sources = subscriptions.len(), "aggregate stopped");
        drop(subscriptions);
        if let Some(cleanup) = cleanup {
            cleanup();
        }
    }

    fn subscribe_entries(this: &Arc<Self>, keys: Vec<EntryKey>) {
        for key in keys {
            let source = match this.tracking.lock().entries.get(key) {
                Some(entry) => Arc::clone(&entry.source),
                None => continue,
            };
            let subscription = source.listen(Self::entry_listener(this, key));
            let mut tracking = this.tracking.lock();
            match tracking.entries.get_mut(key) {
                Some(entry) => entry.subscription = Some(subscription),
                None => {
                    drop(tracking);
                    drop(subscription);
                }
            }
        }
    }

    fn retarget(this: &Arc<Self>, sources: Vec<Source<S>>) {
        let (removed, fresh, started) = {
            let mut tracking = this.tracking.lock();
            let mut previous = tracking.order.clone();
            let mut order = Vec::with_capacity(sources.len());
            let mut fresh = Vec::new();

            for source in sources {
                let kept = previous
                    .iter()
                    .position(|key| same_source(&tracking.entries[*key].source, &source));
                match kept {
                    Some(index) => order.push(previous.remove(index)),
                    None => {
                        let key = tracking.entries.insert(Entry::new(source));
                        order.push(key);
                        fresh.push(key);
                    }
                }
            }

            let removed: Vec<_> = previous
                .into_iter()
                .filter_map(|key| tracking.entries.remove(key))
                .filter_map(|entry| entry.subscription)
                .collect();

            tracking.order = order;
            let started = tracking.started;
            if started {
                tracking.syncing = true;
            }
            (removed, fresh, started)
        };

        tracing::trace!(
            target: targets::AGGREGATE,
            added = fresh.len(),
            removed = removed.len(),
            "aggregate sources replaced"
        );
        drop(removed);

        if started {
            Self::subscribe_entries(this, fresh);
            this.tracking.lock().syncing = false;
        }
        this.recompute();
    }

    fn receive(&self, key: EntryKey, value: S) {
        {
            let mut tracking = self.tracking.lock();
            let Some(entry) = tracking.entries.get_mut(key) else {
                return;
            };
            entry.last = Some(value);
            entry.pending = false;
        }
        self.recompute();
    }

    fn mark_pending(&self, key: EntryKey) {
        let first = {
            let mut tracking = self.tracking.lock();
            let idle = !tracking.any_pending();
            match tracking.entries.get_mut(key) {
                Some(entry) => entry.pending = true,
                None => return,
            }
            idle && tracking.started && !tracking.syncing
        };
        if first {
            self.output.invalidate();
        }
    }

    /// Combine and publish. Runs under the propagation lock, so a
    /// combination read on one thread cannot be published after a newer one
    /// from another thread.
    fn recompute(&self) {
        let _propagating = store::propagation();
        let (values, cleanup) = {
            let mut tracking = self.tracking.lock();
            let Some(values) = tracking.ready_values() else {
                return;
            };
            (values, tracking.cleanup.take())
        };
        if let Some(cleanup) = cleanup {
            cleanup();
        }

        match &self.combine {
            Combine::Pure(combine) => {
                let value = combine(&values);
                self.publishes.fetch_add(1, Ordering::SeqCst);
                self.output.set(Some(value));
            }
            Combine::Effect(combine) => {
                let before = self.publishes.load(Ordering::SeqCst);
                let publisher = self.publisher();
                let cleanup = combine(&values, &publisher);
                self.tracking.lock().cleanup = cleanup;
                if self.publishes.load(Ordering::SeqCst) == before {
                    self.output.touch();
                }
            }
        }
    }

    fn publisher(&self) -> Publisher<T> {
        Publisher {
            target: self.this.clone(),
        }
    }
}

impl<S, T> Readable<T> for Aggregate<S, T>
where
    S: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn listen(&self, listener: Listener<T>) -> Subscription {
        Aggregate::listen(self, listener)
    }

    fn snapshot(&self) -> Option<T> {
        self.get()
    }
}

impl<S, T: fmt::Debug> fmt::Debug for Aggregate<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tracking = self.inner.tracking.lock();
        f.debug_struct("Aggregate")
            .field("sources", &tracking.order.len())
            .field("started", &tracking.started)
            .field("value", &self.inner.output)
            .finish()
    }
}

/// An [`Aggregate`] over keyed sources.
///
/// Keeps a key list parallel to the source list; the combine function gets
/// `(Key, S)` pairs in declared order. [`set`](Self::set) swaps keys and
/// sources together.
pub struct KeyedAggregate<S, T> {
    keys: Arc<Mutex<Vec<Key>>>,
    aggregate: Aggregate<S, T>,
}

impl<S, T> Clone for KeyedAggregate<S, T> {
    fn clone(&self) -> Self {
        Self {
            keys: Arc::clone(&self.keys),
            aggregate: self.aggregate.clone(),
        }
    }
}

impl<S, T> KeyedAggregate<S, T>
where
    S: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Create a keyed aggregate with a pure combine function.
    pub fn new<F>(combine: F) -> Self
    where
        F: Fn(&[(Key, S)]) -> T + Send + Sync + 'static,
    {
        let keys = Arc::new(Mutex::new(Vec::<Key>::new()));
        let zip_keys = Arc::clone(&keys);
        let aggregate = Aggregate::pure(move |values: &[S]| {
            let keyed: Vec<(Key, S)> = zip_keys
                .lock()
                .iter()
                .cloned()
                .zip(values.iter().cloned())
                .collect();
            combine(&keyed)
        });
        Self { keys, aggregate }
    }

    /// Replace the keyed sources.
    pub fn set(&self, entries: Vec<(Key, Source<S>)>) {
        let (keys, sources): (Vec<_>, Vec<_>) = entries.into_iter().unzip();
        let _propagating = store::propagation();
        *self.keys.lock() = keys;
        self.aggregate.set(sources);
    }

    /// The current keys, in declared order.
    pub fn keys(&self) -> Vec<Key> {
        self.keys.lock().clone()
    }

    /// The last published value, if any.
    pub fn get(&self) -> Option<T> {
        self.aggregate.get()
    }

    /// Register a listener, starting the aggregate if it is the first one.
    pub fn listen(&self, listener: Listener<T>) -> Subscription {
        self.aggregate.listen(listener)
    }

    /// Register a value callback.
    pub fn subscribe<F>(&self, on_value: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.aggregate.subscribe(on_value)
    }
}

impl<S, T> Readable<T> for KeyedAggregate<S, T>
where
    S: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn listen(&self, listener: Listener<T>) -> Subscription {
        KeyedAggregate::listen(self, listener)
    }

    fn snapshot(&self) -> Option<T> {
        self.get()
    }
}
