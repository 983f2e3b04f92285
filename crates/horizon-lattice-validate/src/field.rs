//! Predicate validator nodes.
//!
//! A [`FieldNode`] validates one value against one predicate and publishes
//! a [`NodeState`] after every evaluation pass. Collection nodes use a
//! `FieldNode` internally for their own collection-level predicate.
//!
//! # Evaluation
//!
//! A pass runs whenever the value, the active flag, or a cross-field lookup
//! changes:
//!
//! 1. Inactive nodes, and undefined values of optional nodes, are valid
//!    without invoking the predicate.
//! 2. Required nodes run the library's required check first; the user
//!    predicate only runs on a present value.
//! 3. A pending predicate publishes a `validating` state right away and
//!    settles the node when its future resolves.
//!
//! Each pass takes a new generation number. A result may only publish while
//! its generation is still current, so a slow result from a superseded pass
//! is dropped instead of overwriting a newer one.
//!
//! # Example
//!
//! ```
//! use horizon_lattice_validate::prelude::*;
//! use serde_json::json;
//!
//! install_library(StandardLibrary::default());
//!
//! let age = FieldNode::build(
//!     json!(16),
//!     NodeConfig::new().with_spec(Spec::check(|v| {
//!         Verdict::check(v.and_then(|v| v.as_u64()) >= Some(18), "too young")
//!     })),
//! )
//! .unwrap();
//!
//! let _ = age.activate(true);
//! assert_eq!(age.state().error, Some(json!("too young")));
//!
//! age.set(json!(21));
//! assert!(age.state().valid);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde_json::Value;

use crate::config::{NodeConfig, SetOptions};
use crate::context::{Context, RelativePath};
use crate::error::{Error, Result};
use crate::group::GroupInner;
use crate::library::{self, PredicateLibrary, required_check};
use crate::logging::targets;
use crate::node::Node;
use crate::runtime;
use crate::shape::{same_option, value_at_path};
use crate::spec::{NodeId, Outline, Predicate, SameFn, SubmitFn};
use crate::state::NodeState;
use crate::store::{self, Listener, Readable, Store, Subscription};
use crate::verdict::{self, Outcome, Promise, Verdict};

/// Where a field sits in the tree, for cross-field lookups.
pub(crate) enum Anchor {
    /// Not attached to any collection.
    Detached,
    /// A child of the collection.
    Child(Weak<GroupInner>),
    /// The collection's own predicate; lookups start at the collection.
    OwnPredicate(Weak<GroupInner>),
}

/// A memoized cross-field lookup.
struct Lookup {
    cell: Store<Option<Value>>,
    _feed: Subscription,
    _watch: Subscription,
}

struct FieldData {
    initial: Option<Value>,
    active: bool,
}

pub(crate) struct FieldInner {
    this: Weak<FieldInner>,
    id: NodeId,
    required: bool,
    predicate: Option<Predicate>,
    library: Arc<dyn PredicateLibrary>,
    same: SameFn,
    submit: Option<SubmitFn>,
    value: Store<Option<Value>>,
    data: Mutex<FieldData>,
    state: Store<NodeState>,
    submitting: Store<bool>,
    generation: AtomicU64,
    anchor: Mutex<Anchor>,
    lookups: Mutex<HashMap<String, Lookup>>,
}

/// A node validating a single value.
///
/// Cloning a `FieldNode` creates a new handle to the **same** node.
#[derive(Clone)]
pub struct FieldNode {
    inner: Arc<FieldInner>,
}

impl FieldNode {
    /// Build a field node with the installed predicate library.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LibraryNotInstalled`] if no library is installed.
    pub fn build(initial: impl Into<Option<Value>>, config: NodeConfig) -> Result<Self> {
        let library = library::library()?;
        Ok(Self::new(initial.into(), &config, library))
    }

    pub(crate) fn new(
        initial: Option<Value>,
        config: &NodeConfig,
        library: Arc<dyn PredicateLibrary>,
    ) -> Self {
        let required = !library.is_optional(config.required().unwrap_or(&Outline::Flag(false)));
        let user = config.spec().and_then(|spec| library.predicate(spec));
        let predicate = match (required, user) {
            (true, Some(user)) => Some(library.all(vec![required_check(&*library), user])),
            (true, None) => Some(required_check(&*library)),
            (false, user) => user,
        };
        let id = config.id().cloned().unwrap_or_else(NodeId::random);
        let state = NodeState::new(id.clone(), initial.clone(), initial.clone());

        let inner = Arc::new_cyclic(|this| FieldInner {
            this: this.clone(),
            id,
            required,
            predicate,
            library,
            same: config.same_or_default(),
            submit: config.submit().cloned(),
            value: Store::gated_by(initial.clone(), same_option),
            data: Mutex::new(FieldData {
                initial,
                active: false,
            }),
            state: Store::new(state),
            submitting: Store::gated(false),
            generation: AtomicU64::new(0),
            anchor: Mutex::new(Anchor::Detached),
            lookups: Mutex::new(HashMap::new()),
        });
        Self { inner }
    }

    /// The node id.
    pub fn id(&self) -> NodeId {
        self.inner.id.clone()
    }

    /// The current value.
    pub fn value(&self) -> Option<Value> {
        self.inner.value.get()
    }

    /// The baseline value for change detection.
    pub fn initial_value(&self) -> Option<Value> {
        self.inner.data.lock().initial.clone()
    }

    /// Whether the node must hold a present value.
    pub fn is_required(&self) -> bool {
        self.inner.required
    }

    /// Whether validation is live.
    pub fn is_active(&self) -> bool {
        self.inner.data.lock().active
    }

    /// The last published state.
    pub fn state(&self) -> NodeState {
        self.inner.state.get()
    }

    /// Replace the value. An equal value is ignored.
    pub fn set(&self, value: impl Into<Option<Value>>) {
        if self.inner.value.set(value.into()) {
            self.inner.evaluate();
        }
    }

    /// Replace the value, then activate if requested.
    pub fn set_with(&self, value: impl Into<Option<Value>>, options: SetOptions) {
        self.set(value);
        if options.activate {
            // Activation takes effect before the future is returned.
            let _ = self.activate(true);
        }
    }

    /// Turn validation on or off.
    ///
    /// Runs one evaluation pass immediately. The returned future resolves to
    /// the node's validity once any async predicate of that pass settles.
    pub fn activate(&self, on: bool) -> BoxFuture<'static, bool> {
        self.inner.data.lock().active = on;
        tracing::debug!(target: targets::FIELD, id = %self.inner.id, on, "activate");
        self.inner.evaluate();
        let promise = self.inner.state.get().promise;
        async move { promise.await.is_valid() }.boxed()
    }

    /// Reset to the current baseline.
    pub fn reset(&self) {
        self.reset_to(self.initial_value());
    }

    /// Set a new baseline, deactivate and re-seed the value.
    ///
    /// Afterwards the node reports `changed == false` and `active == false`.
    pub fn reset_to(&self, initial: impl Into<Option<Value>>) {
        let initial = initial.into();
        {
            let mut data = self.inner.data.lock();
            data.initial = initial.clone();
            data.active = false;
        }
        self.inner.value.set(initial);
        self.inner.evaluate();
    }

    /// Validate and, when valid, run the submit handler.
    ///
    /// Resolves to `Ok(false)` when no handler is configured or the node is
    /// invalid, and to `Ok(true)` once the handler succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Submit`] if the handler fails. The submitting flag
    /// is cleared first.
    pub async fn submit(&self) -> Result<bool> {
        let Some(handler) = self.inner.submit.clone() else {
            return Ok(false);
        };
        if !self.activate(true).await {
            return Ok(false);
        }
        let _submitting = SubmitGuard::enter(&self.inner.submitting);
        handler(self.value(), Node::Field(self.clone()))
            .await
            .map_err(Error::Submit)?;
        Ok(true)
    }

    /// Whether the submit handler is running.
    pub fn submitting(&self) -> bool {
        self.inner.submitting.get()
    }

    /// Observe the submitting flag; the current value is delivered first.
    pub fn subscribe_submitting<F>(&self, on_value: F) -> Subscription
    where
        F: Fn(&bool) + Send + Sync + 'static,
    {
        self.inner.submitting.subscribe(on_value)
    }

    /// Register a state callback; the current state is delivered first.
    pub fn subscribe<F>(&self, on_value: F) -> Subscription
    where
        F: Fn(&NodeState) + Send + Sync + 'static,
    {
        self.inner.state.subscribe(on_value)
    }

    /// Register a state listener.
    pub fn listen(&self, listener: Listener<NodeState>) -> Subscription {
        self.inner.state.listen(listener)
    }

    pub(crate) fn inner(&self) -> &Arc<FieldInner> {
        &self.inner
    }

    /// Announce that a new value is about to be fed in.
    pub(crate) fn hold(&self) {
        self.inner.state.invalidate();
    }

    /// Feed a value computed upstream. Always publishes, so a preceding
    /// [`hold`](Self::hold) is released even when the value is unchanged.
    pub(crate) fn feed(&self, value: Option<Value>) {
        if self.inner.value.set(value) {
            self.inner.evaluate();
        } else {
            self.inner.state.touch();
        }
    }

    pub(crate) fn set_anchor(&self, anchor: Anchor) {
        let dropped = {
            *self.inner.anchor.lock() = anchor;
            std::mem::take(&mut *self.inner.lookups.lock())
        };
        drop(dropped);
    }
}

impl FieldInner {
    fn evaluate(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let value = self.value.get();
        let (initial, active) = {
            let data = self.data.lock();
            (data.initial.clone(), data.active)
        };
        let changed = !(self.same)(&value, &initial);
        let mut state = NodeState {
            id: self.id.clone(),
            value,
            initial_value: initial,
            active: Some(active),
            changed,
            ..NodeState::default()
        };

        let predicate = match &self.predicate {
            Some(predicate) if active && (state.value.is_some() || self.required) => predicate,
            _ => {
                self.publish(generation, state);
                return;
            }
        };

        tracing::trace!(target: targets::FIELD, id = %self.id, generation, "evaluating");
        let ctx = Context::new(self.this.clone());
        match self.library.validate(predicate, state.value.as_ref(), &ctx) {
            Outcome::Ready(verdict) => {
                apply(&mut state, &verdict);
                state.promise = verdict::resolved(verdict);
                self.publish(generation, state);
            }
            Outcome::Pending(fut) => {
                let weak = self.this.clone();
                let promise: Promise = async move {
                    let verdict = fut.await;
                    if let Some(inner) = weak.upgrade() {
                        inner.settle(generation, &verdict);
                    }
                    verdict
                }
                .boxed()
                .shared();

                state.valid = false;
                state.validating = true;
                state.promise = promise.clone();
                if self.publish(generation, state) {
                    runtime::spawn(promise.map(|_| ()));
                }
            }
        }
    }

    fn settle(&self, generation: u64, verdict: &Verdict) {
        let _propagating = store::propagation();
        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::trace!(target: targets::FIELD, id = %self.id, generation, "superseded result dropped");
            return;
        }
        let mut state = self.state.get();
        state.validating = false;
        apply(&mut state, verdict);
        self.publish(generation, state);
    }

    /// Publish `state` if `generation` is still current. The check and the
    /// write happen under the propagation lock.
    fn publish(&self, generation: u64, state: NodeState) -> bool {
        let _propagating = store::propagation();
        if self.generation.load(Ordering::SeqCst) != generation {
            return false;
        }
        tracing::trace!(
            target: targets::FIELD,
            id = %self.id,
            valid = state.valid,
            validating = state.validating,
            "publish"
        );
        self.state.set(state);
        true
    }

    fn revalidate(&self) {
        if self.data.lock().active {
            self.evaluate();
        }
    }

    /// Resolve a cross-field lookup, wiring a reactive cell on first use.
    pub(crate) fn lookup(&self, path: &str) -> Option<Value> {
        if let Some(lookup) = self.lookups.lock().get(path) {
            return lookup.cell.get();
        }

        let parsed = RelativePath::parse(path);
        if parsed.hops == 0 {
            return value_at_path(self.value.get().as_ref(), &parsed.segments);
        }
        let ancestor = self.ancestor(parsed.hops)?;
        let snapshot = ancestor.snapshot().and_then(|state| state.value);
        let current = value_at_path(snapshot.as_ref(), &parsed.segments);

        let cell = Store::gated_by(current.clone(), same_option);
        let feed_cell = cell.clone();
        let segments = parsed.segments;
        let feed = ancestor.listen(Listener::new(move |state: &NodeState| {
            feed_cell.set(value_at_path(state.value.as_ref(), &segments));
        }));
        let weak = self.this.clone();
        let watch = cell.observe(move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.revalidate();
            }
        });

        tracing::trace!(target: targets::FIELD, id = %self.id, path, "lookup wired");
        let lookup = Lookup {
            cell,
            _feed: feed,
            _watch: watch,
        };
        let duplicate = {
            let mut lookups = self.lookups.lock();
            if lookups.contains_key(path) {
                Some(lookup)
            } else {
                lookups.insert(path.to_string(), lookup);
                None
            }
        };
        drop(duplicate);
        current
    }

    fn ancestor(&self, hops: usize) -> Option<Arc<GroupInner>> {
        let start = match &*self.anchor.lock() {
            Anchor::Detached => return None,
            Anchor::Child(parent) => parent.upgrade()?,
            Anchor::OwnPredicate(group) => group.upgrade()?.parent()?,
        };
        start.ancestor(hops.saturating_sub(1))
    }
}

fn apply(state: &mut NodeState, verdict: &Verdict) {
    match verdict {
        Verdict::Valid => {
            state.valid = true;
            state.error = None;
        }
        Verdict::Invalid(reason) => {
            state.valid = false;
            state.error = Some(reason.clone());
        }
    }
}

/// Holds a submitting flag up for as long as it lives.
pub(crate) struct SubmitGuard {
    flag: Store<bool>,
}

impl SubmitGuard {
    pub(crate) fn enter(flag: &Store<bool>) -> Self {
        flag.set(true);
        Self { flag: flag.clone() }
    }
}

impl Drop for SubmitGuard {
    fn drop(&mut self) {
        self.flag.set(false);
    }
}

impl Readable<NodeState> for FieldInner {
    fn listen(&self, listener: Listener<NodeState>) -> Subscription {
        self.state.listen(listener)
    }

    fn snapshot(&self) -> Option<NodeState> {
        Some(self.state.get())
    }
}

impl Readable<NodeState> for FieldNode {
    fn listen(&self, listener: Listener<NodeState>) -> Subscription {
        FieldNode::listen(self, listener)
    }

    fn snapshot(&self) -> Option<NodeState> {
        Some(self.state())
    }
}

impl fmt::Debug for FieldNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldNode")
            .field("id", &self.inner.id)
            .field("value", &self.value())
            .field("required", &self.inner.required)
            .field("active", &self.is_active())
            .finish()
    }
}

static_assertions::assert_impl_all!(FieldNode: Send, Sync);
