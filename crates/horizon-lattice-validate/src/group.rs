//! Collection validator nodes.
//!
//! A [`GroupNode`] validates a list or map by composing one child node per
//! key. Its wiring looks like this:
//!
//! ```text
//!  children ──► composed (KeyedAggregate) ──► own FieldNode (collection predicate)
//!      │                                             │
//!      └──────────────► status (Aggregate) ◄─────────┘
//! ```
//!
//! The composed value of the children feeds the group's own predicate, and
//! the status aggregate folds own and child states into the group's
//! published [`NodeState`], including the flattened error list.
//!
//! # Structure
//!
//! Children are kept as an ordered `(Key, Node)` list. `add`, `remove`,
//! `update` and (for dynamic groups) a full `set` replace that list and
//! re-point both aggregates; children that stay keep their subscriptions.
//! List groups re-key children by position after every change, while ids
//! stay stable.

use std::fmt;
use std::sync::{Arc, Weak};

use futures_util::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde_json::Value;

use crate::aggregate::{Aggregate, KeyedAggregate, Source};
use crate::config::{NodeConfig, SetOptions};
use crate::error::{Error, Result};
use crate::field::{Anchor, FieldNode, SubmitGuard};
use crate::library::{self, PredicateLibrary};
use crate::logging::targets;
use crate::node::Node;
use crate::shape::{self, Layout};
use crate::spec::{Key, NodeId, Outline, Shape, SubmitFn};
use crate::state::{self, NodeState};
use crate::store::{self, Listener, Readable, Store, Subscription};

pub(crate) struct GroupInner {
    this: Weak<GroupInner>,
    id: NodeId,
    layout: Layout,
    dynamic: bool,
    /// Declarations children are derived from.
    config: NodeConfig,
    library: Arc<dyn PredicateLibrary>,
    own: FieldNode,
    children: Mutex<Vec<(Key, Node)>>,
    composed: KeyedAggregate<NodeState, Value>,
    status: Aggregate<NodeState, NodeState>,
    parent: Mutex<Option<Weak<GroupInner>>>,
    submit: Option<SubmitFn>,
    submitting: Store<bool>,
    wiring: Mutex<Vec<Subscription>>,
}

/// A node validating a collection through its children.
///
/// Cloning a `GroupNode` creates a new handle to the **same** node.
#[derive(Clone)]
pub struct GroupNode {
    inner: Arc<GroupInner>,
}

impl GroupNode {
    /// Build a collection node with the installed predicate library.
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
        let declared = declared_keys(config);
        let layout = Layout::of(initial.as_ref())
            .or_else(|| Layout::of_keys(&declared))
            .unwrap_or(Layout::List);
        let dynamic = is_dynamic(config);
        let id = config.id().cloned().unwrap_or_else(NodeId::random);

        let keys = initial_keys(layout, initial.as_ref(), &declared);
        let children: Vec<(Key, Node)> = keys
            .into_iter()
            .map(|key| {
                let value = shape::value_at(initial.as_ref(), &key);
                let node = build_child(config, &library, layout, &key, value);
                (key, node)
            })
            .collect();

        let own_config = own_config(config, &id);
        let own = FieldNode::new(Some(compose_children(layout, &children)), &own_config, library.clone());

        let composed = KeyedAggregate::new(move |entries: &[(Key, NodeState)]| {
            shape::compose(layout, entries.iter().map(|(key, state)| (key, state.value.as_ref())))
        });
        let status_id = id.clone();
        let status = Aggregate::pure(move |states: &[NodeState]| match states.split_first() {
            Some((own, children)) => state::combine_group(&status_id, own, children),
            None => NodeState::new(status_id.clone(), None, None),
        });

        let inner = Arc::new_cyclic(|this| GroupInner {
            this: this.clone(),
            id,
            layout,
            dynamic,
            config: config.clone(),
            library,
            own,
            children: Mutex::new(children.clone()),
            composed,
            status,
            parent: Mutex::new(None),
            submit: config.submit().cloned(),
            submitting: Store::gated(false),
            wiring: Mutex::new(Vec::new()),
        });

        inner.own.set_anchor(Anchor::OwnPredicate(Arc::downgrade(&inner)));
        for (_, child) in &children {
            child.attach(Arc::downgrade(&inner));
        }
        GroupInner::wire(&inner);

        tracing::debug!(
            target: targets::GROUP,
            id = %inner.id,
            ?layout,
            dynamic,
            children = children.len(),
            "group built"
        );
        Self { inner }
    }

    /// The node id.
    pub fn id(&self) -> NodeId {
        self.inner.id.clone()
    }

    /// How the group lays out its children.
    pub fn layout(&self) -> Layout {
        self.inner.layout
    }

    /// Whether a full `set` may add and remove children.
    pub fn is_dynamic(&self) -> bool {
        self.inner.dynamic
    }

    /// The composition of the children's current values.
    pub fn value(&self) -> Option<Value> {
        Some(self.inner.compose_now())
    }

    /// The baseline value for change detection.
    pub fn initial_value(&self) -> Option<Value> {
        self.inner.own.initial_value()
    }

    /// The last published state.
    pub fn state(&self) -> NodeState {
        self.inner.published()
    }

    /// The state of the collection-level predicate alone.
    pub fn own_state(&self) -> NodeState {
        self.inner.own.state()
    }

    /// Push a value down into the children (full set).
    pub fn set(&self, value: impl Into<Option<Value>>) {
        self.set_with(value, SetOptions::default());
    }

    /// Push a value down into the children.
    ///
    /// A partial set skips children whose incoming value is undefined and
    /// never changes structure. A full set on a dynamic group adds children
    /// for new keys and drops children whose key is gone; a fixed group
    /// keeps its keys and pushes undefined for absent ones.
    pub fn set_with(&self, value: impl Into<Option<Value>>, options: SetOptions) {
        let value = value.into();
        if options.partial {
            self.inner.distribute_partial(value.as_ref());
        } else {
            self.inner.reshape(value.as_ref());
            for (key, child) in self.children() {
                child.set_with(shape::value_at(value.as_ref(), &key), SetOptions::default());
            }
        }
        if options.activate {
            // Activation takes effect before the future is returned.
            let _ = self.activate(true);
        }
    }

    /// Attach one new child per key of `coll`.
    ///
    /// List groups append; map groups insert or replace by key.
    pub fn add(&self, coll: impl Into<Option<Value>>) {
        let coll = coll.into();
        let mut next = self.children();
        let added = shape::keys_of(coll.as_ref());
        for key in &added {
            let value = shape::value_at(coll.as_ref(), key);
            match self.inner.layout {
                Layout::List => {
                    let key = Key::Index(next.len());
                    let node = self.inner.build_child(&key, value);
                    next.push((key, node));
                }
                Layout::Map => {
                    let key = Key::Name(key.to_string());
                    let node = self.inner.build_child(&key, value);
                    match next.iter_mut().find(|(k, _)| *k == key) {
                        Some(slot) => slot.1 = node,
                        None => next.push((key, node)),
                    }
                }
            }
        }
        tracing::debug!(target: targets::GROUP, id = %self.inner.id, added = added.len(), "add");
        self.inner.replace_children(next);
    }

    /// Drop the children whose id is listed.
    pub fn remove(&self, ids: &[NodeId]) {
        let next = self
            .children()
            .into_iter()
            .filter(|(_, child)| !ids.contains(&child.id()))
            .collect();
        tracing::debug!(target: targets::GROUP, id = %self.inner.id, ids = ids.len(), "remove");
        self.inner.replace_children(next);
    }

    /// Replace the whole `(Key, Node)` mapping.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(Vec<(Key, Node)>) -> Vec<(Key, Node)>,
    {
        let next = f(self.children());
        tracing::debug!(target: targets::GROUP, id = %self.inner.id, "update");
        self.inner.replace_children(next);
    }

    /// The current children in order.
    pub fn children(&self) -> Vec<(Key, Node)> {
        self.inner.children.lock().clone()
    }

    /// Look up a descendant by keys. `None` if any segment is missing.
    pub fn child(&self, path: &[Key]) -> Option<Node> {
        let (first, rest) = path.split_first()?;
        let child = self
            .children()
            .into_iter()
            .find(|(key, _)| key.matches(first))
            .map(|(_, node)| node)?;
        if rest.is_empty() {
            return Some(child);
        }
        child.as_group()?.child(rest)
    }

    /// Activate or deactivate the own predicate and every child.
    ///
    /// All activations start together; the future resolves once every one
    /// of them has settled, to `true` only if all are valid.
    pub fn activate(&self, on: bool) -> BoxFuture<'static, bool> {
        tracing::debug!(target: targets::GROUP, id = %self.inner.id, on, "activate");
        let children = self.children();
        let mut pending = Vec::with_capacity(children.len() + 1);
        pending.push(self.inner.own.activate(on));
        pending.extend(children.iter().map(|(_, child)| child.activate(on)));
        async move { future::join_all(pending).await.into_iter().all(|valid| valid) }.boxed()
    }

    /// Reset to the current baseline.
    pub fn reset(&self) {
        self.reset_to(self.initial_value());
    }

    /// Reset every child to its part of `initial`, then take the resulting
    /// composition as the new baseline.
    pub fn reset_to(&self, initial: impl Into<Option<Value>>) {
        let initial = initial.into();
        self.inner.reshape(initial.as_ref());
        for (key, child) in self.children() {
            child.reset_to(shape::value_at(initial.as_ref(), &key));
        }
        self.inner.own.reset_to(self.value());
        tracing::debug!(target: targets::GROUP, id = %self.inner.id, "reset");
    }

    /// Validate the whole tree and, when valid, run the submit handler.
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
        handler(self.value(), Node::Group(self.clone()))
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
        self.inner.status.subscribe(on_value)
    }

    /// Register a state listener.
    pub fn listen(&self, listener: Listener<NodeState>) -> Subscription {
        self.inner.status.listen(listener)
    }

    pub(crate) fn inner(&self) -> &Arc<GroupInner> {
        &self.inner
    }
}

impl GroupInner {
    fn wire(this: &Arc<Self>) {
        this.retarget();

        let own_value = this.own.clone();
        let own_hold = this.own.clone();
        let feed = this.composed.listen(
            Listener::new(move |value: &Value| own_value.feed(Some(value.clone())))
                .with_invalidate(move || own_hold.hold()),
        );
        let keep_alive = this.status.subscribe(|_| {});
        this.wiring.lock().extend([feed, keep_alive]);
    }

    /// Point both aggregates at the current children.
    ///
    /// The own predicate is held first, so the status aggregate waits for
    /// the recomposed value instead of publishing a mix of old and new.
    fn retarget(&self) {
        let _propagating = store::propagation();
        let children = self.children.lock().clone();
        self.own.hold();

        let own: Source<NodeState> = self.own.inner().clone();
        let mut sources = Vec::with_capacity(children.len() + 1);
        sources.push(own);
        sources.extend(children.iter().map(|(_, child)| child.source()));
        self.status.set(sources);

        self.composed.set(
            children
                .iter()
                .map(|(key, child)| (key.clone(), child.source()))
                .collect(),
        );
    }

    fn replace_children(&self, mut next: Vec<(Key, Node)>) {
        if self.layout == Layout::List {
            for (index, (key, _)) in next.iter_mut().enumerate() {
                *key = Key::Index(index);
            }
        }
        let previous = std::mem::replace(&mut *self.children.lock(), next.clone());

        let mut removed = 0;
        for (_, node) in &previous {
            if !next.iter().any(|(_, kept)| kept.ptr_eq(node)) {
                node.detach();
                removed += 1;
            }
        }
        let mut added = 0;
        for (_, node) in &next {
            if !previous.iter().any(|(_, old)| old.ptr_eq(node)) {
                node.attach(self.this.clone());
                added += 1;
            }
        }

        tracing::debug!(target: targets::GROUP, id = %self.id, added, removed, "children replaced");
        self.retarget();
    }

    /// For dynamic groups, add and drop children so the key set matches
    /// `value`. Fixed groups are left alone.
    fn reshape(&self, value: Option<&Value>) {
        if !self.dynamic {
            return;
        }
        let current = self.children.lock().clone();
        let incoming = match Layout::of(value) {
            Some(layout) if layout == self.layout => shape::keys_of(value),
            _ => Vec::new(),
        };

        let next: Vec<(Key, Node)> = match self.layout {
            Layout::List => {
                let mut next: Vec<_> = current.iter().take(incoming.len()).cloned().collect();
                for index in next.len()..incoming.len() {
                    let key = Key::Index(index);
                    let node = self.build_child(&key, shape::value_at(value, &key));
                    next.push((key, node));
                }
                next
            }
            Layout::Map => {
                let mut next: Vec<_> = current
                    .iter()
                    .filter(|(key, _)| incoming.contains(key))
                    .cloned()
                    .collect();
                for key in &incoming {
                    if !next.iter().any(|(k, _)| k == key) {
                        let node = self.build_child(key, shape::value_at(value, key));
                        next.push((key.clone(), node));
                    }
                }
                next
            }
        };

        let unchanged = next.len() == current.len()
            && next.iter().zip(&current).all(|((_, a), (_, b))| a.ptr_eq(b));
        if !unchanged {
            self.replace_children(next);
        }
    }

    fn distribute_partial(&self, value: Option<&Value>) {
        let children = self.children.lock().clone();
        for (key, child) in children {
            if let Some(incoming) = shape::value_at(value, &key) {
                child.set_with(Some(incoming), SetOptions::partial());
            }
        }
    }

    fn build_child(&self, key: &Key, value: Option<Value>) -> Node {
        build_child(&self.config, &self.library, self.layout, key, value)
    }

    fn compose_now(&self) -> Value {
        let children = self.children.lock().clone();
        compose_children(self.layout, &children)
    }

    pub(crate) fn published(&self) -> NodeState {
        self.status.get().unwrap_or_else(|| {
            let children: Vec<NodeState> = self
                .children
                .lock()
                .iter()
                .map(|(_, child)| child.state())
                .collect();
            state::combine_group(&self.id, &self.own.state(), &children)
        })
    }

    pub(crate) fn set_parent(&self, parent: Option<Weak<GroupInner>>) {
        *self.parent.lock() = parent;
        self.own.set_anchor(Anchor::OwnPredicate(self.this.clone()));
    }

    pub(crate) fn parent(&self) -> Option<Arc<GroupInner>> {
        self.parent.lock().as_ref()?.upgrade()
    }

    /// The group `hops` levels up; zero is this group.
    pub(crate) fn ancestor(self: Arc<Self>, hops: usize) -> Option<Arc<GroupInner>> {
        let mut current = self;
        for _ in 0..hops {
            current = current.parent()?;
        }
        Some(current)
    }
}

impl Readable<NodeState> for GroupInner {
    fn listen(&self, listener: Listener<NodeState>) -> Subscription {
        self.status.listen(listener)
    }

    fn snapshot(&self) -> Option<NodeState> {
        Some(self.published())
    }
}

impl Readable<NodeState> for GroupNode {
    fn listen(&self, listener: Listener<NodeState>) -> Subscription {
        GroupNode::listen(self, listener)
    }

    fn snapshot(&self) -> Option<NodeState> {
        Some(self.state())
    }
}

impl fmt::Debug for GroupNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupNode")
            .field("id", &self.inner.id)
            .field("layout", &self.inner.layout)
            .field("dynamic", &self.inner.dynamic)
            .field("children", &self.inner.children.lock().len())
            .finish()
    }
}

static_assertions::assert_impl_all!(GroupNode: Send, Sync);

/// Keys declared by the `fields`, spec and `required` declarations, in
/// first-seen order.
fn declared_keys(config: &NodeConfig) -> Vec<Key> {
    let sources = [
        config.fields().map(Outline::declared_keys),
        config.spec().map(|spec| spec.keys()),
        config.required().map(Outline::declared_keys),
    ];
    let mut keys = Vec::new();
    for key in sources.into_iter().flatten().flatten() {
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

/// A group is dynamic when any declaration is a spread, or when nothing
/// declares a fixed key list.
fn is_dynamic(config: &NodeConfig) -> bool {
    let spec_spread = config
        .spec()
        .is_some_and(|spec| matches!(spec.shape(), Shape::Spread(_)));
    let outline_spread = [config.fields(), config.required()]
        .into_iter()
        .flatten()
        .any(Outline::is_spread);
    let declares_keys = config
        .spec()
        .is_some_and(|spec| matches!(spec.shape(), Shape::Fields(_)))
        || [config.fields(), config.required()]
            .into_iter()
            .flatten()
            .any(|outline| matches!(outline, Outline::Keys(_)));
    spec_spread || outline_spread || !declares_keys
}

/// Union of value keys and declared keys, normalised to the layout.
fn initial_keys(layout: Layout, initial: Option<&Value>, declared: &[Key]) -> Vec<Key> {
    let mut keys = shape::keys_of(initial);
    for key in declared {
        if !keys.contains(key) {
            keys.push(key.clone());
        }
    }
    match layout {
        Layout::List => {
            let len = keys
                .iter()
                .filter_map(Key::as_index)
                .map(|index| index + 1)
                .max()
                .unwrap_or(0);
            (0..len).map(Key::Index).collect()
        }
        Layout::Map => {
            let mut names: Vec<Key> = Vec::with_capacity(keys.len());
            for key in keys {
                let name = Key::Name(key.to_string());
                if !names.contains(&name) {
                    names.push(name);
                }
            }
            names
        }
    }
}

fn own_config(config: &NodeConfig, id: &NodeId) -> NodeConfig {
    let mut own = NodeConfig::new()
        .with_id(id.clone())
        .with_required(config.required().is_some_and(Outline::flag));
    if let Some(spec) = config.spec() {
        own = own.with_spec(spec.clone());
    }
    own.with_same_fn(config.same().cloned())
}

/// Derive a child's declarations from the parent's and build it.
fn build_child(
    config: &NodeConfig,
    library: &Arc<dyn PredicateLibrary>,
    layout: Layout,
    key: &Key,
    value: Option<Value>,
) -> Node {
    let mut child = NodeConfig::new();
    let spec = config
        .spec()
        .and_then(|spec| spec.field(key).or_else(|| library.spread(spec)));
    if let Some(spec) = spec {
        child = child.with_spec(spec.clone());
    }
    if let Some(required) = config.required().and_then(|required| required.child(key)) {
        child = child.with_required(required);
    }
    if let Some(fields) = config.fields().and_then(|fields| fields.child(key)) {
        child = child.with_fields(fields);
    }
    child = child.with_same_fn(config.same().cloned());
    let id = match (config.child_ids(), layout) {
        (Some(ids), _) => ids(value.as_ref(), key),
        (None, Layout::List) => NodeId::random(),
        (None, Layout::Map) => NodeId::from(key),
    };
    child = child.with_id(id);
    Node::build_with(value, &child, library)
}

fn compose_children(layout: Layout, children: &[(Key, Node)]) -> Value {
    let values: Vec<Option<Value>> = children.iter().map(|(_, child)| child.value()).collect();
    shape::compose(
        layout,
        children
            .iter()
            .map(|(key, _)| key)
            .zip(values.iter().map(Option::as_ref)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::StandardLibrary;
    use crate::spec::Spec;
    use crate::verdict::Verdict;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn group(initial: Value, config: NodeConfig) -> GroupNode {
        GroupNode::new(Some(initial), &config, Arc::new(StandardLibrary::default()))
    }

    fn positive() -> Spec {
        Spec::check(|v| {
            Verdict::check(v.and_then(Value::as_i64).is_some_and(|n| n > 0), "not positive")
        })
    }

    #[test]
    fn test_initial_state_composes_children() {
        let form = group(json!({"a": 1, "b": 2}), NodeConfig::new());
        let state = form.state();
        assert_eq!(state.value, Some(json!({"a": 1, "b": 2})));
        assert_eq!(state.initial_value, state.value);
        assert_eq!(state.active, Some(false));
        assert!(state.valid);
        assert_eq!(form.children().len(), 2);
        assert_eq!(form.layout(), Layout::Map);
        assert!(form.is_dynamic());
    }

    #[test]
    fn test_declared_keys_create_children() {
        let config = NodeConfig::new()
            .with_spec(Spec::fields([("name", Spec::empty())]))
            .with_required(Outline::flags(["email"]));
        let form = group(json!({}), config);
        let keys: Vec<_> = form.children().into_iter().map(|(key, _)| key).collect();
        assert_eq!(keys, vec![Key::from("name"), Key::from("email")]);
        assert!(!form.is_dynamic());
        assert_eq!(form.value(), Some(json!({})));
    }

    #[test]
    fn test_child_set_updates_group_value() {
        let form = group(json!({"a": 1}), NodeConfig::new());
        let a = form.child(&[Key::from("a")]).expect("child a");
        a.set(json!(5));
        let state = form.state();
        assert_eq!(state.value, Some(json!({"a": 5})));
        assert!(state.changed);
    }

    #[test]
    fn test_group_publishes_once_per_child_change() {
        let form = group(json!({"a": 1, "b": 2}), NodeConfig::new());
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let _sub = form.subscribe(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        count.store(0, Ordering::SeqCst);

        form.child(&[Key::from("a")]).expect("child a").set(json!(3));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_activate_awaits_every_child() {
        let config = NodeConfig::new().with_spec(Spec::spread(positive()));
        let list = group(json!([1, -1, 2, -2]), config);
        assert!(!list.activate(true).await);

        let state = list.state();
        assert_eq!(state.active, Some(true));
        assert_eq!(state.errors().len(), 2);
        assert!(list.children().iter().all(|(_, child)| child.state().is_active()));
    }

    #[test]
    fn test_collection_predicate_sees_composed_value() {
        let spec = Spec::fields([("a", Spec::empty()), ("b", Spec::empty())]).with_pred(|v, _| {
            let sum: i64 = v
                .and_then(Value::as_object)
                .map(|map| map.values().filter_map(Value::as_i64).sum())
                .unwrap_or(0);
            Verdict::check(sum <= 10, "sum too large").into()
        });
        let form = group(json!({"a": 4, "b": 5}), NodeConfig::new().with_spec(spec));
        let _ = form.activate(true);
        assert!(form.state().valid);

        form.child(&[Key::from("b")]).expect("child b").set(json!(9));
        let state = form.state();
        assert!(!state.valid);
        assert_eq!(state.error, Some(json!("sum too large")));
        assert_eq!(state.coll_errors().len(), 1);
        assert_eq!(state.coll_errors()[0].path, Vec::<NodeId>::new());
    }

    #[test]
    fn test_list_rekeys_after_remove() {
        let config = NodeConfig::new().with_child_ids(|v, _| {
            NodeId::from(v.and_then(Value::as_str).unwrap_or_default())
        });
        let list = group(json!(["x", "y", "z"]), config);
        list.remove(&[NodeId::from("x")]);

        let children: Vec<_> = list
            .children()
            .into_iter()
            .map(|(key, node)| (key, node.id().to_string()))
            .collect();
        assert_eq!(
            children,
            vec![(Key::Index(0), "y".to_string()), (Key::Index(1), "z".to_string())]
        );
        assert_eq!(list.state().value, Some(json!(["y", "z"])));
    }

    #[test]
    fn test_update_reorders_children() {
        let list = group(json!([1, 2]), NodeConfig::new());
        let ids: Vec<_> = list.children().into_iter().map(|(_, node)| node.id()).collect();

        list.update(|mut children| {
            children.reverse();
            children
        });
        let reordered: Vec<_> = list.children().into_iter().map(|(_, node)| node.id()).collect();
        assert_eq!(reordered, vec![ids[1].clone(), ids[0].clone()]);
        assert_eq!(list.state().value, Some(json!([2, 1])));
    }

    #[test]
    fn test_full_set_on_fixed_group_keeps_keys() {
        let config = NodeConfig::new().with_spec(Spec::fields([("a", Spec::empty()), ("b", Spec::empty())]));
        let form = group(json!({"a": 1, "b": 2}), config);
        form.set(json!({"a": 3, "c": 4}));

        let keys: Vec<_> = form.children().into_iter().map(|(key, _)| key).collect();
        assert_eq!(keys, vec![Key::from("a"), Key::from("b")]);
        assert_eq!(form.state().value, Some(json!({"a": 3})));
    }

    #[test]
    fn test_full_set_on_dynamic_group_reshapes() {
        let form = group(json!({"a": 1, "b": 2}), NodeConfig::new());
        let a_id = form.child(&[Key::from("a")]).expect("child a").id();
        form.set(json!({"a": 5, "c": 6}));

        let keys: Vec<_> = form.children().into_iter().map(|(key, _)| key).collect();
        assert_eq!(keys, vec![Key::from("a"), Key::from("c")]);
        assert_eq!(form.child(&[Key::from("a")]).map(|n| n.id()), Some(a_id));
        assert_eq!(form.state().value, Some(json!({"a": 5, "c": 6})));
    }

    #[test]
    fn test_nested_child_lookup() {
        let form = group(json!({"address": {"street": "Main"}}), NodeConfig::new());
        let street = form
            .child(&[Key::from("address"), Key::from("street")])
            .expect("street");
        assert_eq!(street.value(), Some(json!("Main")));
        assert!(form.child(&[Key::from("address"), Key::from("zip")]).is_none());
        assert!(form.child(&[]).is_none());

        street.set(json!("High"));
        assert_eq!(form.state().value, Some(json!({"address": {"street": "High"}})));
    }

    #[test]
    fn test_reset_restores_baseline() {
        let form = group(json!({"a": 1}), NodeConfig::new());
        let _ = form.activate(true);
        form.child(&[Key::from("a")]).expect("child a").set(json!(2));
        assert!(form.state().changed);

        form.reset();
        let state = form.state();
        assert!(!state.changed);
        assert_eq!(state.active, Some(false));
        assert_eq!(state.value, Some(json!({"a": 1})));
    }
}
