//! The top-level node factory.
//!
//! [`Node::build`] looks at the seed and the configuration and returns
//! either a [`FieldNode`] or a [`GroupNode`] wrapped in [`Node`]. Group
//! children are built through the same path, so a whole tree comes out of
//! one call.

use std::sync::{Arc, Weak};

use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::aggregate::Source;
use crate::config::{NodeConfig, SetOptions};
use crate::error::Result;
use crate::field::{Anchor, FieldNode};
use crate::group::{GroupInner, GroupNode};
use crate::library::{self, PredicateLibrary};
use crate::shape::Layout;
use crate::spec::NodeId;
use crate::state::NodeState;
use crate::store::{Listener, Readable, Subscription};

/// A validator node of either kind.
///
/// Cloning a `Node` creates a new handle to the **same** node.
#[derive(Clone, Debug)]
pub enum Node {
    /// Validates a single value.
    Field(FieldNode),
    /// Validates a collection through its children.
    Group(GroupNode),
}

/// What a node is built from.
#[derive(Debug)]
pub enum Seed {
    /// An existing node, returned as is.
    Node(Node),
    /// An initial value.
    Value(Option<Value>),
}

impl From<Node> for Seed {
    fn from(node: Node) -> Self {
        Self::Node(node)
    }
}

impl From<FieldNode> for Seed {
    fn from(node: FieldNode) -> Self {
        Self::Node(Node::Field(node))
    }
}

impl From<GroupNode> for Seed {
    fn from(node: GroupNode) -> Self {
        Self::Node(Node::Group(node))
    }
}

impl From<Value> for Seed {
    fn from(value: Value) -> Self {
        Self::Value(Some(value))
    }
}

impl From<Option<Value>> for Seed {
    fn from(value: Option<Value>) -> Self {
        Self::Value(value)
    }
}

impl From<FieldNode> for Node {
    fn from(node: FieldNode) -> Self {
        Self::Field(node)
    }
}

impl From<GroupNode> for Node {
    fn from(node: GroupNode) -> Self {
        Self::Group(node)
    }
}

impl Node {
    /// Build a validator tree.
    ///
    /// An existing node is returned unchanged. Otherwise a collection spec,
    /// a collection `fields` declaration, or a collection initial value
    /// (when there is no spec) produces a [`GroupNode`]; anything else
    /// produces a [`FieldNode`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::LibraryNotInstalled`](crate::Error::LibraryNotInstalled)
    /// if a node has to be built and no predicate library is installed.
    pub fn build(seed: impl Into<Seed>, config: NodeConfig) -> Result<Self> {
        let initial = match seed.into() {
            Seed::Node(node) => return Ok(node),
            Seed::Value(value) => value,
        };
        let library = library::library()?;
        Ok(Self::build_with(initial, &config, &library))
    }

    pub(crate) fn build_with(
        initial: Option<Value>,
        config: &NodeConfig,
        library: &Arc<dyn PredicateLibrary>,
    ) -> Self {
        let collection = match config.spec() {
            Some(spec) => spec.is_collection(),
            None => {
                Layout::of(initial.as_ref()).is_some()
                    || config.fields().is_some_and(|fields| fields.is_collection())
            }
        };
        if collection {
            Self::Group(GroupNode::new(initial, config, library.clone()))
        } else {
            Self::Field(FieldNode::new(initial, config, library.clone()))
        }
    }

    /// The node id.
    pub fn id(&self) -> NodeId {
        match self {
            Self::Field(node) => node.id(),
            Self::Group(node) => node.id(),
        }
    }

    /// The last published state.
    pub fn state(&self) -> NodeState {
        match self {
            Self::Field(node) => node.state(),
            Self::Group(node) => node.state(),
        }
    }

    /// The current value.
    pub fn value(&self) -> Option<Value> {
        match self {
            Self::Field(node) => node.value(),
            Self::Group(node) => node.value(),
        }
    }

    /// The baseline value for change detection.
    pub fn initial_value(&self) -> Option<Value> {
        match self {
            Self::Field(node) => node.initial_value(),
            Self::Group(node) => node.initial_value(),
        }
    }

    pub fn set(&self, value: impl Into<Option<Value>>) {
        self.set_with(value, SetOptions::default());
    }

    pub fn set_with(&self, value: impl Into<Option<Value>>, options: SetOptions) {
        match self {
            Self::Field(node) => node.set_with(value, options),
            Self::Group(node) => node.set_with(value, options),
        }
    }

    /// Turn validation on or off; resolves to the resulting validity.
    pub fn activate(&self, on: bool) -> BoxFuture<'static, bool> {
        match self {
            Self::Field(node) => node.activate(on),
            Self::Group(node) => node.activate(on),
        }
    }

    pub fn reset(&self) {
        match self {
            Self::Field(node) => node.reset(),
            Self::Group(node) => node.reset(),
        }
    }

    pub fn reset_to(&self, initial: impl Into<Option<Value>>) {
        match self {
            Self::Field(node) => node.reset_to(initial),
            Self::Group(node) => node.reset_to(initial),
        }
    }

    /// See [`FieldNode::submit`] and [`GroupNode::submit`].
    pub async fn submit(&self) -> Result<bool> {
        match self {
            Self::Field(node) => node.submit().await,
            Self::Group(node) => node.submit().await,
        }
    }

    pub fn submitting(&self) -> bool {
        match self {
            Self::Field(node) => node.submitting(),
            Self::Group(node) => node.submitting(),
        }
    }

    /// Register a state callback; the current state is delivered first.
    pub fn subscribe<F>(&self, on_value: F) -> Subscription
    where
        F: Fn(&NodeState) + Send + Sync + 'static,
    {
        match self {
            Self::Field(node) => node.subscribe(on_value),
            Self::Group(node) => node.subscribe(on_value),
        }
    }

    /// Register a state listener.
    pub fn listen(&self, listener: Listener<NodeState>) -> Subscription {
        match self {
            Self::Field(node) => node.listen(listener),
            Self::Group(node) => node.listen(listener),
        }
    }

    pub fn as_field(&self) -> Option<&FieldNode> {
        match self {
            Self::Field(node) => Some(node),
            Self::Group(_) => None,
        }
    }

    pub fn as_group(&self) -> Option<&GroupNode> {
        match self {
            Self::Field(_) => None,
            Self::Group(node) => Some(node),
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Self::Group(_))
    }

    /// Whether both handles point at the same node.
    pub fn ptr_eq(&self, other: &Node) -> bool {
        match (self, other) {
            (Self::Field(a), Self::Field(b)) => Arc::ptr_eq(a.inner(), b.inner()),
            (Self::Group(a), Self::Group(b)) => Arc::ptr_eq(a.inner(), b.inner()),
            _ => false,
        }
    }

    /// The node's state as an aggregate source. Identity follows the node.
    pub(crate) fn source(&self) -> Source<NodeState> {
        match self {
            Self::Field(node) => node.inner().clone() as Source<NodeState>,
            Self::Group(node) => node.inner().clone() as Source<NodeState>,
        }
    }

    pub(crate) fn attach(&self, parent: Weak<GroupInner>) {
        match self {
            Self::Field(node) => node.set_anchor(Anchor::Child(parent)),
            Self::Group(node) => node.inner().set_parent(Some(parent)),
        }
    }

    pub(crate) fn detach(&self) {
        match self {
            Self::Field(node) => node.set_anchor(Anchor::Detached),
            Self::Group(node) => node.inner().set_parent(None),
        }
    }
}

impl Readable<NodeState> for Node {
    fn listen(&self, listener: Listener<NodeState>) -> Subscription {
        Node::listen(self, listener)
    }

    fn snapshot(&self) -> Option<NodeState> {
        Some(self.state())
    }
}

static_assertions::assert_impl_all!(Node: Send, Sync, Clone);
