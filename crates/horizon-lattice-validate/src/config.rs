//! Node construction options.
//!
//! # Example
//!
//! ```
//! use horizon_lattice_validate::config::NodeConfig;
//! use horizon_lattice_validate::spec::{Outline, Spec};
//! use horizon_lattice_validate::verdict::Verdict;
//!
//! let config = NodeConfig::new()
//!     .with_spec(Spec::fields([(
//!         "age",
//!         Spec::check(|v| Verdict::check(v.and_then(|v| v.as_u64()) >= Some(18), "too young")),
//!     )]))
//!     .with_required(Outline::flags(["age"]))
//!     .with_id("signup");
//! assert!(config.spec().is_some());
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::Value;

use crate::error::BoxError;
use crate::node::Node;
use crate::shape;
use crate::spec::{IdFn, Key, NodeId, Outline, SameFn, Spec, SubmitFn};

/// Options for building a node.
#[derive(Clone, Default)]
pub struct NodeConfig {
    spec: Option<Spec>,
    required: Option<Outline>,
    fields: Option<Outline>,
    id: Option<NodeId>,
    child_ids: Option<IdFn>,
    same: Option<SameFn>,
    submit: Option<SubmitFn>,
}

impl NodeConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the predicate spec.
    pub fn with_spec(mut self, spec: Spec) -> Self {
        self.spec = Some(spec);
        self
    }

    /// Set the `required` declaration.
    pub fn with_required(mut self, required: impl Into<Outline>) -> Self {
        self.required = Some(required.into());
        self
    }

    /// Declare the collection's fields.
    pub fn with_fields(mut self, fields: Outline) -> Self {
        self.fields = Some(fields);
        self
    }

    /// Set the node id.
    pub fn with_id(mut self, id: impl Into<NodeId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Derive the ids of direct children from their initial value and key.
    pub fn with_child_ids<F>(mut self, f: F) -> Self
    where
        F: Fn(Option<&Value>, &Key) -> NodeId + Send + Sync + 'static,
    {
        self.child_ids = Some(Arc::new(f));
        self
    }

    /// Replace the change-detection comparison. Inherited by children.
    pub fn with_same<F>(mut self, f: F) -> Self
    where
        F: Fn(&Option<Value>, &Option<Value>) -> bool + Send + Sync + 'static,
    {
        self.same = Some(Arc::new(f));
        self
    }

    /// Set the submit handler.
    pub fn with_submit<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Option<Value>, Node) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.submit = Some(Arc::new(move |value, node| f(value, node).boxed()));
        self
    }

    /// The predicate spec, if any.
    pub fn spec(&self) -> Option<&Spec> {
        self.spec.as_ref()
    }

    /// The `required` declaration, if any.
    pub fn required(&self) -> Option<&Outline> {
        self.required.as_ref()
    }

    /// The declared fields, if any.
    pub fn fields(&self) -> Option<&Outline> {
        self.fields.as_ref()
    }

    /// The configured id. Nodes fall back to a random one.
    pub fn id(&self) -> Option<&NodeId> {
        self.id.as_ref()
    }

    pub(crate) fn with_same_fn(mut self, same: Option<SameFn>) -> Self {
        self.same = same;
        self
    }

    pub(crate) fn child_ids(&self) -> Option<&IdFn> {
        self.child_ids.as_ref()
    }

    pub(crate) fn same(&self) -> Option<&SameFn> {
        self.same.as_ref()
    }

    pub(crate) fn submit(&self) -> Option<&SubmitFn> {
        self.submit.as_ref()
    }

    /// The comparison used for `changed`: the configured one, or deep
    /// equality with numbers compared by value.
    pub(crate) fn same_or_default(&self) -> SameFn {
        self.same
            .clone()
            .unwrap_or_else(|| Arc::new(shape::same_option))
    }
}

impl fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeConfig")
            .field("spec", &self.spec)
            .field("required", &self.required)
            .field("fields", &self.fields)
            .field("id", &self.id)
            .field("child_ids", &self.child_ids.is_some())
            .field("same", &self.same.is_some())
            .field("submit", &self.submit.is_some())
            .finish()
    }
}

/// Options for `set_with`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Only touch children whose incoming value is defined; never change
    /// structure.
    pub partial: bool,
    /// Activate after setting.
    pub activate: bool,
}

impl SetOptions {
    /// Partial set, no activation.
    pub fn partial() -> Self {
        Self {
            partial: true,
            activate: false,
        }
    }

    /// Full set followed by activation.
    pub fn activate() -> Self {
        Self {
            partial: false,
            activate: true,
        }
    }

    /// Also activate after setting.
    pub fn and_activate(mut self) -> Self {
        self.activate = true;
        self
    }
}
