//! Declarations: keys, identities, predicates and shape specs.
//!
//! A [`Spec`] mirrors the shape of the value it validates. A leaf spec holds
//! a predicate only; a collection spec lists per-key sub-specs
//! ([`Shape::Fields`]) or one sub-spec shared by every key
//! ([`Shape::Spread`]). An [`Outline`] is the same idea for the `required`
//! and `fields` declarations, which carry flags instead of predicates.

use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::Value;

use crate::context::Context;
use crate::error::BoxError;
use crate::node::Node;
use crate::verdict::{Outcome, Verdict};

/// A structural key inside a collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    /// Position in a list.
    Index(usize),
    /// Name in a map.
    Name(String),
}

impl Key {
    /// Parse a path segment: all-digit segments are indices.
    pub fn parse(segment: &str) -> Self {
        match segment.parse::<usize>() {
            Ok(index) if !segment.is_empty() => Self::Index(index),
            _ => Self::Name(segment.to_string()),
        }
    }

    /// The index, if this is an index key.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Self::Index(index) => Some(*index),
            Self::Name(name) => name.parse().ok(),
        }
    }

    /// Whether both keys address the same slot. An index and a name match
    /// when they print the same, so `Index(0)` matches `Name("0")`.
    pub fn matches(&self, other: &Key) -> bool {
        match (self, other) {
            (Self::Index(a), Self::Index(b)) => a == b,
            (Self::Name(a), Self::Name(b)) => a == b,
            _ => self.to_string() == other.to_string(),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(index) => write!(f, "{index}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

/// An opaque node identity.
///
/// Unlike a [`Key`], an id survives reordering: it is how `remove` finds
/// children and how error paths name nodes.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(Arc<str>);

impl NodeId {
    /// Length of ids produced by [`NodeId::random`].
    pub const RANDOM_LEN: usize = 12;

    /// Create an id from a string.
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// A fresh random alphanumeric id.
    pub fn random() -> Self {
        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(Self::RANDOM_LEN)
            .map(char::from)
            .collect();
        Self::new(token)
    }

    /// The id that names a node's own predicate in group details.
    pub fn own() -> Self {
        Self::new("_")
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({:?})", &*self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

impl From<&Key> for NodeId {
    fn from(key: &Key) -> Self {
        Self::new(key.to_string())
    }
}

impl PartialEq<str> for NodeId {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}

impl PartialEq<&str> for NodeId {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}

/// A validation predicate.
///
/// Receives the value (`None` when undefined) and a [`Context`] for
/// cross-field lookups.
pub type Predicate = Arc<dyn Fn(Option<&Value>, &Context) -> Outcome + Send + Sync>;

/// Derives a child id from the child's initial value and key.
pub type IdFn = Arc<dyn Fn(Option<&Value>, &Key) -> NodeId + Send + Sync>;

/// Decides whether two values are the same for change detection.
pub type SameFn = Arc<dyn Fn(&Option<Value>, &Option<Value>) -> bool + Send + Sync>;

/// Handles a submit with the current value and the submitted node.
pub type SubmitFn =
    Arc<dyn Fn(Option<Value>, Node) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// Wrap a closure as a [`Predicate`].
pub fn predicate<F>(f: F) -> Predicate
where
    F: Fn(Option<&Value>, &Context) -> Outcome + Send + Sync + 'static,
{
    Arc::new(f)
}

/// The shape part of a [`Spec`].
#[derive(Clone)]
pub enum Shape {
    /// No children.
    Leaf,
    /// A fixed list of per-key sub-specs.
    Fields(Vec<(Key, Spec)>),
    /// One sub-spec applied to every key.
    Spread(Box<Spec>),
}

/// A (possibly nested) predicate declaration.
#[derive(Clone)]
pub struct Spec {
    pred: Option<Predicate>,
    shape: Shape,
}

impl Spec {
    /// A leaf spec with a predicate.
    pub fn leaf<F>(f: F) -> Self
    where
        F: Fn(Option<&Value>, &Context) -> Outcome + Send + Sync + 'static,
    {
        Self {
            pred: Some(predicate(f)),
            shape: Shape::Leaf,
        }
    }

    /// A synchronous leaf spec that ignores the context.
    pub fn check<F>(f: F) -> Self
    where
        F: Fn(Option<&Value>) -> Verdict + Send + Sync + 'static,
    {
        Self::leaf(move |value, _| Outcome::Ready(f(value)))
    }

    /// A leaf spec with no predicate.
    pub fn empty() -> Self {
        Self {
            pred: None,
            shape: Shape::Leaf,
        }
    }

    /// A collection spec with one sub-spec per key.
    pub fn fields<K, I>(fields: I) -> Self
    where
        K: Into<Key>,
        I: IntoIterator<Item = (K, Spec)>,
    {
        Self {
            pred: None,
            shape: Shape::Fields(fields.into_iter().map(|(k, s)| (k.into(), s)).collect()),
        }
    }

    /// A collection spec whose sub-spec applies to every key.
    pub fn spread(item: Spec) -> Self {
        Self {
            pred: None,
            shape: Shape::Spread(Box::new(item)),
        }
    }

    /// Attach a collection-level predicate.
    pub fn with_pred<F>(mut self, f: F) -> Self
    where
        F: Fn(Option<&Value>, &Context) -> Outcome + Send + Sync + 'static,
    {
        self.pred = Some(predicate(f));
        self
    }

    /// The spec's own predicate.
    pub fn pred(&self) -> Option<&Predicate> {
        self.pred.as_ref()
    }

    /// The spec's shape.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Whether this spec describes a collection.
    pub fn is_collection(&self) -> bool {
        !matches!(self.shape, Shape::Leaf)
    }

    /// Declared keys, in order.
    pub fn keys(&self) -> Vec<Key> {
        match &self.shape {
            Shape::Fields(fields) => fields.iter().map(|(key, _)| key.clone()).collect(),
            _ => Vec::new(),
        }
    }

    /// The sub-spec declared for `key`, if any. Spread shapes are resolved
    /// by the predicate library, not here.
    pub fn field(&self, key: &Key) -> Option<&Spec> {
        match &self.shape {
            Shape::Fields(fields) => fields.iter().find(|(k, _)| k.matches(key)).map(|(_, s)| s),
            _ => None,
        }
    }
}

impl fmt::Debug for Spec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Spec");
        s.field("pred", &self.pred.is_some());
        match &self.shape {
            Shape::Leaf => s.field("shape", &"leaf"),
            Shape::Fields(fields) => s.field("fields", fields),
            Shape::Spread(item) => s.field("spread", item),
        };
        s.finish()
    }
}

/// A `required` or `fields` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outline {
    /// Applies to the node itself.
    Flag(bool),
    /// Per-key declarations.
    Keys(Vec<(Key, Outline)>),
    /// One declaration for every key.
    Spread(Box<Outline>),
}

impl Outline {
    /// Per-key declarations from an iterator.
    pub fn keys<K, I>(keys: I) -> Self
    where
        K: Into<Key>,
        I: IntoIterator<Item = (K, Outline)>,
    {
        Self::Keys(keys.into_iter().map(|(k, o)| (k.into(), o)).collect())
    }

    /// Mark every listed key with `Flag(true)`.
    pub fn flags<K, I>(keys: I) -> Self
    where
        K: Into<Key>,
        I: IntoIterator<Item = K>,
    {
        Self::Keys(keys.into_iter().map(|k| (k.into(), Self::Flag(true))).collect())
    }

    /// One declaration for every key.
    pub fn spread(item: Outline) -> Self {
        Self::Spread(Box::new(item))
    }

    /// Whether this outline describes a collection.
    pub fn is_collection(&self) -> bool {
        !matches!(self, Self::Flag(_))
    }

    /// Whether this outline is a spread.
    pub fn is_spread(&self) -> bool {
        matches!(self, Self::Spread(_))
    }

    /// Declared keys, in order.
    pub fn declared_keys(&self) -> Vec<Key> {
        match self {
            Self::Keys(keys) => keys.iter().map(|(key, _)| key.clone()).collect(),
            _ => Vec::new(),
        }
    }

    /// The declaration that applies to the child at `key`.
    pub fn child(&self, key: &Key) -> Option<Outline> {
        match self {
            Self::Flag(_) => None,
            Self::Keys(keys) => keys.iter().find(|(k, _)| k.matches(key)).map(|(_, o)| o.clone()),
            Self::Spread(item) => Some((**item).clone()),
        }
    }

    /// The flag that applies to the node itself.
    pub fn flag(&self) -> bool {
        matches!(self, Self::Flag(true))
    }
}

impl From<bool> for Outline {
    fn from(flag: bool) -> Self {
        Self::Flag(flag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_parse_and_display() {
        assert_eq!(Key::parse("3"), Key::Index(3));
        assert_eq!(Key::parse("name"), Key::from("name"));
        assert_eq!(Key::parse(""), Key::from(""));
        assert_eq!(Key::Index(7).to_string(), "7");
        assert_eq!(Key::from("a").as_index(), None);
        assert_eq!(Key::from("12").as_index(), Some(12));
    }

    #[test]
    fn test_random_ids_are_distinct() {
        let a = NodeId::random();
        let b = NodeId::random();
        assert_eq!(a.as_str().len(), NodeId::RANDOM_LEN);
        assert!(a.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_spec_fields() {
        let spec = Spec::fields([
            ("name", Spec::check(|v| Verdict::check(v.is_some(), "missing"))),
            ("age", Spec::empty()),
        ]);
        assert!(spec.is_collection());
        assert_eq!(spec.keys(), vec![Key::from("name"), Key::from("age")]);
        assert!(spec.field(&Key::from("name")).and_then(Spec::pred).is_some());
        assert!(spec.field(&Key::from("age")).and_then(Spec::pred).is_none());
        assert!(spec.field(&Key::from("other")).is_none());
        assert!(Spec::spread(Spec::empty()).field(&Key::Index(0)).is_none());
    }

    #[test]
    fn test_outline_child() {
        let required = Outline::flags(["name"]);
        assert_eq!(required.child(&Key::from("name")), Some(Outline::Flag(true)));
        assert_eq!(required.child(&Key::from("age")), None);

        let spread = Outline::spread(Outline::flags(["x"]));
        assert!(spread.is_spread());
        assert_eq!(spread.child(&Key::Index(4)), Some(Outline::flags(["x"])));
        assert!(!Outline::Flag(true).is_collection());
        assert!(Outline::Flag(true).flag());
    }

    #[test]
    fn test_index_and_name_keys_match() {
        assert!(Key::Index(0).matches(&Key::from("0")));
        assert!(Key::from("3").matches(&Key::Index(3)));
        assert!(!Key::Index(1).matches(&Key::from("01")));
        assert!(!Key::from("a").matches(&Key::from("b")));

        let spec = Spec::fields([(0usize, Spec::check(|_| Verdict::Valid))]);
        assert!(spec.field(&Key::from("0")).and_then(Spec::pred).is_some());

        let required = Outline::flags([1usize]);
        assert_eq!(required.child(&Key::from("1")), Some(Outline::Flag(true)));
    }
}
