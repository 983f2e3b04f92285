//! Published node state and status combination.

use std::fmt;

use serde_json::Value;

use crate::report::{self, ErrorRecord};
use crate::spec::NodeId;
use crate::verdict::{self, Promise, Verdict};

/// Everything a node publishes.
///
/// Value and verdict fields always belong to the same evaluation pass.
#[derive(Clone)]
pub struct NodeState {
    /// The node's identity.
    pub id: NodeId,
    /// The current value; `None` is undefined.
    pub value: Option<Value>,
    /// The baseline for `changed`.
    pub initial_value: Option<Value>,
    /// Whether validation is live. `None` means mixed (collections only).
    pub active: Option<bool>,
    /// Whether `value` differs from `initial_value`.
    pub changed: bool,
    /// Whether the node passed. Always true while inactive.
    pub valid: bool,
    /// Whether an async predicate is still running.
    pub validating: bool,
    /// The node's own failure reason.
    pub error: Option<Value>,
    /// Resolves to the terminal verdict of the pass that produced this
    /// state.
    pub promise: Promise,
    /// Present on collection nodes.
    pub group: Option<GroupDetails>,
}

/// Extra state published by collection nodes.
#[derive(Debug, Clone, Default)]
pub struct GroupDetails {
    /// Every error in the subtree.
    pub errors: Vec<ErrorRecord>,
    /// The subset of `errors` raised by collection-level predicates.
    pub coll_errors: Vec<ErrorRecord>,
    /// Own predicate state (under `"_"`) followed by each child's state.
    pub details: Vec<(NodeId, NodeState)>,
}

impl NodeState {
    /// An inactive, valid state.
    pub fn new(id: NodeId, value: Option<Value>, initial_value: Option<Value>) -> Self {
        Self {
            id,
            value,
            initial_value,
            ..Self::default()
        }
    }

    /// Whether validation is live on every part of the node.
    pub fn is_active(&self) -> bool {
        self.active == Some(true)
    }

    /// Whether this is a collection node's state.
    pub fn is_group(&self) -> bool {
        self.group.is_some()
    }

    /// Errors in the subtree (a leaf reports its own).
    pub fn errors(&self) -> Vec<ErrorRecord> {
        report::flatten(self)
    }

    /// Collection-level errors in the subtree.
    pub fn coll_errors(&self) -> &[ErrorRecord] {
        self.group
            .as_ref()
            .map(|group| group.coll_errors.as_slice())
            .unwrap_or_default()
    }

    /// The state of a direct child by id, or `"_"` for the own predicate.
    pub fn detail(&self, id: &str) -> Option<&NodeState> {
        self.group
            .as_ref()?
            .details
            .iter()
            .find(|(child, _)| child.as_str() == id)
            .map(|(_, state)| state)
    }

    /// The combinable status fields.
    pub fn status(&self) -> Status {
        Status {
            active: self.active,
            changed: self.changed,
            valid: self.valid,
            validating: self.validating,
        }
    }

    /// The verdict this state reports, if it is terminal.
    pub fn verdict(&self) -> Option<Verdict> {
        if self.validating {
            return None;
        }
        Some(match &self.error {
            Some(reason) if !self.valid => Verdict::Invalid(reason.clone()),
            _ => Verdict::Valid,
        })
    }
}

impl Default for NodeState {
    fn default() -> Self {
        Self {
            id: NodeId::own(),
            value: None,
            initial_value: None,
            active: Some(false),
            changed: false,
            valid: true,
            validating: false,
            error: None,
            promise: verdict::resolved(Verdict::Valid),
            group: None,
        }
    }
}

impl fmt::Debug for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeState")
            .field("id", &self.id)
            .field("value", &self.value)
            .field("active", &self.active)
            .field("changed", &self.changed)
            .field("valid", &self.valid)
            .field("validating", &self.validating)
            .field("error", &self.error)
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}

/// Status flags that combine across constituents.
///
/// [`Status::merge`] is associative and commutative, so any number of
/// states can be folded in any order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    /// Common active flag, or `None` when constituents disagree.
    pub active: Option<bool>,
    /// Any constituent changed.
    pub changed: bool,
    /// Every constituent valid and none validating.
    pub valid: bool,
    /// Any constituent validating.
    pub validating: bool,
}

impl Status {
    /// Combine two statuses.
    pub fn merge(self, other: Self) -> Self {
        let validating = self.validating || other.validating;
        Self {
            active: if self.active == other.active {
                self.active
            } else {
                None
            },
            changed: self.changed || other.changed,
            valid: self.valid && other.valid && !validating,
            validating,
        }
    }

    /// Fold the statuses of several states. `None` for an empty input.
    pub fn fold<'a>(states: impl IntoIterator<Item = &'a NodeState>) -> Option<Self> {
        states.into_iter().map(NodeState::status).reduce(Self::merge)
    }
}

/// Build a collection node's state from its own predicate state and the
/// states of its children.
pub(crate) fn combine_group(id: &NodeId, own: &NodeState, children: &[NodeState]) -> NodeState {
    let status = Status::fold(std::iter::once(own).chain(children)).unwrap_or_else(|| own.status());
    let errors = report::collect(own, children);
    let coll_errors = errors.iter().filter(|record| record.is_coll).cloned().collect();

    let mut details = Vec::with_capacity(children.len() + 1);
    details.push((NodeId::own(), own.clone()));
    details.extend(children.iter().map(|child| (child.id.clone(), child.clone())));

    let promise = verdict::join(
        std::iter::once(own)
            .chain(children)
            .map(|state| state.promise.clone())
            .collect(),
    );

    NodeState {
        id: id.clone(),
        value: own.value.clone(),
        initial_value: own.initial_value.clone(),
        active: status.active,
        changed: status.changed,
        valid: status.valid,
        validating: status.validating,
        error: own.error.clone(),
        promise,
        group: Some(GroupDetails {
            errors,
            coll_errors,
            details,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn status(active: Option<bool>, changed: bool, valid: bool, validating: bool) -> Status {
        Status {
            active,
            changed,
            valid,
            validating,
        }
    }

    #[test]
    fn test_merge_rules() {
        let a = status(Some(true), false, true, false);
        let b = status(Some(false), true, true, false);
        let merged = a.merge(b);
        assert_eq!(merged, status(None, true, true, false));

        let pending = status(Some(true), false, true, true);
        assert_eq!(a.merge(pending), status(Some(true), false, false, true));
    }

    #[test]
    fn test_merge_is_associative_and_commutative() {
        let samples = [
            status(Some(true), false, true, false),
            status(Some(false), true, false, false),
            status(None, false, true, true),
            status(Some(true), true, true, false),
        ];
        for a in samples {
            for b in samples {
                assert_eq!(a.merge(b), b.merge(a));
                for c in samples {
                    assert_eq!(a.merge(b).merge(c), a.merge(b.merge(c)));
                }
            }
        }
    }

    #[tokio::test]
    async fn test_combine_group_orders_details() {
        let own = NodeState {
            error: Some(json!("own")),
            valid: false,
            active: Some(true),
            promise: verdict::resolved(Verdict::invalid("own")),
            ..NodeState::default()
        };
        let child = NodeState {
            id: NodeId::from("name"),
            error: Some(json!("child")),
            valid: false,
            active: Some(true),
            promise: verdict::resolved(Verdict::invalid("child")),
            ..NodeState::default()
        };

        let state = combine_group(&NodeId::from("form"), &own, &[child]);
        assert_eq!(state.id, NodeId::from("form"));
        assert_eq!(state.active, Some(true));
        assert!(!state.valid);
        assert_eq!(state.errors().len(), 2);
        assert_eq!(state.coll_errors().len(), 1);
        assert!(state.detail("_").is_some());
        assert!(state.detail("name").is_some());
        assert_eq!(state.promise.clone().await, Verdict::invalid("own"));
    }
}
