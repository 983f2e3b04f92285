//! Error aggregation across a node tree.
//!
//! Each collection node flattens the errors of its subtree into a list of
//! [`ErrorRecord`]s. Paths are built from node ids, not keys, so a record
//! keeps pointing at the same item when a list is reordered.

use serde_json::Value;

use crate::spec::NodeId;
use crate::state::NodeState;

/// One error somewhere in a node tree.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorRecord {
    /// Ids from the reporting node (excluded) down to the failing node.
    pub path: Vec<NodeId>,
    /// `path` joined with `.`.
    pub which: String,
    /// The failure reason.
    pub error: Value,
    /// Whether the error comes from a collection-level predicate.
    pub is_coll: bool,
}

impl ErrorRecord {
    /// Create a record, rendering `which` from the path.
    pub fn new(path: Vec<NodeId>, error: Value, is_coll: bool) -> Self {
        let which = render(&path);
        Self {
            path,
            which,
            error,
            is_coll,
        }
    }

    /// The same record seen from one level further up.
    pub fn prefixed(&self, id: &NodeId) -> Self {
        let mut path = Vec::with_capacity(self.path.len() + 1);
        path.push(id.clone());
        path.extend(self.path.iter().cloned());
        Self::new(path, self.error.clone(), self.is_coll)
    }
}

fn render(path: &[NodeId]) -> String {
    path.iter().map(NodeId::as_str).collect::<Vec<_>>().join(".")
}

/// All errors of a node, relative to that node.
///
/// A collection node already carries its flattened list; a leaf reports its
/// own error with an empty path.
pub fn flatten(state: &NodeState) -> Vec<ErrorRecord> {
    match &state.group {
        Some(details) => details.errors.clone(),
        None => state
            .error
            .iter()
            .map(|error| ErrorRecord::new(Vec::new(), error.clone(), false))
            .collect(),
    }
}

/// Errors of a collection node from its own predicate state and the states
/// of its children, in that order.
pub fn collect(own: &NodeState, children: &[NodeState]) -> Vec<ErrorRecord> {
    let mut records: Vec<ErrorRecord> = own
        .error
        .iter()
        .map(|error| ErrorRecord::new(Vec::new(), error.clone(), true))
        .collect();
    for child in children {
        records.extend(flatten(child).iter().map(|record| record.prefixed(&child.id)));
    }
    records
}
