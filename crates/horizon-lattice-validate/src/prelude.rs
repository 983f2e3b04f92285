//! Prelude module for the validation graph.
//!
//! ```ignore
//! use horizon_lattice_validate::prelude::*;
//! ```
//!
//! This provides access to:
//! - Node construction (`Node`, `FieldNode`, `GroupNode`, `NodeConfig`)
//! - Predicate specs (`Spec`, `Outline`, `Verdict`, `Outcome`, `Context`)
//! - Node state (`NodeState`, `ErrorRecord`)
//! - Library installation (`install_library`, `StandardLibrary`)

// ============================================================================
// Nodes
// ============================================================================

pub use crate::{FieldNode, GroupNode, Node, Seed};
pub use crate::config::{NodeConfig, SetOptions};

// ============================================================================
// Specs and Predicates
// ============================================================================

pub use crate::context::Context;
pub use crate::spec::{Key, NodeId, Outline, Spec};
pub use crate::verdict::{Outcome, Verdict};

// ============================================================================
// State
// ============================================================================

pub use crate::report::ErrorRecord;
pub use crate::state::NodeState;
pub use crate::store::{Readable, Subscription};

// ============================================================================
// Library
// ============================================================================

pub use crate::library::{PredicateLibrary, StandardLibrary, install_library};
