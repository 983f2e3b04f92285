//! Reactive validation graph for Horizon Lattice.
//!
//! This crate validates values and trees of values reactively:
//!
//! - **Stores**: Equality-gated observable containers ([`Store`])
//! - **Aggregates**: Values derived from a changing set of sources ([`Aggregate`])
//! - **Field nodes**: One value checked by one predicate, sync or async ([`FieldNode`])
//! - **Group nodes**: Lists and maps validated through their children ([`GroupNode`])
//! - **Error reports**: Every failure in a tree, flattened with its id path ([`ErrorRecord`])
//! - **Factory**: [`Node::build`] picks the node kind from a [`Spec`] and a seed value
//!
//! Predicates are interpreted by a process-wide [`PredicateLibrary`], which
//! must be installed before any node is built.
//!
//! # Example
//!
//! ```
//! use horizon_lattice_validate::prelude::*;
//! use serde_json::json;
//!
//! install_library(StandardLibrary::default());
//!
//! let spec = Spec::fields([
//!     ("name", Spec::empty()),
//!     ("age", Spec::check(|v| {
//!         Verdict::check(v.and_then(|v| v.as_u64()) >= Some(18), "too young")
//!     })),
//! ]);
//! let form = Node::build(
//!     json!({"name": "", "age": 10}),
//!     NodeConfig::new()
//!         .with_spec(spec)
//!         .with_required(Outline::flags(["name"])),
//! )
//! .unwrap();
//!
//! let _ = form.activate(true);
//! let state = form.state();
//! assert!(!state.valid);
//! assert_eq!(state.errors().len(), 2);
//! ```

pub mod aggregate;
pub mod config;
pub mod context;
mod error;
mod field;
mod group;
pub mod library;
pub mod logging;
mod node;
pub mod prelude;
pub mod report;
pub mod runtime;
pub mod shape;
pub mod spec;
pub mod state;
pub mod store;
pub mod verdict;

pub use aggregate::{Aggregate, Cleanup, KeyedAggregate, Publisher, Source};
pub use config::{NodeConfig, SetOptions};
pub use context::{Context, RelativePath};
pub use error::{BoxError, Error, Result};
pub use field::FieldNode;
pub use group::GroupNode;
pub use library::{PredicateLibrary, REQUIRED, StandardLibrary, install_library, library};
pub use logging::{NodeTreeDebug, TreeFormatOptions, TreeStyle};
pub use node::{Node, Seed};
pub use report::ErrorRecord;
pub use runtime::{DriverRuntimeConfig, configure_runtime};
pub use shape::Layout;
pub use spec::{IdFn, Key, NodeId, Outline, Predicate, SameFn, Shape, Spec, SubmitFn};
pub use state::{GroupDetails, NodeState, Status};
pub use store::{Listener, ListenerId, Readable, Store, Subscription};
pub use verdict::{Outcome, Promise, Verdict};
