//! The predicate library: how specs turn into predicates.
//!
//! The engine never interprets a [`Spec`] itself. It asks the installed
//! [`PredicateLibrary`] for a spec's predicate, for the spread sub-spec of a
//! collection, whether a `required` declaration makes a node optional, and
//! for user-facing messages. [`StandardLibrary`] reads the predicates stored
//! in each [`Spec`] and is enough for most uses.
//!
//! A library must be installed once, before any node is built:
//!
//! ```
//! use horizon_lattice_validate::library::{install_library, library, StandardLibrary};
//!
//! install_library(StandardLibrary::default());
//! assert!(library().is_ok());
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::logging::targets;
use crate::spec::{Outline, Predicate, Shape, Spec};
use crate::verdict::{Outcome, Verdict};

/// Message key for the built-in required check.
pub const REQUIRED: &str = "required";

/// Interprets specs for the engine.
pub trait PredicateLibrary: Send + Sync {
    /// The predicate declared by `spec`, if any.
    fn predicate(&self, spec: &Spec) -> Option<Predicate>;

    /// The sub-spec shared by every key of a spread spec.
    fn spread<'a>(&self, spec: &'a Spec) -> Option<&'a Spec>;

    /// Whether a `required` declaration leaves the node optional.
    fn is_optional(&self, required: &Outline) -> bool;

    /// The reason reported for a message key.
    fn message(&self, key: &str) -> Value;

    /// Run a predicate.
    fn validate(&self, pred: &Predicate, value: Option<&Value>, ctx: &Context) -> Outcome {
        pred(value, ctx)
    }

    /// Short-circuiting conjunction.
    ///
    /// Predicates run in order; the first invalid verdict wins and later
    /// predicates are not invoked. A pending predicate suspends the chain
    /// until it resolves.
    fn all(&self, preds: Vec<Predicate>) -> Predicate {
        let preds: Arc<[Predicate]> = preds.into();
        Arc::new(move |value: Option<&Value>, ctx: &Context| {
            chain(Arc::clone(&preds), 0, value, ctx)
        })
    }
}

fn chain(preds: Arc<[Predicate]>, start: usize, value: Option<&Value>, ctx: &Context) -> Outcome {
    for index in start..preds.len() {
        let outcome = preds[index](value, ctx);
        match outcome {
            Outcome::Ready(Verdict::Valid) => continue,
            Outcome::Ready(invalid) => return Outcome::Ready(invalid),
            Outcome::Pending(fut) => {
                let value = value.cloned();
                let ctx = ctx.clone();
                return Outcome::Pending(
                    async move {
                        match fut.await {
                            Verdict::Valid => {
                                chain(preds, index + 1, value.as_ref(), &ctx)
                                    .into_future()
                                    .await
                            }
                            invalid => invalid,
                        }
                    }
                    .boxed(),
                );
            }
        }
    }
    Outcome::Ready(Verdict::Valid)
}

/// Whether a value counts as present for the required check.
pub fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

/// The built-in required check, reporting `library.message("required")`.
pub fn required_check(library: &dyn PredicateLibrary) -> Predicate {
    let reason = library.message(REQUIRED);
    Arc::new(move |value: Option<&Value>, _: &Context| {
        Outcome::Ready(Verdict::check(is_present(value), reason.clone()))
    })
}

/// The default library: predicates come straight from each [`Spec`].
#[derive(Debug, Clone)]
pub struct StandardLibrary {
    messages: HashMap<String, Value>,
}

impl StandardLibrary {
    /// Create a library with the default messages.
    pub fn new() -> Self {
        let mut messages = HashMap::new();
        messages.insert(REQUIRED.to_string(), Value::from("required"));
        Self { messages }
    }

    /// Override the reason reported for a message key.
    pub fn with_message(mut self, key: impl Into<String>, reason: impl Into<Value>) -> Self {
        self.messages.insert(key.into(), reason.into());
        self
    }
}

impl Default for StandardLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl PredicateLibrary for StandardLibrary {
    fn predicate(&self, spec: &Spec) -> Option<Predicate> {
        spec.pred().cloned()
    }

    fn spread<'a>(&self, spec: &'a Spec) -> Option<&'a Spec> {
        match spec.shape() {
            Shape::Spread(item) => Some(item),
            _ => None,
        }
    }

    fn is_optional(&self, required: &Outline) -> bool {
        !required.flag()
    }

    fn message(&self, key: &str) -> Value {
        self.messages
            .get(key)
            .cloned()
            .unwrap_or_else(|| Value::from(key))
    }
}

static LIBRARY: RwLock<Option<Arc<dyn PredicateLibrary>>> = RwLock::new(None);

/// Install the process-wide predicate library, replacing any previous one.
///
/// Nodes capture the library when they are built; replacing it does not
/// affect existing nodes.
pub fn install_library<L: PredicateLibrary + 'static>(library: L) {
    *LIBRARY.write() = Some(Arc::new(library));
    tracing::debug!(target: targets::LIBRARY, "predicate library installed");
}

/// The installed predicate library.
///
/// # Errors
///
/// Returns [`Error::LibraryNotInstalled`] if [`install_library`] has not
/// been called.
pub fn library() -> Result<Arc<dyn PredicateLibrary>> {
    LIBRARY.read().clone().ok_or(Error::LibraryNotInstalled)
}
