//! Validation results.
//!
//! A predicate produces an [`Outcome`]: either a [`Verdict`] right away or a
//! future that resolves to one. Pending futures resolve to a `Verdict`, never
//! to another pending outcome, so everything awaiting a node's [`Promise`]
//! sees a terminal result.

use futures_util::future::{self, BoxFuture, FutureExt, Shared};
use serde_json::Value;

/// A terminal validation result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The value passed.
    Valid,
    /// The value failed, with a reason (usually a string).
    Invalid(Value),
}

impl Verdict {
    /// `Valid` if `ok`, otherwise `Invalid(reason)`.
    pub fn check(ok: bool, reason: impl Into<Value>) -> Self {
        if ok {
            Self::Valid
        } else {
            Self::Invalid(reason.into())
        }
    }

    /// Create an invalid verdict.
    pub fn invalid(reason: impl Into<Value>) -> Self {
        Self::Invalid(reason.into())
    }

    /// Whether this verdict is `Valid`.
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// The failure reason, if any.
    pub fn reason(&self) -> Option<&Value> {
        match self {
            Self::Valid => None,
            Self::Invalid(reason) => Some(reason),
        }
    }
}

/// A shared, cloneable future resolving to a [`Verdict`].
///
/// Every [`NodeState`](crate::state::NodeState) carries one, including
/// states produced by synchronous predicates.
pub type Promise = Shared<BoxFuture<'static, Verdict>>;

/// A promise that is already resolved.
pub fn resolved(verdict: Verdict) -> Promise {
    future::ready(verdict).boxed().shared()
}

/// Join several promises into one.
///
/// Resolves once all inputs resolve: `Valid` if every input is valid,
/// otherwise the first invalid verdict in input order.
pub fn join(promises: Vec<Promise>) -> Promise {
    async move {
        future::join_all(promises)
            .await
            .into_iter()
            .find(|verdict| !verdict.is_valid())
            .unwrap_or(Verdict::Valid)
    }
    .boxed()
    .shared()
}

/// The result of invoking a predicate.
pub enum Outcome {
    /// The predicate finished synchronously.
    Ready(Verdict),
    /// The predicate is still running.
    Pending(BoxFuture<'static, Verdict>),
}

impl Outcome {
    /// A ready, valid outcome.
    pub fn valid() -> Self {
        Self::Ready(Verdict::Valid)
    }

    /// A ready, invalid outcome.
    pub fn invalid(reason: impl Into<Value>) -> Self {
        Self::Ready(Verdict::invalid(reason))
    }

    /// A pending outcome from any future producing a verdict.
    pub fn pending<F>(fut: F) -> Self
    where
        F: std::future::Future<Output = Verdict> + Send + 'static,
    {
        Self::Pending(fut.boxed())
    }

    /// Whether the outcome is still pending.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    /// Turn the outcome into a future, ready or not.
    pub fn into_future(self) -> BoxFuture<'static, Verdict> {
        match self {
            Self::Ready(verdict) => future::ready(verdict).boxed(),
            Self::Pending(fut) => fut,
        }
    }
}

impl From<Verdict> for Outcome {
    fn from(verdict: Verdict) -> Self {
        Self::Ready(verdict)
    }
}

impl std::fmt::Debug for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready(verdict) => f.debug_tuple("Ready").field(verdict).finish(),
            Self::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}
