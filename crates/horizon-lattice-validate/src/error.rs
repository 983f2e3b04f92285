//! Error types for the validation engine.
//!
//! Validation failures are not errors: they are published as data on
//! [`NodeState`](crate::state::NodeState). Only misconfiguration and
//! failing submit handlers surface here.

/// Boxed error returned by a submit handler.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type alias for validation engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the validation engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A node was built before a predicate library was installed.
    #[error("no predicate library installed; call install_library() before building nodes")]
    LibraryNotInstalled,

    /// The configured submit handler failed.
    #[error("submit handler failed: {0}")]
    Submit(#[source] BoxError),
}

impl Error {
    /// Create a submit error from any error type.
    pub fn submit(source: impl Into<BoxError>) -> Self {
        Self::Submit(source.into())
    }

    /// Whether this is a configuration error.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::LibraryNotInstalled)
    }
}
