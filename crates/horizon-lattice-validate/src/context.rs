//! Cross-field lookups for predicates.
//!
//! Every predicate receives a [`Context`]. [`Context::get`] reads another
//! node's value by a relative path such as `"../password"`: each leading
//! `..` climbs one collection node, and the remaining segments walk into
//! that ancestor's published value.
//!
//! Lookups are reactive. The first lookup of a given path subscribes the
//! calling node to the ancestor, so the node re-validates when the value at
//! that path changes.

use std::sync::Weak;

use serde_json::Value;

use crate::field::FieldInner;
use crate::spec::Key;

/// A parsed relative path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelativePath {
    /// Number of ancestor hops.
    pub hops: usize,
    /// Keys to walk from the ancestor's value.
    pub segments: Vec<Key>,
}

impl RelativePath {
    /// Parse a `/`-separated relative path.
    ///
    /// Leading `..` segments count hops. `.` and empty segments are
    /// skipped anywhere in the path.
    pub fn parse(path: &str) -> Self {
        let mut hops = 0;
        let mut segments = Vec::new();
        for segment in path.split('/') {
            match segment {
                "" | "." => {}
                ".." if segments.is_empty() => hops += 1,
                other => segments.push(Key::parse(other)),
            }
        }
        Self { hops, segments }
    }
}

/// Cross-field accessor handed to predicates.
#[derive(Clone, Default)]
pub struct Context {
    origin: Option<Weak<FieldInner>>,
}

impl Context {
    pub(crate) fn new(origin: Weak<FieldInner>) -> Self {
        Self {
            origin: Some(origin),
        }
    }

    /// A context with no node behind it; every lookup yields `None`.
    pub fn detached() -> Self {
        Self::default()
    }

    /// Read the value at a relative path.
    ///
    /// Returns `None` when the ancestor does not exist or the path does not
    /// resolve to a value.
    pub fn get(&self, path: &str) -> Option<Value> {
        let origin = self.origin.as_ref()?.upgrade()?;
        origin.lookup(path)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("attached", &self.origin.as_ref().is_some_and(|o| o.strong_count() > 0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hops_and_segments() {
        let path = RelativePath::parse("../../address/0/street");
        assert_eq!(path.hops, 2);
        assert_eq!(
            path.segments,
            vec![Key::from("address"), Key::Index(0), Key::from("street")]
        );
    }

    #[test]
    fn test_parse_ignores_dots_and_empty_segments() {
        let path = RelativePath::parse("./..//./../name/");
        assert_eq!(path.hops, 2);
        assert_eq!(path.segments, vec![Key::from("name")]);
    }

    #[test]
    fn test_parse_without_hops() {
        let path = RelativePath::parse("name");
        assert_eq!(path.hops, 0);
        assert_eq!(path.segments, vec![Key::from("name")]);
    }

    #[test]
    fn test_detached_context_yields_none() {
        assert_eq!(Context::detached().get("../anything"), None);
    }
}
