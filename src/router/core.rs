//! Router core types shared by the radix tree and the request context.
//!
//! # Hot path
//!
//! Everything in this module is touched on every request. Parameter captures
//! are stored as byte ranges into the routed path instead of owned strings, so
//! a lookup that captures no more than [`MAX_INLINE_PARAMS`] values performs no
//! heap allocation at all.

#![deny(clippy::inefficient_to_string)]
#![deny(clippy::format_push_string)]
#![deny(clippy::unnecessary_to_owned)]

use smallvec::SmallVec;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

/// Maximum number of captured parameters before the capture buffer spills to the heap.
/// Most REST APIs have ≤4 path params (e.g., `/users/:id/posts/:post_id`).
pub const MAX_INLINE_PARAMS: usize = 8;

/// A single captured path parameter.
///
/// The name is shared with the route tree (`Arc::clone` is an atomic increment),
/// the value is a byte range into the path the lookup ran against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub key: Arc<str>,
    pub value: Range<usize>,
}

/// Capture buffer filled by [`RouteTree::lookup`](super::RouteTree::lookup).
///
/// Parameters are kept in pattern order. Names are unique within a pattern so
/// lookups by name are a short linear scan.
#[derive(Debug, Clone, Default)]
pub struct Params {
    inner: SmallVec<[Param; MAX_INLINE_PARAMS]>,
}

impl Params {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a buffer pre-sized for `capacity` captures.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: SmallVec::with_capacity(capacity),
        }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Whether the buffer outgrew its inline storage.
    #[must_use]
    pub fn spilled(&self) -> bool {
        self.inner.spilled()
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    #[inline]
    pub(crate) fn push(&mut self, key: Arc<str>, value: Range<usize>) {
        self.inner.push(Param { key, value });
    }

    #[inline]
    pub(crate) fn truncate(&mut self, len: usize) {
        self.inner.truncate(len);
    }

    /// Resolve parameter `name` against the path the lookup ran on.
    #[inline]
    #[must_use]
    pub fn get<'p>(&self, path: &'p str, name: &str) -> Option<&'p str> {
        self.inner
            .iter()
            .find(|p| p.key.as_ref() == name)
            .and_then(|p| path.get(p.value.clone()))
    }

    /// Iterate `(name, value)` pairs in pattern order.
    pub fn iter<'a>(&'a self, path: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.inner
            .iter()
            .map(move |p| (p.key.as_ref(), path.get(p.value.clone()).unwrap_or_default()))
    }

    /// Parameter names in pattern order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.inner.iter().map(|p| p.key.as_ref())
    }

    /// Raw captures, for callers that keep their own copy of the path.
    #[must_use]
    pub fn as_slice(&self) -> &[Param] {
        &self.inner
    }

    /// Owned `(name, value)` pairs.
    /// Note: This allocates - use [`Params::get`] in hot paths instead.
    #[must_use]
    pub fn to_owned_pairs(&self, path: &str) -> Vec<(Arc<str>, String)> {
        self.inner
            .iter()
            .map(|p| {
                (
                    Arc::clone(&p.key),
                    path.get(p.value.clone()).unwrap_or_default().to_owned(),
                )
            })
            .collect()
    }
}

/// Outcome of a route tree lookup. Lookup is total: it never fails.
#[derive(Debug)]
pub enum Match<'t, T> {
    /// The path matched a registered pattern.
    Found {
        value: &'t T,
        /// The pattern as registered, e.g. `/users/:id`.
        pattern: &'t Arc<str>,
    },
    /// Nothing matched. `tsr` is set when the same path with one trailing
    /// slash added or removed would have matched.
    NotFound { tsr: bool },
}

impl<'t, T> Match<'t, T> {
    #[must_use]
    pub fn is_found(&self) -> bool {
        matches!(self, Match::Found { .. })
    }

    /// Trailing slash redirect recommendation.
    #[must_use]
    pub fn tsr(&self) -> bool {
        matches!(self, Match::NotFound { tsr: true })
    }

    #[must_use]
    pub fn value(&self) -> Option<&'t T> {
        match self {
            Match::Found { value, .. } => Some(value),
            Match::NotFound { .. } => None,
        }
    }

    #[must_use]
    pub fn pattern(&self) -> Option<&'t Arc<str>> {
        match self {
            Match::Found { pattern, .. } => Some(pattern),
            Match::NotFound { .. } => None,
        }
    }
}

/// Registration failure.
///
/// These are programmer errors detected at startup; the engine turns them into
/// panics, [`RouteTree::insert`](super::RouteTree::insert) returns them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertError {
    /// The pattern is syntactically invalid.
    InvalidPattern {
        pattern: String,
        reason: &'static str,
    },
    /// The pattern is already registered.
    Duplicate { pattern: String },
    /// A route needs at least one stage.
    EmptyChain { pattern: String },
    /// A different wildcard already occupies this position.
    WildcardConflict {
        pattern: String,
        wildcard: String,
        existing: String,
    },
    /// A catch-all would share its position with other routes.
    CatchAllConflict { pattern: String },
    /// The composed chain has more stages than a context can index.
    TooManyHandlers {
        pattern: String,
        count: usize,
        max: usize,
    },
}

impl fmt::Display for InsertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InsertError::InvalidPattern { pattern, reason } => {
                write!(f, "invalid route pattern '{pattern}': {reason}")
            }
            InsertError::Duplicate { pattern } => {
                write!(f, "handlers are already registered for path '{pattern}'")
            }
            InsertError::EmptyChain { pattern } => {
                write!(f, "there must be at least one handler for path '{pattern}'")
            }
            InsertError::WildcardConflict {
                pattern,
                wildcard,
                existing,
            } => write!(
                f,
                "'{wildcard}' in new path '{pattern}' conflicts with existing wildcard '{existing}'"
            ),
            InsertError::CatchAllConflict { pattern } => write!(
                f,
                "catch-all wildcard in path '{pattern}' conflicts with existing routes at the same position"
            ),
            InsertError::TooManyHandlers {
                pattern,
                count,
                max,
            } => write!(
                f,
                "too many handlers for path '{pattern}': {count} (at most {max} allowed)"
            ),
        }
    }
}

impl std::error::Error for InsertError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_get_by_name() {
        let path = "/users/42/posts/7";
        let mut params = Params::new();
        params.push(Arc::from("id"), 7..9);
        params.push(Arc::from("post_id"), 16..17);

        assert_eq!(params.get(path, "id"), Some("42"));
        assert_eq!(params.get(path, "post_id"), Some("7"));
        assert_eq!(params.get(path, "missing"), None);
        assert_eq!(params.keys().collect::<Vec<_>>(), vec!["id", "post_id"]);
    }

    #[test]
    fn test_params_stay_inline() {
        let mut params = Params::new();
        for i in 0..MAX_INLINE_PARAMS {
            params.push(Arc::from(format!("p{i}")), 0..1);
        }
        assert!(!params.spilled());
        params.push(Arc::from("overflow"), 0..1);
        assert!(params.spilled());
    }

    #[test]
    fn test_params_truncate_for_backtracking() {
        let mut params = Params::new();
        params.push(Arc::from("a"), 0..1);
        params.push(Arc::from("b"), 1..2);
        params.truncate(1);
        assert_eq!(params.len(), 1);
        assert_eq!(params.iter("xy").collect::<Vec<_>>(), vec![("a", "x")]);
    }

    #[test]
    fn test_insert_error_display() {
        let err = InsertError::WildcardConflict {
            pattern: "/a/:y".into(),
            wildcard: ":y".into(),
            existing: ":x".into(),
        };
        assert_eq!(
            err.to_string(),
            "':y' in new path '/a/:y' conflicts with existing wildcard ':x'"
        );
    }
}
