//! Compressed radix tree for HTTP route matching
//!
//! One tree is kept per HTTP method. Each edge stores a run of literal bytes so
//! shared prefixes such as `/api/v1/` are stored once, and lookup cost is
//! proportional to the path length rather than the number of routes.
//!
//! ## Node kinds
//!
//! - **static**: matches its prefix byte-for-byte
//! - **param** (`:name`): matches one non-empty segment, up to the next `/`
//! - **catch-all** (`*name`): matches the remainder of the path including the
//!   leading `/`; only allowed as the final segment
//!
//! Static children are indexed by their first byte. A node has at most one
//! wildcard child, so `/users/:id` and `/users/:name` conflict at registration.
//!
//! ## Matching order
//!
//! At every node a static child wins over the wildcard child. When a static
//! branch dead-ends the lookup backtracks to the most recent node that also has
//! a wildcard child and retries from there. Backtracking state lives in a small
//! inline stack, so lookup never recurses and never allocates for the common
//! case.
//!
//! ## Priorities
//!
//! Every node counts the routes registered beneath it. Siblings are kept
//! ordered by that count (stable for ties) so the busiest subtrees are probed
//! first.
//!
//! ## Example
//!
//! ```rust
//! use brrtframe::router::{Params, RouteTree};
//!
//! let mut tree = RouteTree::new();
//! tree.insert("/users/:id", "user").unwrap();
//! tree.insert("/users/new", "new_user").unwrap();
//!
//! let mut params = Params::new();
//! let found = tree.lookup("/users/42", &mut params);
//! assert_eq!(found.value(), Some(&"user"));
//! assert_eq!(params.get("/users/42", "id"), Some("42"));
//! ```

use smallvec::SmallVec;
use std::sync::Arc;

use super::core::{InsertError, Match, Params};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    Static,
    Param,
    CatchAll,
}

#[derive(Debug, Clone)]
struct Node<T> {
    /// Literal bytes for static nodes, `:name` for params, `/*name` for catch-alls.
    prefix: Vec<u8>,
    kind: NodeKind,
    /// Wildcard name, shared with every `Params` the node fills.
    name: Option<Arc<str>>,
    /// First byte of each static child, parallel to `children`.
    indices: Vec<u8>,
    children: Vec<Node<T>>,
    wild_child: Option<Box<Node<T>>>,
    value: Option<T>,
    pattern: Option<Arc<str>>,
    priority: u32,
}

/// Route waiting to be stored at its terminal node.
struct Pending<T> {
    pattern: Arc<str>,
    value: Option<T>,
}

/// Backtracking point: a node whose wildcard child has not been tried yet.
struct Skipped<'t, T> {
    node: &'t Node<T>,
    pos: usize,
    params: usize,
}

impl<T> Node<T> {
    fn new_static(prefix: Vec<u8>) -> Self {
        Self {
            prefix,
            kind: NodeKind::Static,
            name: None,
            indices: Vec::new(),
            children: Vec::new(),
            wild_child: None,
            value: None,
            pattern: None,
            priority: 0,
        }
    }

    fn new_wildcard(kind: NodeKind, token: &[u8]) -> Self {
        let name = match kind {
            NodeKind::Param => &token[1..],
            _ => &token[2..],
        };
        let mut node = Self::new_static(token.to_vec());
        node.kind = kind;
        node.name = Some(Arc::from(String::from_utf8_lossy(name).as_ref()));
        node
    }

    fn insert(&mut self, path: &[u8], route: &mut Pending<T>) -> Result<(), InsertError> {
        self.priority += 1;
        let result = self.insert_here(path, route);
        if result.is_err() {
            self.priority -= 1;
        }
        result
    }

    fn insert_here(&mut self, path: &[u8], route: &mut Pending<T>) -> Result<(), InsertError> {
        let consumed = match self.kind {
            NodeKind::Static => {
                let mut common = common_prefix_len(path, &self.prefix);
                // never swallow the '/' that introduces a catch-all
                if common > 0 && path.get(common) == Some(&b'*') {
                    common -= 1;
                }
                if common < self.prefix.len() {
                    self.split(common);
                }
                common
            }
            NodeKind::Param => self.prefix.len(),
            NodeKind::CatchAll => path.len(),
        };

        let rest = &path[consumed..];
        if rest.is_empty() {
            if self.value.is_some() {
                return Err(InsertError::Duplicate {
                    pattern: route.pattern.to_string(),
                });
            }
            self.value = route.value.take();
            self.pattern = Some(Arc::clone(&route.pattern));
            return Ok(());
        }

        self.insert_below(rest, route)
    }

    fn insert_below(&mut self, rest: &[u8], route: &mut Pending<T>) -> Result<(), InsertError> {
        if let Some((kind, token_len)) = wildcard_at(rest) {
            let token = &rest[..token_len];
            if let Some(wild) = self.wild_child.as_deref_mut() {
                if wild.kind == kind && wild.prefix == token {
                    return wild.insert(rest, route);
                }
                return Err(InsertError::WildcardConflict {
                    pattern: route.pattern.to_string(),
                    wildcard: String::from_utf8_lossy(token).into_owned(),
                    existing: String::from_utf8_lossy(&wild.prefix).into_owned(),
                });
            }
            if kind == NodeKind::CatchAll && self.indices.contains(&b'/') {
                return Err(InsertError::CatchAllConflict {
                    pattern: route.pattern.to_string(),
                });
            }
            let mut wild = Node::new_wildcard(kind, token);
            wild.insert(rest, route)?;
            self.wild_child = Some(Box::new(wild));
            return Ok(());
        }

        if rest[0] == b'/'
            && matches!(self.wild_child.as_deref(), Some(w) if w.kind == NodeKind::CatchAll)
        {
            return Err(InsertError::CatchAllConflict {
                pattern: route.pattern.to_string(),
            });
        }

        if let Some(i) = self.indices.iter().position(|&b| b == rest[0]) {
            self.children[i].insert(rest, route)?;
            self.bump_child(i);
            return Ok(());
        }

        let static_len = next_wildcard(rest).unwrap_or(rest.len());
        let mut child = Node::new_static(rest[..static_len].to_vec());
        child.insert(rest, route)?;
        self.indices.push(rest[0]);
        self.children.push(child);
        self.bump_child(self.children.len() - 1);
        Ok(())
    }

    /// Split this static node so its prefix becomes `prefix[..at]`.
    fn split(&mut self, at: usize) {
        let tail = self.prefix.split_off(at);
        let child = Node {
            indices: std::mem::take(&mut self.indices),
            children: std::mem::take(&mut self.children),
            wild_child: self.wild_child.take(),
            value: self.value.take(),
            pattern: self.pattern.take(),
            priority: self.priority - 1,
            ..Node::new_static(tail)
        };
        self.indices = vec![child.prefix[0]];
        self.children = vec![child];
    }

    /// Move child `i` ahead of siblings with a lower priority. Ties keep
    /// registration order.
    fn bump_child(&mut self, mut i: usize) {
        let priority = self.children[i].priority;
        while i > 0 && self.children[i - 1].priority < priority {
            self.children.swap(i - 1, i);
            self.indices.swap(i - 1, i);
            i -= 1;
        }
    }

    fn has_value(&self) -> bool {
        self.value.is_some()
    }

    /// Whether appending `/` to a path ending at this node would match.
    fn slash_child_matches(&self) -> bool {
        let static_slash = self
            .indices
            .iter()
            .zip(&self.children)
            .any(|(&b, child)| b == b'/' && child.prefix == b"/" && child.has_value());
        static_slash
            || matches!(self.wild_child.as_deref(), Some(w) if w.kind == NodeKind::CatchAll)
    }

    fn find_case_insensitive(&self, path: &[u8], out: &mut Vec<u8>, fix_slash: bool) -> bool {
        match self.kind {
            NodeKind::Static => {
                let len = self.prefix.len();
                if path.len() >= len && path[..len].eq_ignore_ascii_case(&self.prefix) {
                    let mark = out.len();
                    out.extend_from_slice(&self.prefix);
                    if self.find_case_insensitive_below(&path[len..], out, fix_slash) {
                        return true;
                    }
                    out.truncate(mark);
                    return false;
                }
                if fix_slash
                    && self.has_value()
                    && len == path.len() + 1
                    && self.prefix.last() == Some(&b'/')
                    && path.eq_ignore_ascii_case(&self.prefix[..len - 1])
                {
                    out.extend_from_slice(&self.prefix);
                    return true;
                }
                false
            }
            NodeKind::Param => {
                let end = path.iter().position(|&b| b == b'/').unwrap_or(path.len());
                if end == 0 {
                    return false;
                }
                let mark = out.len();
                out.extend_from_slice(&path[..end]);
                if self.find_case_insensitive_below(&path[end..], out, fix_slash) {
                    return true;
                }
                out.truncate(mark);
                false
            }
            NodeKind::CatchAll => {
                if path.first() != Some(&b'/') {
                    return false;
                }
                out.extend_from_slice(path);
                true
            }
        }
    }

    fn find_case_insensitive_below(&self, rest: &[u8], out: &mut Vec<u8>, fix_slash: bool) -> bool {
        if rest.is_empty() {
            if self.has_value() {
                return true;
            }
            if fix_slash && self.slash_child_matches() {
                out.push(b'/');
                return true;
            }
            return false;
        }

        for (i, &b) in self.indices.iter().enumerate() {
            if b.eq_ignore_ascii_case(&rest[0])
                && self.children[i].find_case_insensitive(rest, out, fix_slash)
            {
                return true;
            }
        }

        if let Some(wild) = self.wild_child.as_deref() {
            if (wild.kind == NodeKind::Param || rest[0] == b'/')
                && wild.find_case_insensitive(rest, out, fix_slash)
            {
                return true;
            }
        }

        // drop a superfluous trailing slash
        fix_slash && rest == b"/" && self.has_value()
    }
}

/// Per-method route table: a compressed radix tree mapping patterns to values.
///
/// The engine stores handler chains in it; anything else works too, which is
/// how the tree is tested in isolation.
#[derive(Debug, Clone)]
pub struct RouteTree<T> {
    root: Node<T>,
    len: usize,
    max_params: usize,
}

impl<T> Default for RouteTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RouteTree<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: Node::new_static(Vec::new()),
            len: 0,
            max_params: 0,
        }
    }

    /// Number of registered patterns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Largest number of wildcards in any registered pattern.
    #[must_use]
    pub fn max_params(&self) -> usize {
        self.max_params
    }

    /// Register `pattern`.
    ///
    /// # Errors
    ///
    /// Returns an [`InsertError`] if the pattern is malformed, already
    /// registered, or conflicts with a wildcard registered earlier. A failed
    /// insert leaves lookups and child priorities as they were, though a
    /// static node on the way may have been split at the common prefix.
    pub fn insert(&mut self, pattern: &str, value: T) -> Result<(), InsertError> {
        let params = validate_pattern(pattern)?;
        let mut route = Pending {
            pattern: Arc::from(pattern),
            value: Some(value),
        };
        self.root.insert(pattern.as_bytes(), &mut route)?;
        self.len += 1;
        self.max_params = self.max_params.max(params);
        Ok(())
    }

    /// Match `path` against the tree.
    ///
    /// Captures are appended to `params` as ranges into `path`; the buffer is
    /// expected to be empty on entry. On a miss the buffer content is
    /// unspecified.
    pub fn lookup<'t>(&'t self, path: &str, params: &mut Params) -> Match<'t, T> {
        let bytes = path.as_bytes();
        let mut skipped: SmallVec<[Skipped<'t, T>; 8]> = SmallVec::new();
        let mut tsr = false;
        let mut node = &self.root;
        let mut pos = 0;

        'walk: loop {
            let matched = match node.kind {
                NodeKind::Static => {
                    let rest = &bytes[pos..];
                    if rest.starts_with(&node.prefix) {
                        pos += node.prefix.len();
                        true
                    } else {
                        if node.has_value()
                            && node.prefix.len() == rest.len() + 1
                            && node.prefix.last() == Some(&b'/')
                            && node.prefix.starts_with(rest)
                        {
                            tsr = true;
                        }
                        false
                    }
                }
                NodeKind::Param => {
                    let end = bytes[pos..]
                        .iter()
                        .position(|&b| b == b'/')
                        .map_or(bytes.len(), |i| pos + i);
                    if end == pos {
                        false
                    } else {
                        if let Some(name) = &node.name {
                            params.push(Arc::clone(name), pos..end);
                        }
                        pos = end;
                        true
                    }
                }
                NodeKind::CatchAll => {
                    if let Some(name) = &node.name {
                        params.push(Arc::clone(name), pos..bytes.len());
                    }
                    pos = bytes.len();
                    true
                }
            };

            if matched {
                if pos == bytes.len() {
                    if let (Some(value), Some(pattern)) = (&node.value, &node.pattern) {
                        return Match::Found { value, pattern };
                    }
                    if node.slash_child_matches() {
                        tsr = true;
                    }
                } else {
                    let next = bytes[pos];
                    if let Some(i) = node.indices.iter().position(|&b| b == next) {
                        if node.wild_child.is_some() {
                            skipped.push(Skipped {
                                node,
                                pos,
                                params: params.len(),
                            });
                        }
                        node = &node.children[i];
                        continue 'walk;
                    }
                    if let Some(wild) = node.wild_child.as_deref() {
                        if wild.kind == NodeKind::Param || next == b'/' {
                            node = wild;
                            continue 'walk;
                        }
                    }
                    if node.has_value() && &bytes[pos..] == b"/" {
                        tsr = true;
                    }
                }
            }

            while let Some(point) = skipped.pop() {
                params.truncate(point.params);
                pos = point.pos;
                if let Some(wild) = point.node.wild_child.as_deref() {
                    if wild.kind == NodeKind::Param || bytes[pos] == b'/' {
                        node = wild;
                        continue 'walk;
                    }
                }
            }

            return Match::NotFound { tsr };
        }
    }

    /// Find the registered path matching `path` while ignoring ASCII case.
    ///
    /// With `fix_trailing_slash` a single missing or superfluous trailing
    /// slash is corrected too. Returns the corrected path with the route's
    /// own casing for static parts and the request's bytes for wildcards.
    #[must_use]
    pub fn find_case_insensitive(&self, path: &str, fix_trailing_slash: bool) -> Option<String> {
        let mut out = Vec::with_capacity(path.len() + 1);
        if self
            .root
            .find_case_insensitive(path.as_bytes(), &mut out, fix_trailing_slash)
        {
            String::from_utf8(out).ok()
        } else {
            None
        }
    }
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

/// Wildcard starting at the beginning of `rest`, with its token length.
fn wildcard_at(rest: &[u8]) -> Option<(NodeKind, usize)> {
    match rest {
        [b':', ..] => {
            let len = rest.iter().position(|&b| b == b'/').unwrap_or(rest.len());
            Some((NodeKind::Param, len))
        }
        [b'/', b'*', ..] => Some((NodeKind::CatchAll, rest.len())),
        _ => None,
    }
}

/// Offset of the next wildcard token in `rest`.
fn next_wildcard(rest: &[u8]) -> Option<usize> {
    rest.iter().enumerate().find_map(|(i, &b)| match b {
        b':' => Some(i),
        b'/' if rest.get(i + 1) == Some(&b'*') => Some(i),
        _ => None,
    })
}

/// Check pattern syntax and return its wildcard count.
fn validate_pattern(pattern: &str) -> Result<usize, InsertError> {
    let invalid = |reason: &'static str| InsertError::InvalidPattern {
        pattern: pattern.to_owned(),
        reason,
    };

    if !pattern.starts_with('/') {
        return Err(invalid("path must begin with '/'"));
    }

    let segments: SmallVec<[&str; 16]> = pattern[1..].split('/').collect();
    let mut names: SmallVec<[&str; 8]> = SmallVec::new();

    for (i, segment) in segments.iter().enumerate() {
        let wildcard = segment
            .find([':', '*'])
            .map(|at| (at, segment.as_bytes()[at]));
        let Some((at, sigil)) = wildcard else {
            continue;
        };
        if at != 0 {
            return Err(invalid("wildcards must occupy a whole path segment"));
        }
        let name = &segment[1..];
        if name.is_empty() {
            return Err(invalid("wildcards must be named with a non-empty name"));
        }
        if name.contains([':', '*']) {
            return Err(invalid("only one wildcard per path segment is allowed"));
        }
        if sigil == b'*' && i + 1 != segments.len() {
            return Err(invalid("catch-all routes are only allowed at the end of the path"));
        }
        if names.contains(&name) {
            return Err(invalid("wildcard names must be unique within a path"));
        }
        names.push(name);
    }

    Ok(names.len())
}
