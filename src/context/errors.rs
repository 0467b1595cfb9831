//! Per-request error registry.
//!
//! Stages record errors on the context instead of failing the chain; a later
//! stage (typically logging or an error renderer) decides what to do with
//! them.

use serde_json::{Map, Value};
use smallvec::SmallVec;
use std::fmt;
use std::ops::BitOr;

/// Bit flags classifying a recorded error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorType(u64);

impl ErrorType {
    /// Request binding failed.
    pub const BIND: ErrorType = ErrorType(1 << 63);
    /// Response rendering failed.
    pub const RENDER: ErrorType = ErrorType(1 << 62);
    /// Internal error, not meant for clients. The default.
    pub const PRIVATE: ErrorType = ErrorType(1 << 0);
    /// Safe to show to clients.
    pub const PUBLIC: ErrorType = ErrorType(1 << 1);
    /// Matches every type.
    pub const ANY: ErrorType = ErrorType(u64::MAX);

    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Whether any flag of `other` is set in `self`.
    #[must_use]
    pub const fn intersects(self, other: ErrorType) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for ErrorType {
    type Output = ErrorType;

    fn bitor(self, rhs: ErrorType) -> ErrorType {
        ErrorType(self.0 | rhs.0)
    }
}

/// A recorded error: the cause, its type flags and optional metadata.
#[derive(Debug)]
pub struct Error {
    pub err: anyhow::Error,
    pub kind: ErrorType,
    pub meta: Option<Value>,
}

impl Error {
    pub fn new(err: impl Into<anyhow::Error>, kind: ErrorType) -> Self {
        Self {
            err: err.into(),
            kind,
            meta: None,
        }
    }

    pub fn set_type(&mut self, kind: ErrorType) -> &mut Self {
        self.kind = kind;
        self
    }

    pub fn set_meta(&mut self, meta: Value) -> &mut Self {
        self.meta = Some(meta);
        self
    }

    #[must_use]
    pub fn is_type(&self, flags: ErrorType) -> bool {
        self.kind.intersects(flags)
    }

    /// JSON view of the error.
    ///
    /// Object metadata is returned with an `error` field added when it has
    /// none; other metadata is returned as-is; without metadata the result is
    /// `{"error": "<message>"}`.
    #[must_use]
    pub fn json(&self) -> Value {
        match &self.meta {
            Some(Value::Object(meta)) => {
                let mut out = meta.clone();
                out.entry("error")
                    .or_insert_with(|| Value::String(self.err.to_string()));
                Value::Object(out)
            }
            Some(Value::Null) | None => {
                let mut out = Map::new();
                out.insert("error".to_owned(), Value::String(self.err.to_string()));
                Value::Object(out)
            }
            Some(other) => other.clone(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.err, f)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.err.as_ref())
    }
}

/// The ordered list of errors recorded during one request.
#[derive(Debug, Default)]
pub struct ErrorMsgs {
    inner: SmallVec<[Error; 2]>,
}

impl ErrorMsgs {
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Error> {
        self.inner.iter()
    }

    #[must_use]
    pub fn last(&self) -> Option<&Error> {
        self.inner.last()
    }

    /// Errors whose type intersects `flags`.
    #[must_use]
    pub fn by_type(&self, flags: ErrorType) -> Vec<&Error> {
        self.inner.iter().filter(|e| e.is_type(flags)).collect()
    }

    /// Every error message, in recording order.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.inner.iter().map(|e| e.err.to_string()).collect()
    }

    /// A single error renders as an object, several as an array.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self.inner.as_slice() {
            [] => Value::Null,
            [only] => only.json(),
            many => Value::Array(many.iter().map(Error::json).collect()),
        }
    }

    pub(crate) fn push(&mut self, error: Error) -> &mut Error {
        self.inner.push(error);
        let last = self.inner.len() - 1;
        &mut self.inner[last]
    }

    pub(crate) fn clear(&mut self) {
        self.inner.clear();
    }
}

impl fmt::Display for ErrorMsgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.inner.iter().enumerate() {
            writeln!(f, "Error #{:02}: {}", i + 1, e.err)?;
            if let Some(meta) = &e.meta {
                writeln!(f, "     Meta: {meta}")?;
            }
        }
        Ok(())
    }
}
