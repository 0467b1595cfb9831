#![deny(clippy::inefficient_to_string)]
#![deny(clippy::unnecessary_to_owned)]

use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use once_cell::sync::Lazy;

use super::cancel::Cancellation;
use super::errors::{Error, ErrorMsgs, ErrorType};
use super::snapshot::ContextSnapshot;
use super::writer::{BoxedRawResponse, ResponseWriter};
use super::Request;
use crate::engine::EngineConfig;
use crate::middleware::{HandlerFunc, HandlersChain};
use crate::router::{clean_path, Params, MAX_INLINE_PARAMS};

/// Index value that marks a chain as aborted.
///
/// Chains are limited to fewer stages than this, so an aborted cursor can
/// never address a real stage.
pub const ABORT_INDEX: isize = (i8::MAX / 2) as isize;

/// Value stored under a context key.
pub type KeyValue = Arc<dyn Any + Send + Sync>;

static DEFAULT_CONFIG: Lazy<Arc<EngineConfig>> = Lazy::new(|| Arc::new(EngineConfig::default()));

/// Per-request state threaded through a handler chain.
///
/// Contexts are pooled by the engine: one is acquired per request, reset, and
/// returned when the chain finishes. A stage must not keep a reference to its
/// context past its own return; use [`Context::copy`] to hand request data to
/// background work.
pub struct Context {
    pub(crate) request: Request,
    pub(crate) writer: ResponseWriter,
    pub(crate) handlers: Option<HandlersChain>,
    pub(crate) index: isize,
    /// Path the router matched against; parameter ranges point into it.
    pub(crate) path: String,
    pub(crate) params: Params,
    pub(crate) full_path: Option<Arc<str>>,
    keys: Vec<(Cow<'static, str>, KeyValue)>,
    errors: ErrorMsgs,
    pub(crate) config: Arc<EngineConfig>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("method", self.request.method())
            .field("path", &self.path)
            .field("full_path", &self.full_path)
            .field("index", &self.index)
            .field("keys", &self.keys.iter().map(|(k, _)| k).collect::<Vec<_>>())
            .field("errors", &self.errors.len())
            .field("writer", &self.writer)
            .finish_non_exhaustive()
    }
}

impl Context {
    pub(crate) fn new(config: Arc<EngineConfig>, max_params: usize) -> Self {
        Self {
            request: Request::new(Vec::new()),
            writer: ResponseWriter::new(),
            handlers: None,
            index: -1,
            path: String::with_capacity(64),
            params: Params::with_capacity(max_params.max(MAX_INLINE_PARAMS)),
            full_path: None,
            keys: Vec::new(),
            errors: ErrorMsgs::default(),
            config,
        }
    }

    pub(crate) fn detached() -> Self {
        Self::new(Arc::clone(&DEFAULT_CONFIG), 0)
    }

    /// Prepare a pooled context for `request`.
    pub(crate) fn reset(&mut self, request: Request, raw: BoxedRawResponse) {
        self.request = request;
        self.writer.reset(raw);
        self.writer.begin(&self.request);
        self.handlers = None;
        self.index = -1;
        self.params.clear();
        self.full_path = None;
        self.keys.clear();
        self.errors.clear();

        self.path.clear();
        let raw_path = self.request.uri().path();
        if self.config.use_raw_path || !raw_path.contains('%') {
            self.path.push_str(raw_path);
        } else {
            match urlencoding::decode(raw_path) {
                Ok(decoded) => self.path.push_str(&decoded),
                Err(_) => self.path.push_str(raw_path),
            }
        }
        if self.config.remove_extra_slash {
            self.path = clean_path(&self.path);
        }
    }

    /// Drop every user reference and hand the response sink back.
    pub(crate) fn release(&mut self) -> BoxedRawResponse {
        self.request = Request::new(Vec::new());
        self.handlers = None;
        self.full_path = None;
        self.keys.clear();
        self.errors.clear();
        self.params.clear();
        self.writer.headers_mut().clear();
        self.writer.detach()
    }

    // ------------------------------------------------------------------
    // Flow control
    // ------------------------------------------------------------------

    /// Run the remaining stages of the chain, then return.
    ///
    /// Stages that never call `next` still pass control on when they return:
    /// the loop here walks the whole chain unless a stage aborts it.
    pub fn next(&mut self) {
        self.index += 1;
        let Some(chain) = self.handlers.as_ref().map(Arc::clone) else {
            return;
        };
        while let Some(stage) = usize::try_from(self.index).ok().and_then(|i| chain.get(i)) {
            stage.handle(self);
            self.index += 1;
        }
    }

    /// Prevent pending stages from running. The current stage continues.
    pub fn abort(&mut self) {
        self.index = ABORT_INDEX;
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.index >= ABORT_INDEX
    }

    /// Abort and commit `code` with no body.
    pub fn abort_with_status(&mut self, code: u16) {
        self.status(code);
        if let Err(e) = self.writer.write_header_now() {
            self.error(e);
        }
        self.abort();
    }

    /// Abort and render `body` as JSON.
    pub fn abort_with_status_json<T>(&mut self, code: u16, body: &T)
    where
        T: serde::Serialize + ?Sized,
    {
        self.abort();
        self.json(code, body);
    }

    /// Abort with `code` and record `err`.
    pub fn abort_with_error(&mut self, code: u16, err: impl Into<anyhow::Error>) -> &mut Error {
        self.abort_with_status(code);
        self.error(err)
    }

    /// The chain this request is running.
    #[must_use]
    pub fn handlers(&self) -> &[HandlerFunc] {
        self.handlers.as_deref().unwrap_or_default()
    }

    /// Name of the route's final stage, usually the endpoint handler.
    #[must_use]
    pub fn handler_name(&self) -> &'static str {
        self.handlers().last().map_or("", |h| h.name())
    }

    // ------------------------------------------------------------------
    // Routing results
    // ------------------------------------------------------------------

    /// The matched route pattern, e.g. `/users/:id`. Empty when no route matched.
    #[must_use]
    pub fn full_path(&self) -> &str {
        self.full_path.as_deref().unwrap_or_default()
    }

    /// Value of path parameter `name`, or `""`.
    #[must_use]
    pub fn param(&self, name: &str) -> &str {
        self.get_param(name).unwrap_or_default()
    }

    #[must_use]
    pub fn get_param(&self, name: &str) -> Option<&str> {
        self.params.get(&self.path, name)
    }

    /// Path parameters as `(name, value)` pairs, in pattern order.
    pub fn params(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter(&self.path)
    }

    // ------------------------------------------------------------------
    // Per-request key/value store
    // ------------------------------------------------------------------

    /// Store `value` under `key`, replacing any previous value.
    pub fn set<V>(&mut self, key: impl Into<Cow<'static, str>>, value: V)
    where
        V: Any + Send + Sync,
    {
        let key = key.into();
        let value: KeyValue = Arc::new(value);
        match self.keys.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.keys.push((key, value)),
        }
    }

    /// Typed read of `key`. `None` when absent or of another type.
    #[must_use]
    pub fn get<V: Any>(&self, key: &str) -> Option<&V> {
        self.get_value(key)?.as_ref().downcast_ref::<V>()
    }

    #[must_use]
    pub fn get_value(&self, key: &str) -> Option<&KeyValue> {
        self.keys
            .iter()
            .find(|(k, _)| k.as_ref() == key)
            .map(|(_, v)| v)
    }

    /// Typed read that panics when `key` is missing or of another type.
    ///
    /// # Panics
    ///
    /// Panics if no value of type `V` is stored under `key`.
    #[must_use]
    pub fn must_get<V: Any>(&self, key: &str) -> &V {
        match self.get::<V>(key) {
            Some(v) => v,
            None => panic!("Key \"{key}\" does not exist"),
        }
    }

    /// `String` or `&'static str` value.
    #[must_use]
    pub fn get_string(&self, key: &str) -> Option<&str> {
        let value = self.get_value(key)?.as_ref();
        value
            .downcast_ref::<String>()
            .map(String::as_str)
            .or_else(|| value.downcast_ref::<&'static str>().copied())
    }

    #[must_use]
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get::<bool>(key).copied()
    }

    /// `i64` or `i32` value.
    #[must_use]
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        let value = self.get_value(key)?.as_ref();
        value
            .downcast_ref::<i64>()
            .copied()
            .or_else(|| value.downcast_ref::<i32>().map(|v| i64::from(*v)))
    }

    /// `u64` or `usize` value.
    #[must_use]
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        let value = self.get_value(key)?.as_ref();
        value
            .downcast_ref::<u64>()
            .copied()
            .or_else(|| value.downcast_ref::<usize>().and_then(|v| u64::try_from(*v).ok()))
    }

    #[must_use]
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get::<f64>(key).copied()
    }

    #[must_use]
    pub fn get_string_slice(&self, key: &str) -> Option<&[String]> {
        self.get::<Vec<String>>(key).map(Vec::as_slice)
    }

    /// Keys currently stored, in insertion order.
    pub fn key_names(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(|(k, _)| k.as_ref())
    }

    // ------------------------------------------------------------------
    // Errors
    // ------------------------------------------------------------------

    /// Record an error; it defaults to [`ErrorType::PRIVATE`].
    pub fn error(&mut self, err: impl Into<anyhow::Error>) -> &mut Error {
        self.errors.push(Error::new(err, ErrorType::PRIVATE))
    }

    #[must_use]
    pub fn errors(&self) -> &ErrorMsgs {
        &self.errors
    }

    // ------------------------------------------------------------------
    // Response writer
    // ------------------------------------------------------------------

    #[must_use]
    pub fn writer(&self) -> &ResponseWriter {
        &self.writer
    }

    pub fn writer_mut(&mut self) -> &mut ResponseWriter {
        &mut self.writer
    }

    // ------------------------------------------------------------------
    // Cancellation
    // ------------------------------------------------------------------

    #[must_use]
    pub fn cancellation(&self) -> Option<&Cancellation> {
        self.request.extensions().get::<Cancellation>()
    }

    /// Whether the client went away or the request deadline passed.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation().is_some_and(Cancellation::is_cancelled)
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.cancellation().and_then(Cancellation::deadline)
    }

    /// Detached copy of the request data, safe to move to another task.
    ///
    /// The snapshot carries the request, path parameters, matched pattern,
    /// keys and cancellation signal. It cannot write a response.
    #[must_use]
    pub fn copy(&self) -> ContextSnapshot {
        ContextSnapshot::capture(
            &self.request,
            &self.path,
            self.params.to_owned_pairs(&self.path),
            self.full_path.clone(),
            self.keys.clone(),
        )
    }
}
