use std::sync::Arc;

use http::Method;

use super::core::Engine;
use crate::middleware::HandlerFunc;
use crate::router::{clean_path, InsertError};

/// Methods an `any` registration covers.
pub const ANY_METHODS: [Method; 9] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::HEAD,
    Method::OPTIONS,
    Method::DELETE,
    Method::CONNECT,
    Method::TRACE,
];

/// Route registration shared by [`Engine`] and [`RouterGroup`].
///
/// Only [`Routing::register`] is required; the per-method helpers build on
/// it. The panicking helpers treat conflicts as startup bugs, `try_handle`
/// reports them instead.
pub trait Routing {
    /// Register `stages` for every method in `methods` under `relative_path`.
    ///
    /// # Errors
    ///
    /// Returns the first [`InsertError`] hit; earlier methods stay registered.
    fn register(
        &mut self,
        methods: &[Method],
        relative_path: &str,
        stages: Vec<HandlerFunc>,
    ) -> Result<(), InsertError>;

    /// Register a route, reporting conflicts.
    ///
    /// # Errors
    ///
    /// See [`Routing::register`].
    fn try_handle(
        &mut self,
        method: Method,
        relative_path: &str,
        stages: Vec<HandlerFunc>,
    ) -> Result<&mut Self, InsertError>
    where
        Self: Sized,
    {
        self.register(&[method], relative_path, stages)?;
        Ok(self)
    }

    /// Register a route.
    ///
    /// # Panics
    ///
    /// Panics if the pattern is malformed or conflicts with an existing route.
    #[track_caller]
    fn handle(&mut self, method: Method, relative_path: &str, stages: Vec<HandlerFunc>) -> &mut Self
    where
        Self: Sized,
    {
        if let Err(e) = self.register(&[method], relative_path, stages) {
            panic!("{e}");
        }
        self
    }

    #[track_caller]
    fn get(&mut self, relative_path: &str, stages: Vec<HandlerFunc>) -> &mut Self
    where
        Self: Sized,
    {
        self.handle(Method::GET, relative_path, stages)
    }

    #[track_caller]
    fn post(&mut self, relative_path: &str, stages: Vec<HandlerFunc>) -> &mut Self
    where
        Self: Sized,
    {
        self.handle(Method::POST, relative_path, stages)
    }

    #[track_caller]
    fn put(&mut self, relative_path: &str, stages: Vec<HandlerFunc>) -> &mut Self
    where
        Self: Sized,
    {
        self.handle(Method::PUT, relative_path, stages)
    }

    #[track_caller]
    fn delete(&mut self, relative_path: &str, stages: Vec<HandlerFunc>) -> &mut Self
    where
        Self: Sized,
    {
        self.handle(Method::DELETE, relative_path, stages)
    }

    #[track_caller]
    fn patch(&mut self, relative_path: &str, stages: Vec<HandlerFunc>) -> &mut Self
    where
        Self: Sized,
    {
        self.handle(Method::PATCH, relative_path, stages)
    }

    #[track_caller]
    fn head(&mut self, relative_path: &str, stages: Vec<HandlerFunc>) -> &mut Self
    where
        Self: Sized,
    {
        self.handle(Method::HEAD, relative_path, stages)
    }

    #[track_caller]
    fn options(&mut self, relative_path: &str, stages: Vec<HandlerFunc>) -> &mut Self
    where
        Self: Sized,
    {
        self.handle(Method::OPTIONS, relative_path, stages)
    }

    /// Register the same chain for every method in [`ANY_METHODS`].
    #[track_caller]
    fn any(&mut self, relative_path: &str, stages: Vec<HandlerFunc>) -> &mut Self
    where
        Self: Sized,
    {
        self.match_methods(&ANY_METHODS, relative_path, stages)
    }

    /// Register the same chain for each of `methods`.
    #[track_caller]
    fn match_methods(
        &mut self,
        methods: &[Method],
        relative_path: &str,
        stages: Vec<HandlerFunc>,
    ) -> &mut Self
    where
        Self: Sized,
    {
        if let Err(e) = self.register(methods, relative_path, stages) {
            panic!("{e}");
        }
        self
    }
}

/// A path prefix plus inherited stages for a batch of registrations.
///
/// Groups borrow the engine mutably, so they are built, filled and dropped
/// during startup:
///
/// ```rust
/// use brrtframe::{handlers, Context, Engine, Routing};
///
/// let mut engine = Engine::new();
/// {
///     let mut v1 = engine.group("/v1", handlers![]);
///     v1.get("/users/:id", handlers![|c: &mut Context| {
///         let id = c.param("id").to_owned();
///         c.string(200, id);
///     }]);
/// }
/// assert_eq!(engine.routes()[0].path, "/v1/users/:id");
/// ```
pub struct RouterGroup<'e> {
    engine: &'e mut Engine,
    base_path: String,
    handlers: Vec<HandlerFunc>,
}

impl<'e> RouterGroup<'e> {
    pub(crate) fn new(engine: &'e mut Engine, base_path: String, handlers: Vec<HandlerFunc>) -> Self {
        Self {
            engine,
            base_path,
            handlers,
        }
    }

    #[must_use]
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Stages inherited by routes registered through this group.
    #[must_use]
    pub fn handlers(&self) -> &[HandlerFunc] {
        &self.handlers
    }

    /// Append stages for routes registered through this group from now on.
    pub fn add_middleware(&mut self, stages: Vec<HandlerFunc>) -> &mut Self {
        self.handlers.extend(stages);
        self
    }

    /// Nested group: prefixes and stages accumulate outer-to-inner.
    pub fn group(&mut self, relative_path: &str, stages: Vec<HandlerFunc>) -> RouterGroup<'_> {
        let mut handlers: Vec<HandlerFunc> = self.handlers.iter().map(Arc::clone).collect();
        handlers.extend(stages);
        RouterGroup {
            base_path: join_paths(&self.base_path, relative_path),
            engine: &mut *self.engine,
            handlers,
        }
    }
}

impl Routing for RouterGroup<'_> {
    fn register(
        &mut self,
        methods: &[Method],
        relative_path: &str,
        stages: Vec<HandlerFunc>,
    ) -> Result<(), InsertError> {
        self.engine
            .register_chain(&self.base_path, &self.handlers, methods, relative_path, stages)
    }
}

/// `absolute` joined with `relative`, cleaned, keeping a trailing slash the
/// relative part asked for.
pub(crate) fn join_paths(absolute: &str, relative: &str) -> String {
    if relative.is_empty() {
        return absolute.to_owned();
    }
    let mut joined = clean_path(&format!("{absolute}/{relative}"));
    if relative.ends_with('/') && !joined.ends_with('/') {
        joined.push('/');
    }
    joined
}
