use std::fmt;
use std::sync::Arc;

use http::Method;
use tracing::{debug, info};

use super::group::{join_paths, RouterGroup, Routing};
use super::pool::ContextPool;
use super::EngineConfig;
use crate::context::{BoxedRawResponse, Context, Request, ABORT_INDEX};
use crate::middleware::{stage_names, HandlerFunc, HandlersChain};
use crate::router::{clean_path, InsertError, Match, RouteTree};

/// A registered route, as listed by [`Engine::routes`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteInfo {
    pub method: Method,
    pub path: String,
    /// Name of the final stage.
    pub handler: &'static str,
    pub handler_count: usize,
}

/// Snapshot of the context pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub idle: usize,
    pub created: usize,
}

/// The framework entry point: route tables, global stages and the context
/// pool.
///
/// Register everything first, then hand the engine to a server (or call
/// [`Engine::serve_http`] directly). Registration needs `&mut self`, serving
/// only `&self`, so a shared `Arc<Engine>` cannot be modified while serving.
pub struct Engine {
    trees: Vec<(Method, RouteTree<HandlersChain>)>,
    global: Vec<HandlerFunc>,
    no_route: Vec<HandlerFunc>,
    no_method: Vec<HandlerFunc>,
    all_no_route: HandlersChain,
    all_no_method: HandlersChain,
    config: Arc<EngineConfig>,
    pool: ContextPool,
    max_params: usize,
    routes: Vec<RouteInfo>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("routes", &self.routes.len())
            .field("global_stages", &self.global.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    #[must_use]
    pub fn with_config(config: EngineConfig) -> Self {
        let pool = ContextPool::new(config.pool_capacity);
        let max_params = config.max_params_hint;
        Self {
            trees: Vec::new(),
            global: Vec::new(),
            no_route: Vec::new(),
            no_method: Vec::new(),
            all_no_route: Arc::from(Vec::new()),
            all_no_method: Arc::from(Vec::new()),
            config: Arc::new(config),
            pool,
            max_params,
            routes: Vec::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Append global stages. They run first for every route registered
    /// afterwards and for the not-found and method-not-allowed chains.
    pub fn add_middleware(&mut self, stages: Vec<HandlerFunc>) -> &mut Self {
        self.global.extend(stages);
        self.rebuild_fallbacks();
        self
    }

    /// Stages for requests that match no route.
    pub fn no_route(&mut self, stages: Vec<HandlerFunc>) -> &mut Self {
        self.no_route = stages;
        self.rebuild_fallbacks();
        self
    }

    /// Stages for requests whose path matches under other methods only.
    pub fn no_method(&mut self, stages: Vec<HandlerFunc>) -> &mut Self {
        self.no_method = stages;
        self.rebuild_fallbacks();
        self
    }

    fn rebuild_fallbacks(&mut self) {
        self.all_no_route = self.combine(&[], self.no_route.iter().map(Arc::clone).collect());
        self.all_no_method = self.combine(&[], self.no_method.iter().map(Arc::clone).collect());
    }

    /// Start a route group under `prefix`.
    pub fn group(&mut self, prefix: &str, stages: Vec<HandlerFunc>) -> RouterGroup<'_> {
        let base_path = join_paths("/", prefix);
        RouterGroup::new(self, base_path, stages)
    }

    /// Every registered route, grouped by method in registration order.
    #[must_use]
    pub fn routes(&self) -> &[RouteInfo] {
        &self.routes
    }

    #[must_use]
    pub fn pool_stats(&self) -> PoolStats {
        PoolStats {
            idle: self.pool.idle(),
            created: self.pool.created(),
        }
    }

    /// Log the route table at `info`.
    pub fn log_routes(&self) {
        for route in &self.routes {
            info!(
                method = %route.method,
                path = %route.path,
                handler = route.handler,
                handlers = route.handler_count,
                "Route"
            );
        }
        info!(routes = self.routes.len(), "Route table ready");
    }

    /// Globals ++ inherited ++ stages, frozen into a shared chain.
    fn combine(&self, inherited: &[HandlerFunc], stages: Vec<HandlerFunc>) -> HandlersChain {
        let mut chain = Vec::with_capacity(self.global.len() + inherited.len() + stages.len());
        chain.extend(self.global.iter().map(Arc::clone));
        chain.extend(inherited.iter().map(Arc::clone));
        chain.extend(stages);
        Arc::from(chain)
    }

    pub(crate) fn register_chain(
        &mut self,
        base_path: &str,
        inherited: &[HandlerFunc],
        methods: &[Method],
        relative_path: &str,
        stages: Vec<HandlerFunc>,
    ) -> Result<(), InsertError> {
        let path = join_paths(base_path, relative_path);
        let chain = self.combine(inherited, stages);
        for method in methods {
            self.add_route(method, &path, Arc::clone(&chain))?;
        }
        Ok(())
    }

    fn add_route(
        &mut self,
        method: &Method,
        path: &str,
        chain: HandlersChain,
    ) -> Result<(), InsertError> {
        let max = usize::try_from(ABORT_INDEX - 1).unwrap_or(usize::MAX);
        if chain.is_empty() {
            return Err(InsertError::EmptyChain {
                pattern: path.to_owned(),
            });
        }
        if chain.len() > max {
            return Err(InsertError::TooManyHandlers {
                pattern: path.to_owned(),
                count: chain.len(),
                max,
            });
        }

        let index = match self.trees.iter().position(|(m, _)| m == method) {
            Some(i) => i,
            None => {
                self.trees.push((method.clone(), RouteTree::new()));
                self.trees.len() - 1
            }
        };
        let tree = &mut self.trees[index].1;
        let handler_count = chain.len();
        let handler = chain.last().map_or("", |h| h.name());
        let stages = stage_names(&chain);
        tree.insert(path, chain)?;
        self.max_params = self.max_params.max(tree.max_params());

        debug!(method = %method, path = %path, stages = ?stages, "Route registered");
        let at = self
            .routes
            .iter()
            .rposition(|r| r.method == *method)
            .map_or(self.routes.len(), |i| i + 1);
        self.routes.insert(
            at,
            RouteInfo {
                method: method.clone(),
                path: path.to_owned(),
                handler,
                handler_count,
            },
        );
        Ok(())
    }

    fn tree(&self, method: &Method) -> Option<&RouteTree<HandlersChain>> {
        self.trees
            .iter()
            .find(|(m, _)| m == method)
            .map(|(_, tree)| tree)
    }

    /// Serve one request.
    ///
    /// Acquires a pooled context, runs the matching chain (or a fallback),
    /// commits the status if no stage did, and hands the response sink back
    /// for reuse by the caller.
    pub fn serve_http(&self, request: Request, raw: BoxedRawResponse) -> BoxedRawResponse {
        let mut c = self.pool.acquire(&self.config, self.max_params);
        c.reset(request, raw);

        self.handle_request(&mut c);

        if let Err(e) = c.writer.finish() {
            debug!(error = %e, path = %c.path, "Failed to complete response");
        }
        let raw = c.release();
        self.pool.release(c);
        raw
    }

    fn handle_request(&self, c: &mut Context) {
        if let Some(tree) = self.tree(c.request.method()) {
            match tree.lookup(&c.path, &mut c.params) {
                Match::Found { value, pattern } => {
                    c.handlers = Some(Arc::clone(value));
                    c.full_path = Some(Arc::clone(pattern));
                    c.next();
                    return;
                }
                Match::NotFound { tsr } => {
                    c.params.clear();
                    if *c.request.method() != Method::CONNECT && c.path != "/" {
                        if tsr && self.config.redirect_trailing_slash {
                            redirect_trailing_slash(c);
                            return;
                        }
                        if self.config.redirect_fixed_path
                            && redirect_fixed_path(c, tree, self.config.redirect_trailing_slash)
                        {
                            return;
                        }
                    }
                }
            }
        }

        if self.config.handle_method_not_allowed {
            let mut allowed = String::new();
            for (method, tree) in &self.trees {
                if method == c.request.method() {
                    continue;
                }
                let found = tree.lookup(&c.path, &mut c.params).is_found();
                c.params.clear();
                if found {
                    if !allowed.is_empty() {
                        allowed.push_str(", ");
                    }
                    allowed.push_str(method.as_str());
                }
            }
            if !allowed.is_empty() {
                c.handlers = Some(Arc::clone(&self.all_no_method));
                c.header("Allow", &allowed);
                serve_error(c, 405);
                return;
            }
        }

        c.handlers = Some(Arc::clone(&self.all_no_route));
        serve_error(c, 404);
    }

    /// Own the engine behind an `Arc` for a server.
    #[must_use]
    pub fn into_shared(self) -> Arc<Engine> {
        Arc::new(self)
    }
}

impl Routing for Engine {
    fn register(
        &mut self,
        methods: &[Method],
        relative_path: &str,
        stages: Vec<HandlerFunc>,
    ) -> Result<(), InsertError> {
        self.register_chain("/", &[], methods, relative_path, stages)
    }
}

/// Run a fallback chain with `code` pending. Stages may override the status.
fn serve_error(c: &mut Context, code: u16) {
    c.status(code);
    c.next();
}

fn redirect_trailing_slash(c: &mut Context) {
    let uri = c.request.uri();
    let path = uri.path();
    let mut target = String::with_capacity(path.len() + 16);

    if let Some(prefix) = c.get_header("X-Forwarded-Prefix") {
        let prefix = clean_path(prefix);
        target.push_str(prefix.trim_end_matches('/'));
    }
    match path.strip_suffix('/') {
        Some(stripped) if !stripped.is_empty() => target.push_str(stripped),
        _ => {
            target.push_str(path);
            target.push('/');
        }
    }
    if let Some(query) = uri.query() {
        target.push('?');
        target.push_str(query);
    }
    redirect_request(c, &target);
}

fn redirect_fixed_path(c: &mut Context, tree: &RouteTree<HandlersChain>, fix_slash: bool) -> bool {
    let cleaned = clean_path(c.request.uri().path());
    let Some(mut target) = tree.find_case_insensitive(&cleaned, fix_slash) else {
        return false;
    };
    if let Some(query) = c.request.uri().query() {
        target.push('?');
        target.push_str(query);
    }
    redirect_request(c, &target);
    true
}

fn redirect_request(c: &mut Context, location: &str) {
    let code = if *c.request.method() == Method::GET { 301 } else { 308 };
    debug!(from = %c.request.uri(), to = %location, code, "Redirecting request");
    c.redirect(code, location);
}
