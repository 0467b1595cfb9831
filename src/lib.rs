//! # brrtframe
//!
//! **brrtframe** is a small, coroutine-powered HTTP framework: a compressed
//! radix-tree router per HTTP method, composable middleware chains, and
//! pooled request contexts, served over HTTP/1.1 by a `may` based server.
//!
//! ## Architecture
//!
//! - **[`router`]** - Generic radix tree with `:param` and `*catchall`
//!   segments, trailing-slash hints and case-insensitive lookup
//! - **[`middleware`]** - The [`Middleware`] stage trait and built-in stages
//!   (logging, panic recovery, basic auth, request ids, metrics)
//! - **[`context`]** - Per-request [`Context`]: chain control, parameters,
//!   key/value store, errors, request accessors and response rendering
//! - **[`engine`]** - [`Engine`] and route groups: registration, dispatch,
//!   redirects, 404/405 handling and the context pool
//! - **[`server`]** - HTTP/1.1 server on may coroutines
//! - **[`testing`]** - In-memory recorder for exercising an engine without
//!   sockets
//! - **[`logging`]** - `tracing-subscriber` setup
//!
//! ### Request Handling Flow
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Client
//!     participant Server as HttpServer<br/>(may coroutine)
//!     participant Engine
//!     participant Pool as Context Pool
//!     participant Tree as Route Tree<br/>(per method)
//!     participant Chain as Handler Chain
//!
//!     Client->>Server: GET /users/42
//!     Server->>Server: Parse head + body
//!     Server->>Engine: serve_http(request, writer)
//!     Engine->>Pool: acquire()
//!     Pool-->>Engine: Context
//!     Engine->>Tree: lookup("/users/42")
//!
//!     alt Match
//!         Tree-->>Engine: chain, {id: "42"}
//!         Engine->>Chain: next()
//!         Chain->>Chain: Logger → Recovery → handler
//!     else Trailing slash / fixed path
//!         Engine-->>Client: 301 / 308 redirect
//!     else Other methods match
//!         Engine->>Chain: NoMethod chain (405 + Allow)
//!     else No route
//!         Engine->>Chain: NoRoute chain (404)
//!     end
//!
//!     Engine->>Engine: commit status + headers
//!     Engine->>Pool: release(Context)
//!     Server-->>Client: HTTP response
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use brrtframe::middleware::{Logger, Recovery};
//! use brrtframe::testing::perform_request;
//! use brrtframe::{handlers, Context, Engine, Routing};
//! use http::Method;
//!
//! let mut engine = Engine::new();
//! engine.add_middleware(handlers![Logger::new(), Recovery::new()]);
//! engine.get("/hello/:name", handlers![|c: &mut Context| {
//!     let greeting = format!("hello {}", c.param("name"));
//!     c.string(200, greeting);
//! }]);
//!
//! let response = perform_request(&engine, Method::GET, "/hello/world");
//! assert_eq!(response.status(), 200);
//! assert_eq!(response.body_string(), "hello world");
//! ```

pub mod context;
pub mod engine;
pub mod ids;
pub mod logging;
pub mod middleware;
pub mod router;
pub mod server;
pub mod testing;

pub use context::{Context, ContextSnapshot, Request};
pub use engine::{Engine, EngineConfig, RouteInfo, RouterGroup, Routing};
pub use middleware::{handler, HandlerFunc, HandlersChain, Middleware};
