//! # Engine
//!
//! The [`Engine`] owns one [`RouteTree`](crate::router::RouteTree) per HTTP
//! method, the global stages, the NoRoute/NoMethod chains and the context
//! pool.
//!
//! ## Chain composition
//!
//! Chains are resolved when a route is registered:
//!
//! ```text
//! engine globals  ++  outer group stages  ++  inner group stages  ++  route stages
//! ```
//!
//! Globals are read at registration time, so call
//! [`Engine::add_middleware`] before registering routes. The combined chain
//! is stored once as an `Arc<[HandlerFunc]>`; dispatch only clones the `Arc`.
//!
//! ## Dispatch
//!
//! 1. Look up the path in the request method's tree.
//! 2. On a miss, redirect for a trailing slash or (when enabled) a cleaned,
//!    case-corrected path: 301 for GET, 308 otherwise.
//! 3. Otherwise, if other methods match the path, answer 405 with `Allow`.
//! 4. Otherwise run the NoRoute chain with a pending 404.

pub(crate) mod config;
mod core;
mod group;
mod pool;

pub use config::{EngineConfig, ProxyParseError, TrustedProxy};
pub use core::{Engine, PoolStats, RouteInfo};
pub use group::{RouterGroup, Routing, ANY_METHODS};
