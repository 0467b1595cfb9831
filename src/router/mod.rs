//! # Router Module
//!
//! Path matching for the engine: one compressed radix tree per HTTP method,
//! plus the capture buffer that carries path parameters into the request
//! context.
//!
//! ## Overview
//!
//! The router is responsible for:
//! - Storing route patterns (`/users/:id`, `/files/*path`) with their handler chains
//! - Matching request paths with the static > param > catch-all precedence
//! - Recording path parameters without allocating
//! - Recommending trailing-slash and case-fixing redirects on a miss
//!
//! ## Example
//!
//! ```rust
//! use brrtframe::router::{Params, RouteTree};
//!
//! let mut tree = RouteTree::new();
//! tree.insert("/files/*path", 1).unwrap();
//!
//! let mut params = Params::new();
//! assert!(tree.lookup("/files/a/b", &mut params).is_found());
//! assert_eq!(params.get("/files/a/b", "path"), Some("/a/b"));
//! ```

mod core;
mod path;
mod radix;

pub use core::{InsertError, Match, Param, Params, MAX_INLINE_PARAMS};
pub use path::clean_path;
pub use radix::RouteTree;
