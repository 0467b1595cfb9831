//! # Request Context
//!
//! A [`Context`] carries one request through its handler chain: the request
//! itself, the response writer, path parameters, a key/value store shared by
//! the chain's stages, and the list of errors they recorded.
//!
//! ## Chain execution
//!
//! ```text
//! logger ──next()──▶ auth ──next()──▶ handler
//!    ◀── returns ────    ◀── returns ──
//! ```
//!
//! Code after `next()` runs once downstream stages have finished, so a stage
//! wraps everything after it. `abort()` stops stages that have not started
//! yet while letting the current one (and code after `next()` upstream)
//! continue.
//!
//! ## Lifetime
//!
//! Contexts are recycled by the engine. Nothing borrowed from a context may
//! outlive the stage that received it; [`Context::copy`] produces an owned
//! [`ContextSnapshot`] for background work.

mod cancel;
mod core;
mod errors;
mod input;
mod render;
mod snapshot;
mod writer;

/// Request type the framework dispatches: the body is fully buffered.
pub type Request = http::Request<Vec<u8>>;

pub use cancel::Cancellation;
pub use core::{Context, KeyValue, ABORT_INDEX};
pub use errors::{Error, ErrorMsgs, ErrorType};
pub use input::RemoteAddr;
pub use render::{Cookie, SameSite, MIME_HTML, MIME_JSON, MIME_PLAIN, MIME_YAML};
pub use snapshot::ContextSnapshot;
pub use writer::{BoxedRawResponse, Connection, RawResponse, ResponseWriter};
