//! # Middleware
//!
//! A stage is anything implementing [`Middleware`]; closures taking
//! `&mut Context` qualify. Stages are wrapped in a [`HandlerFunc`] and
//! registered as a `Vec<HandlerFunc>` (the [`handlers!`](crate::handlers)
//! macro builds one), then frozen into a shared [`HandlersChain`] per route.
//!
//! ## Built-in stages
//!
//! | Stage | Purpose |
//! |---|---|
//! | [`Logger`] | One structured `info` event per request |
//! | [`Recovery`] | Converts panics in later stages into a 500 |
//! | [`BasicAuth`] | HTTP Basic credentials check |
//! | [`RequestIdMiddleware`] | ULID request ids in `X-Request-Id` |
//! | [`MetricsMiddleware`] | Atomic counters with Prometheus output |

mod basic_auth;
mod core;
mod logger;
mod metrics;
mod recovery;
mod request_id;

pub use basic_auth::{BasicAuth, AUTH_USER_KEY};
pub use core::{handler, HandlerFunc, HandlersChain, Middleware};
pub(crate) use core::stage_names;
pub use logger::Logger;
pub use metrics::MetricsMiddleware;
pub(crate) use recovery::panic_message;
pub use recovery::{Recovery, RecoveryHandler};
pub use request_id::{RequestIdMiddleware, REQUEST_ID_HEADER, REQUEST_ID_KEY};
