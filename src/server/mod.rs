//! # HTTP Server
//!
//! A small HTTP/1.1 front end for an [`Engine`](crate::Engine), built on may
//! coroutines. It parses request heads with `httparse`, buffers bodies
//! (`Content-Length` or chunked), keeps connections alive, and attaches a
//! [`Cancellation`](crate::context::Cancellation) and
//! [`RemoteAddr`](crate::context::RemoteAddr) to every request.
//!
//! ```rust,no_run
//! use brrtframe::server::{HttpServer, ServerConfig};
//! use brrtframe::{handlers, Context, Engine, Routing};
//!
//! let mut engine = Engine::new();
//! engine.get("/ping", handlers![|c: &mut Context| c.string(200, "pong")]);
//!
//! let handle = HttpServer::new(engine.into_shared(), ServerConfig::from_env())
//!     .start()
//!     .unwrap();
//! handle.join().unwrap();
//! ```

mod config;
mod http_server;
mod request;
mod response;

pub use config::ServerConfig;
pub use http_server::{HttpServer, ServerHandle};
pub use request::{ReadError, RequestReader, MAX_HEADERS};
pub use response::ConnWriter;
