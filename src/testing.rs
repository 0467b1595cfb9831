//! In-memory harness for driving an [`Engine`] or a single [`Context`]
//! without a socket.
//!
//! [`ResponseRecorder`] is a [`RawResponse`] that keeps everything written to
//! it. Clones share the same recording, so keep one and hand the other to the
//! engine:
//!
//! ```rust
//! use brrtframe::testing::perform_request;
//! use brrtframe::{handlers, Context, Engine, Routing};
//! use http::Method;
//!
//! let mut engine = Engine::new();
//! engine.get("/ping", handlers![|c: &mut Context| {
//!     c.json(200, &serde_json::json!({"message": "pong"}))
//! }]);
//!
//! let rec = perform_request(&engine, Method::GET, "/ping");
//! assert_eq!(rec.status(), 200);
//! assert_eq!(rec.body_string(), r#"{"message":"pong"}"#);
//! ```

use std::io;
use std::sync::Arc;

use http::{HeaderMap, Method, StatusCode};
use parking_lot::Mutex;

use crate::context::{Context, RawResponse, Request};
use crate::engine::Engine;

#[derive(Debug, Default)]
struct Recording {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: Vec<u8>,
    flushes: usize,
    finished: bool,
}

/// Records the status, headers and body a chain produced.
#[derive(Debug, Clone, Default)]
pub struct ResponseRecorder {
    inner: Arc<Mutex<Recording>>,
}

impl ResponseRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed status; 200 if the head was never written.
    #[must_use]
    pub fn status(&self) -> u16 {
        self.inner.lock().status.map_or(200, |s| s.as_u16())
    }

    /// First value of header `name`, if present and valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<String> {
        self.inner
            .lock()
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    }

    /// Every value of header `name`, in order.
    #[must_use]
    pub fn header_all(&self, name: &str) -> Vec<String> {
        self.inner
            .lock()
            .headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_owned)
            .collect()
    }

    #[must_use]
    pub fn headers(&self) -> HeaderMap {
        self.inner.lock().headers.clone()
    }

    #[must_use]
    pub fn body(&self) -> Vec<u8> {
        self.inner.lock().body.clone()
    }

    #[must_use]
    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.inner.lock().body).into_owned()
    }

    /// Parse the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns the parse error when the body is not valid JSON.
    pub fn body_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_slice(&self.inner.lock().body)
    }

    #[must_use]
    pub fn flushes(&self) -> usize {
        self.inner.lock().flushes
    }

    #[must_use]
    pub fn head_written(&self) -> bool {
        self.inner.lock().status.is_some()
    }

    /// Whether the engine reported the response complete.
    #[must_use]
    pub fn finished(&self) -> bool {
        self.inner.lock().finished
    }
}

impl RawResponse for ResponseRecorder {
    fn write_head(&mut self, status: StatusCode, headers: &HeaderMap) -> io::Result<()> {
        let mut rec = self.inner.lock();
        rec.status = Some(status);
        rec.headers = headers.clone();
        Ok(())
    }

    fn write_body(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.lock().body.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn finish(&mut self) -> io::Result<()> {
        self.inner.lock().finished = true;
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().flushes += 1;
        Ok(())
    }
}

/// A bodiless request for `method` and `uri`.
///
/// # Panics
///
/// Panics if `uri` is not a valid request target.
#[must_use]
#[track_caller]
pub fn request(method: Method, uri: &str) -> Request {
    match http::Request::builder().method(method).uri(uri).body(Vec::new()) {
        Ok(request) => request,
        Err(e) => panic!("invalid test request {uri}: {e}"),
    }
}

/// A detached context ready to run helpers against `method` and `uri`.
#[must_use]
#[track_caller]
pub fn test_context(method: Method, uri: &str) -> (Context, ResponseRecorder) {
    test_context_with(request(method, uri))
}

/// A detached context wrapping `request`, writing into a fresh recorder.
#[must_use]
pub fn test_context_with(request: Request) -> (Context, ResponseRecorder) {
    let recorder = ResponseRecorder::new();
    let mut c = Context::detached();
    c.reset(request, Box::new(recorder.clone()));
    (c, recorder)
}

/// Dispatch `method uri` through `engine`.
#[must_use]
#[track_caller]
pub fn perform_request(engine: &Engine, method: Method, uri: &str) -> ResponseRecorder {
    perform(engine, request(method, uri))
}

/// Dispatch `request` through `engine`.
#[must_use]
pub fn perform(engine: &Engine, request: Request) -> ResponseRecorder {
    let recorder = ResponseRecorder::new();
    let _raw = engine.serve_http(request, Box::new(recorder.clone()));
    recorder
}
