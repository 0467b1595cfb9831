//! Response writer wrapper.
//!
//! [`ResponseWriter`] sits between stages and whatever actually ships bytes
//! (the coroutine server's connection, a test recorder). It defers the status
//! line and headers until the first body write, an explicit
//! [`ResponseWriter::write_header_now`] or the end of the chain, so stages can
//! keep adjusting them until then.

use http::{HeaderMap, StatusCode};
use std::io::{self, Read, Write};
use tracing::warn;

use super::Request;

/// A raw connection taken over from the server.
pub trait Connection: Read + Write + Send {}

impl<T: Read + Write + Send> Connection for T {}

/// The capability set an output sink offers the writer.
///
/// Only head and body writes are mandatory. Optional capabilities default to
/// [`io::ErrorKind::Unsupported`] so callers can probe for them at runtime.
pub trait RawResponse: Send {
    /// Commit the status line and headers.
    fn write_head(&mut self, status: StatusCode, headers: &HeaderMap) -> io::Result<()>;

    fn write_body(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Called before the chain runs.
    fn begin(&mut self, _request: &Request) {}

    /// Called after the chain finished and the head is committed.
    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Whether the underlying connection can serve another request.
    fn keep_alive(&self) -> bool {
        false
    }

    fn flush(&mut self) -> io::Result<()> {
        Err(unsupported("flush"))
    }

    fn hijack(&mut self) -> io::Result<Box<dyn Connection>> {
        Err(unsupported("hijack"))
    }

    /// Server push of `target`.
    fn push(&mut self, _target: &str) -> io::Result<()> {
        Err(unsupported("push"))
    }
}

pub type BoxedRawResponse = Box<dyn RawResponse>;

fn unsupported(what: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        format!("response sink does not support {what}"),
    )
}

/// Stand-in sink for a pooled context between requests.
struct Detached;

impl RawResponse for Detached {
    fn write_head(&mut self, _status: StatusCode, _headers: &HeaderMap) -> io::Result<()> {
        Err(io::Error::from(io::ErrorKind::NotConnected))
    }

    fn write_body(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::from(io::ErrorKind::NotConnected))
    }
}

/// Status and header buffering over a [`RawResponse`].
pub struct ResponseWriter {
    raw: BoxedRawResponse,
    headers: HeaderMap,
    status: u16,
    /// `None` until the head is committed.
    size: Option<usize>,
}

impl std::fmt::Debug for ResponseWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseWriter")
            .field("status", &self.status)
            .field("size", &self.size)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl ResponseWriter {
    pub(crate) fn new() -> Self {
        Self {
            raw: Box::new(Detached),
            headers: HeaderMap::new(),
            status: 200,
            size: None,
        }
    }

    pub(crate) fn reset(&mut self, raw: BoxedRawResponse) {
        self.raw = raw;
        self.headers.clear();
        self.status = 200;
        self.size = None;
    }

    /// Hand the sink back, leaving the writer detached.
    pub(crate) fn detach(&mut self) -> BoxedRawResponse {
        std::mem::replace(&mut self.raw, Box::new(Detached))
    }

    pub(crate) fn begin(&mut self, request: &Request) {
        self.raw.begin(request);
    }

    /// Commit the head if nothing did so yet, then let the sink finish.
    pub(crate) fn finish(&mut self) -> io::Result<()> {
        self.write_header_now()?;
        self.raw.finish()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Headers are only sent if modified before the head is committed.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Status that is (or will be) sent.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Body bytes written so far.
    pub fn size(&self) -> usize {
        self.size.unwrap_or(0)
    }

    /// Whether the head has been committed.
    pub fn written(&self) -> bool {
        self.size.is_some()
    }

    /// Set the pending status. Ignored once the head is committed.
    pub fn write_header(&mut self, code: u16) {
        if code == self.status {
            return;
        }
        if self.written() {
            warn!(
                current = self.status,
                wanted = code,
                "Headers were already written, ignoring status override"
            );
            return;
        }
        if StatusCode::from_u16(code).is_err() {
            warn!(code, "Ignoring invalid status code");
            return;
        }
        self.status = code;
    }

    /// Commit the head now.
    pub fn write_header_now(&mut self) -> io::Result<()> {
        if self.written() {
            return Ok(());
        }
        self.size = Some(0);
        let status =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        self.raw.write_head(status, &self.headers)
    }

    pub fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_header_now()?;
        let n = self.raw.write_body(buf)?;
        self.size = Some(self.size() + n);
        Ok(n)
    }

    pub fn write_str(&mut self, s: &str) -> io::Result<usize> {
        self.write(s.as_bytes())
    }

    /// Commit the head and push buffered bytes to the client.
    pub fn flush(&mut self) -> io::Result<()> {
        self.write_header_now()?;
        self.raw.flush()
    }

    /// Take over the connection. The framework writes nothing further.
    pub fn hijack(&mut self) -> io::Result<Box<dyn Connection>> {
        if self.size.is_none() {
            self.size = Some(0);
        }
        self.raw.hijack()
    }

    pub fn push(&mut self, target: &str) -> io::Result<()> {
        self.raw.push(target)
    }
}

impl Write for ResponseWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        ResponseWriter::write(self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        ResponseWriter::flush(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ResponseRecorder;

    #[test]
    fn test_head_is_deferred_until_first_write() {
        let recorder = ResponseRecorder::new();
        let mut w = ResponseWriter::new();
        w.reset(Box::new(recorder.clone()));

        w.write_header(201);
        w.headers_mut()
            .insert("x-late", http::HeaderValue::from_static("yes"));
        assert!(!w.written());
        assert!(!recorder.head_written());

        w.write(b"abc").unwrap();
        assert!(w.written());
        assert_eq!(w.size(), 3);
        assert_eq!(recorder.status(), 201);
        assert_eq!(recorder.header("x-late").as_deref(), Some("yes"));
    }

    #[test]
    fn test_status_cannot_change_after_commit() {
        let recorder = ResponseRecorder::new();
        let mut w = ResponseWriter::new();
        w.reset(Box::new(recorder.clone()));

        w.write_header_now().unwrap();
        w.write_header(404);
        assert_eq!(w.status(), 200);
        assert_eq!(recorder.status(), 200);
    }

    #[test]
    fn test_invalid_status_ignored() {
        let mut w = ResponseWriter::new();
        w.write_header(42);
        assert_eq!(w.status(), 200);
    }

    #[test]
    fn test_detached_writer_reports_not_connected() {
        let mut w = ResponseWriter::new();
        let err = w.write(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
        assert!(w.hijack().is_err());
    }
}
