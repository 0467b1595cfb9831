//! Connection-backed [`RawResponse`].
//!
//! Responses are buffered and written with a `Content-Length` in one go when
//! the chain finishes. The first `flush` switches the response to streaming:
//! the head goes out immediately and the body follows as chunks (HTTP/1.1) or
//! raw bytes until close (HTTP/1.0).

use std::io;

use http::header::{CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, Method, StatusCode, Version};
use tracing::debug;

use crate::context::{Cancellation, Connection, RawResponse, Request};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Buffered,
    Chunked,
    UntilClose,
}

pub struct ConnWriter<S> {
    stream: Option<S>,
    keep_alive_enabled: bool,
    head: Option<(StatusCode, HeaderMap)>,
    body: Vec<u8>,
    mode: Mode,
    version: Version,
    is_head: bool,
    /// Body bytes swallowed for a HEAD request, still reported in the length.
    head_len: usize,
    keep_alive: bool,
    cancel: Option<Cancellation>,
}

impl<S> ConnWriter<S>
where
    S: Connection + 'static,
{
    pub fn new(stream: S, keep_alive_enabled: bool) -> Self {
        Self {
            stream: Some(stream),
            keep_alive_enabled,
            head: None,
            body: Vec::new(),
            mode: Mode::Buffered,
            version: Version::HTTP_11,
            is_head: false,
            head_len: 0,
            keep_alive: false,
            cancel: None,
        }
    }

    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(io::Error::from(io::ErrorKind::NotConnected));
        };
        let result = stream.write_all(bytes).and_then(|()| stream.flush());
        if let Err(e) = &result {
            debug!(error = %e, "Client write failed");
            self.keep_alive = false;
            if let Some(cancel) = &self.cancel {
                cancel.cancel();
            }
        }
        result
    }

    fn body_allowed(&self, status: StatusCode) -> bool {
        !(status.is_informational()
            || status == StatusCode::NO_CONTENT
            || status == StatusCode::NOT_MODIFIED)
    }

    fn encode_head(&self, status: StatusCode, headers: &HeaderMap, framing: Framing) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        let version = if self.version == Version::HTTP_10 {
            "HTTP/1.0"
        } else {
            "HTTP/1.1"
        };
        out.extend_from_slice(version.as_bytes());
        out.push(b' ');
        out.extend_from_slice(status.as_str().as_bytes());
        out.push(b' ');
        out.extend_from_slice(status.canonical_reason().unwrap_or("Unknown").as_bytes());
        out.extend_from_slice(b"\r\n");

        for (name, value) in headers {
            if name == CONNECTION || name == TRANSFER_ENCODING {
                continue;
            }
            if name == CONTENT_LENGTH && !matches!(framing, Framing::UserLength) {
                continue;
            }
            out.extend_from_slice(name.as_str().as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        match framing {
            Framing::Length(n) => {
                out.extend_from_slice(format!("content-length: {n}\r\n").as_bytes());
            }
            Framing::Chunked => out.extend_from_slice(b"transfer-encoding: chunked\r\n"),
            Framing::UserLength | Framing::None => {}
        }
        if !self.keep_alive {
            out.extend_from_slice(b"connection: close\r\n");
        } else if self.version == Version::HTTP_10 {
            out.extend_from_slice(b"connection: keep-alive\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out
    }

    /// Send the head and buffered body in streaming mode.
    fn start_streaming(&mut self) -> io::Result<()> {
        let Some((status, headers)) = self.head.take() else {
            return Ok(());
        };
        let framing = if !self.body_allowed(status) {
            Framing::None
        } else if headers.contains_key(CONTENT_LENGTH) {
            Framing::UserLength
        } else if self.version == Version::HTTP_11 {
            Framing::Chunked
        } else {
            self.keep_alive = false;
            Framing::None
        };
        self.mode = if framing == Framing::Chunked {
            Mode::Chunked
        } else {
            Mode::UntilClose
        };
        let head = self.encode_head(status, &headers, framing);
        self.send(&head)?;
        let pending = std::mem::take(&mut self.body);
        self.send_body(&pending)
    }

    fn send_body(&mut self, buf: &[u8]) -> io::Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        if self.is_head {
            self.head_len += buf.len();
            return Ok(());
        }
        match self.mode {
            Mode::Buffered => {
                self.body.extend_from_slice(buf);
                Ok(())
            }
            Mode::Chunked => {
                let mut chunk = Vec::with_capacity(buf.len() + 16);
                chunk.extend_from_slice(format!("{:x}\r\n", buf.len()).as_bytes());
                chunk.extend_from_slice(buf);
                chunk.extend_from_slice(b"\r\n");
                self.send(&chunk)
            }
            Mode::UntilClose => self.send(buf),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Length(usize),
    UserLength,
    Chunked,
    None,
}

impl<S> RawResponse for ConnWriter<S>
where
    S: Connection + 'static,
{
    fn write_head(&mut self, status: StatusCode, headers: &HeaderMap) -> io::Result<()> {
        self.head = Some((status, headers.clone()));
        Ok(())
    }

    fn write_body(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.send_body(buf)?;
        Ok(buf.len())
    }

    fn begin(&mut self, request: &Request) {
        self.head = None;
        self.body.clear();
        self.head_len = 0;
        self.mode = Mode::Buffered;
        self.version = request.version();
        self.is_head = request.method() == Method::HEAD;
        self.cancel = request.extensions().get::<Cancellation>().cloned();

        let connection = request
            .headers()
            .get(CONNECTION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        let requested = if request.version() == Version::HTTP_10 {
            connection.contains("keep-alive")
        } else {
            !connection.contains("close")
        };
        self.keep_alive = self.keep_alive_enabled && self.stream.is_some() && requested;
    }

    fn finish(&mut self) -> io::Result<()> {
        match self.mode {
            Mode::Buffered => {
                let Some((status, headers)) = self.head.take() else {
                    return Ok(());
                };
                let framing = if self.body_allowed(status) {
                    Framing::Length(self.body.len() + self.head_len)
                } else {
                    Framing::None
                };
                let mut out = self.encode_head(status, &headers, framing);
                if !self.is_head && framing != Framing::None {
                    out.extend_from_slice(&self.body);
                }
                self.body.clear();
                self.send(&out)
            }
            Mode::Chunked if !self.is_head => self.send(b"0\r\n\r\n"),
            Mode::Chunked | Mode::UntilClose => Ok(()),
        }
    }

    fn keep_alive(&self) -> bool {
        self.keep_alive && self.mode != Mode::UntilClose && self.stream.is_some()
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.stream.is_none() {
            return Err(io::Error::from(io::ErrorKind::NotConnected));
        }
        if self.mode == Mode::Buffered {
            self.start_streaming()?;
        }
        Ok(())
    }

    fn hijack(&mut self) -> io::Result<Box<dyn Connection>> {
        self.head = None;
        self.body.clear();
        self.keep_alive = false;
        match self.stream.take() {
            Some(stream) => Ok(Box::new(stream)),
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection already hijacked",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::sync::Arc;

    use parking_lot::Mutex;

    #[derive(Clone, Default)]
    struct Sink(Arc<Mutex<Vec<u8>>>);

    impl Sink {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    impl Read for Sink {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }
    }

    impl Write for Sink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn request(method: Method, version: Version, connection: Option<&str>) -> Request {
        let mut builder = http::Request::builder().method(method).uri("/").version(version);
        if let Some(value) = connection {
            builder = builder.header("connection", value);
        }
        builder.body(Vec::new()).unwrap()
    }

    fn ok_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "text/plain".parse().unwrap());
        headers
    }

    #[test]
    fn test_buffered_response_gets_content_length() {
        let sink = Sink::default();
        let mut w = ConnWriter::new(sink.clone(), true);
        w.begin(&request(Method::GET, Version::HTTP_11, None));
        w.write_head(StatusCode::OK, &ok_headers()).unwrap();
        w.write_body(b"hello").unwrap();
        assert!(sink.text().is_empty());
        w.finish().unwrap();

        let text = sink.text();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("content-type: text/plain\r\n"));
        assert!(text.contains("content-length: 5\r\n"));
        assert!(text.ends_with("\r\n\r\nhello"));
        assert!(w.keep_alive());
    }

    #[test]
    fn test_flush_switches_to_chunked() {
        let sink = Sink::default();
        let mut w = ConnWriter::new(sink.clone(), true);
        w.begin(&request(Method::GET, Version::HTTP_11, None));
        w.write_head(StatusCode::OK, &ok_headers()).unwrap();
        w.write_body(b"ab").unwrap();
        w.flush().unwrap();
        w.write_body(b"cde").unwrap();
        w.finish().unwrap();

        let text = sink.text();
        assert!(text.contains("transfer-encoding: chunked\r\n"));
        assert!(!text.contains("content-length"));
        assert!(text.ends_with("\r\n\r\n2\r\nab\r\n3\r\ncde\r\n0\r\n\r\n"));
        assert!(w.keep_alive());
    }

    #[test]
    fn test_head_request_omits_body() {
        let sink = Sink::default();
        let mut w = ConnWriter::new(sink.clone(), true);
        w.begin(&request(Method::HEAD, Version::HTTP_11, None));
        w.write_head(StatusCode::OK, &ok_headers()).unwrap();
        w.write_body(b"ignored").unwrap();
        w.finish().unwrap();
        let text = sink.text();
        assert!(text.contains("content-length: 7\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
        assert!(!text.contains("ignored"));
    }

    #[test]
    fn test_connection_close_and_http10() {
        let sink = Sink::default();
        let mut w = ConnWriter::new(sink.clone(), true);
        w.begin(&request(Method::GET, Version::HTTP_11, Some("close")));
        assert!(!w.keep_alive());

        w.begin(&request(Method::GET, Version::HTTP_10, None));
        assert!(!w.keep_alive());

        w.begin(&request(Method::GET, Version::HTTP_10, Some("Keep-Alive")));
        assert!(w.keep_alive());
        w.write_head(StatusCode::NO_CONTENT, &HeaderMap::new()).unwrap();
        w.finish().unwrap();
        let text = sink.text();
        assert!(text.starts_with("HTTP/1.0 204 No Content\r\n"));
        assert!(text.contains("connection: keep-alive\r\n"));
        assert!(!text.contains("content-length"));
    }

    #[test]
    fn test_hijack_hands_over_stream_once() {
        let sink = Sink::default();
        let mut w = ConnWriter::new(sink.clone(), true);
        w.begin(&request(Method::GET, Version::HTTP_11, None));
        let mut conn = w.hijack().unwrap();
        conn.write_all(b"raw").unwrap();
        assert_eq!(sink.text(), "raw");
        assert!(w.hijack().is_err());
        assert!(!w.keep_alive());
        assert!(w.flush().is_err());
    }

    #[test]
    fn test_write_failure_cancels_request() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Ok(0)
            }
        }
        impl Write for Broken {
            fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
                Err(io::ErrorKind::BrokenPipe.into())
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let cancel = Cancellation::new();
        let mut req = request(Method::GET, Version::HTTP_11, None);
        req.extensions_mut().insert(cancel.clone());
        let mut w = ConnWriter::new(Broken, true);
        w.begin(&req);
        w.write_head(StatusCode::OK, &HeaderMap::new()).unwrap();
        assert!(w.finish().is_err());
        assert!(cancel.is_cancelled());
        assert!(!w.keep_alive());
    }
}
