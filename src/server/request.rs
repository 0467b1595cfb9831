//! HTTP/1.1 request reading.
//!
//! [`RequestReader`] owns the read half of a connection and a carry-over
//! buffer, so pipelined requests and bytes read past one request's body are
//! kept for the next call.

use std::fmt;
use std::io::{self, Read, Write};

use http::header::{CONTENT_LENGTH, EXPECT, TRANSFER_ENCODING};
use http::{Method, Version};

use crate::context::Request;

/// Header slots handed to `httparse`; more headers than this is a 431.
pub const MAX_HEADERS: usize = 64;

const MAX_CHUNK_HEAD: usize = 128;
const READ_CHUNK: usize = 4096;

/// Why a request could not be read.
#[derive(Debug)]
pub enum ReadError {
    Io(io::Error),
    Malformed(String),
    HeadTooLarge,
    BodyTooLarge,
}

impl ReadError {
    /// Status to answer with before closing, if the client is still there.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            ReadError::Io(_) => None,
            ReadError::Malformed(_) => Some(400),
            ReadError::HeadTooLarge => Some(431),
            ReadError::BodyTooLarge => Some(413),
        }
    }
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadError::Io(e) => write!(f, "read failed: {e}"),
            ReadError::Malformed(reason) => write!(f, "malformed request: {reason}"),
            ReadError::HeadTooLarge => f.write_str("request head too large"),
            ReadError::BodyTooLarge => f.write_str("request body too large"),
        }
    }
}

impl std::error::Error for ReadError {}

impl From<io::Error> for ReadError {
    fn from(e: io::Error) -> Self {
        ReadError::Io(e)
    }
}

fn malformed(reason: impl Into<String>) -> ReadError {
    ReadError::Malformed(reason.into())
}

pub struct RequestReader<S> {
    stream: S,
    buf: Vec<u8>,
    max_header_bytes: usize,
    max_body_bytes: usize,
}

impl<S: Read + Write> RequestReader<S> {
    pub fn new(stream: S, max_header_bytes: usize, max_body_bytes: usize) -> Self {
        Self {
            stream,
            buf: Vec::with_capacity(READ_CHUNK),
            max_header_bytes,
            max_body_bytes,
        }
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Read the next request. `Ok(None)` means the peer closed the connection
    /// cleanly between requests.
    pub fn next_request(&mut self) -> Result<Option<Request>, ReadError> {
        let Some(head) = self.read_head()? else {
            return Ok(None);
        };
        let body = self.read_body(&head)?;
        Ok(Some(head.map(|()| body)))
    }

    fn fill(&mut self) -> io::Result<usize> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = self.stream.read(&mut chunk)?;
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    fn fill_or_eof(&mut self) -> Result<(), ReadError> {
        if self.fill()? == 0 {
            return Err(ReadError::Io(io::ErrorKind::UnexpectedEof.into()));
        }
        Ok(())
    }

    fn read_head(&mut self) -> Result<Option<http::Request<()>>, ReadError> {
        loop {
            if !self.buf.is_empty() {
                if let Some((head, len)) = parse_head(&self.buf)? {
                    self.buf.drain(..len);
                    return Ok(Some(head));
                }
                if self.buf.len() > self.max_header_bytes {
                    return Err(ReadError::HeadTooLarge);
                }
            }
            if self.fill()? == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(ReadError::Io(io::ErrorKind::UnexpectedEof.into()));
            }
        }
    }

    fn read_body(&mut self, head: &http::Request<()>) -> Result<Vec<u8>, ReadError> {
        let headers = head.headers();
        let chunked = headers
            .get_all(TRANSFER_ENCODING)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.to_ascii_lowercase().contains("chunked"));
        let length = match headers.get(CONTENT_LENGTH) {
            Some(value) if !chunked => Some(
                value
                    .to_str()
                    .ok()
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .ok_or_else(|| malformed("invalid Content-Length"))?,
            ),
            _ => None,
        };
        if !chunked && length.unwrap_or(0) == 0 {
            return Ok(Vec::new());
        }
        if length.is_some_and(|n| n > self.max_body_bytes) {
            return Err(ReadError::BodyTooLarge);
        }

        let expects_continue = headers
            .get(EXPECT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("100-continue"));
        if expects_continue && head.version() == Version::HTTP_11 {
            self.stream.write_all(b"HTTP/1.1 100 Continue\r\n\r\n")?;
            self.stream.flush()?;
        }

        match length {
            Some(n) => self.take_exact(n),
            None => self.read_chunked(),
        }
    }

    fn take_exact(&mut self, n: usize) -> Result<Vec<u8>, ReadError> {
        while self.buf.len() < n {
            self.fill_or_eof()?;
        }
        Ok(self.buf.drain(..n).collect())
    }

    fn take_line(&mut self) -> Result<Vec<u8>, ReadError> {
        loop {
            if let Some(pos) = self.buf.windows(2).position(|w| w == b"\r\n") {
                let line = self.buf.drain(..pos + 2).take(pos).collect();
                return Ok(line);
            }
            if self.buf.len() > MAX_CHUNK_HEAD {
                return Err(malformed("chunk header too long"));
            }
            self.fill_or_eof()?;
        }
    }

    fn read_chunked(&mut self) -> Result<Vec<u8>, ReadError> {
        let mut body = Vec::new();
        loop {
            let line = self.take_line()?;
            let line = std::str::from_utf8(&line).map_err(|_| malformed("invalid chunk size"))?;
            let size = line.split(';').next().unwrap_or_default().trim();
            let size = usize::from_str_radix(size, 16).map_err(|_| malformed("invalid chunk size"))?;
            if size == 0 {
                // Trailers are read and dropped.
                while !self.take_line()?.is_empty() {}
                return Ok(body);
            }
            body.len()
                .checked_add(size)
                .filter(|&total| total <= self.max_body_bytes)
                .ok_or(ReadError::BodyTooLarge)?;
            body.extend(self.take_exact(size)?);
            if !self.take_line()?.is_empty() {
                return Err(malformed("chunk missing terminator"));
            }
        }
    }
}

/// Parse a complete head from `buf`, returning it and its length in bytes.
fn parse_head(buf: &[u8]) -> Result<Option<(http::Request<()>, usize)>, ReadError> {
    let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut slots);
    let len = match req.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(httparse::Error::TooManyHeaders) => return Err(ReadError::HeadTooLarge),
        Err(e) => return Err(malformed(e.to_string())),
    };

    let method = req.method.ok_or_else(|| malformed("missing method"))?;
    let method = Method::from_bytes(method.as_bytes()).map_err(|e| malformed(e.to_string()))?;
    let target = req.path.ok_or_else(|| malformed("missing request target"))?;
    let version = match req.version {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    };

    let mut builder = http::Request::builder()
        .method(method)
        .uri(target)
        .version(version);
    for header in req.headers.iter() {
        builder = builder.header(header.name, header.value);
    }
    let head = builder.body(()).map_err(|e| malformed(e.to_string()))?;
    Ok(Some((head, len)))
}
