//! Response-side helpers.

use std::io;
use std::path::{Component, Path};

use http::header::{HeaderName, HeaderValue, CONTENT_DISPOSITION, CONTENT_TYPE, LOCATION, SET_COOKIE};
use http::Method;
use serde::Serialize;
use tracing::{debug, warn};

use super::core::Context;
use super::errors::ErrorType;
use super::writer::ResponseWriter;

pub const MIME_PLAIN: &str = "text/plain; charset=utf-8";
pub const MIME_HTML: &str = "text/html; charset=utf-8";
pub const MIME_JSON: &str = "application/json; charset=utf-8";
pub const MIME_YAML: &str = "application/yaml; charset=utf-8";

/// `SameSite` cookie attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Lax,
    Strict,
    None,
}

/// A `Set-Cookie` description for [`Context::set_cookie`].
#[derive(Debug, Clone, Default)]
pub struct Cookie<'a> {
    pub name: &'a str,
    pub value: &'a str,
    /// Seconds; negative deletes the cookie, `None` makes it a session cookie.
    pub max_age: Option<i64>,
    /// Defaults to `/`.
    pub path: Option<&'a str>,
    pub domain: Option<&'a str>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<SameSite>,
}

impl<'a> Cookie<'a> {
    pub fn new(name: &'a str, value: &'a str) -> Self {
        Self {
            name,
            value,
            ..Self::default()
        }
    }

    fn header_value(&self) -> String {
        let mut out = format!("{}={}", self.name, urlencoding::encode(self.value));
        out.push_str("; Path=");
        out.push_str(self.path.unwrap_or("/"));
        if let Some(domain) = self.domain {
            out.push_str("; Domain=");
            out.push_str(domain);
        }
        match self.max_age {
            Some(age) if age > 0 => {
                out.push_str("; Max-Age=");
                out.push_str(&age.to_string());
            }
            Some(_) => out.push_str("; Max-Age=0"),
            None => {}
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        if self.secure {
            out.push_str("; Secure");
        }
        match self.same_site {
            Some(SameSite::Lax) => out.push_str("; SameSite=Lax"),
            Some(SameSite::Strict) => out.push_str("; SameSite=Strict"),
            Some(SameSite::None) => out.push_str("; SameSite=None"),
            None => {}
        }
        out
    }
}

/// Statuses that must not carry a body.
fn body_allowed(code: u16) -> bool {
    !((100..200).contains(&code) || code == 204 || code == 304)
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html" | "htm") => MIME_HTML,
        Some("css") => "text/css; charset=utf-8",
        Some("js" | "mjs") => "text/javascript; charset=utf-8",
        Some("json") => MIME_JSON,
        Some("txt") => MIME_PLAIN,
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("wasm") => "application/wasm",
        _ => "application/octet-stream",
    }
}

fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

impl Context {
    /// Set the pending response status.
    pub fn status(&mut self, code: u16) {
        self.writer.write_header(code);
    }

    /// Set response header `key`, replacing earlier values. An empty value
    /// removes the header.
    pub fn header(&mut self, key: &str, value: &str) {
        let Ok(name) = HeaderName::from_bytes(key.as_bytes()) else {
            warn!(header = key, "Ignoring invalid response header name");
            return;
        };
        if value.is_empty() {
            self.writer.headers_mut().remove(name);
            return;
        }
        match HeaderValue::from_str(value) {
            Ok(value) => {
                self.writer.headers_mut().insert(name, value);
            }
            Err(_) => warn!(header = key, "Ignoring invalid response header value"),
        }
    }

    /// Add a value to response header `key`, keeping earlier values.
    pub fn append_header(&mut self, key: &str, value: &str) {
        match (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.writer.headers_mut().append(name, value);
            }
            _ => warn!(header = key, "Ignoring invalid response header"),
        }
    }

    pub fn set_cookie(&mut self, cookie: &Cookie<'_>) {
        match HeaderValue::from_str(&cookie.header_value()) {
            Ok(value) => {
                self.writer.headers_mut().append(SET_COOKIE, value);
            }
            Err(_) => warn!(cookie = cookie.name, "Ignoring cookie with invalid characters"),
        }
    }

    fn record_write(&mut self, result: io::Result<usize>) {
        if let Err(e) = result {
            debug!(error = %e, path = %self.path, "Response write failed");
            self.error(e);
        }
    }

    /// Commit `code`, set `content_type` unless a stage already chose one,
    /// and write `body` when the status allows one.
    fn render(&mut self, code: u16, content_type: &str, body: &[u8]) {
        self.status(code);
        if !body_allowed(code) {
            if let Err(e) = self.writer.write_header_now() {
                self.error(e);
            }
            return;
        }
        if !self.writer.headers().contains_key(CONTENT_TYPE) {
            if let Ok(value) = HeaderValue::from_str(content_type) {
                self.writer.headers_mut().insert(CONTENT_TYPE, value);
            }
        }
        let result = self.writer.write(body);
        self.record_write(result);
    }

    fn render_failed(&mut self, err: impl Into<anyhow::Error>) {
        self.error(err).set_type(ErrorType::RENDER);
        if !self.writer.written() {
            self.writer.headers_mut().remove(CONTENT_TYPE);
            self.abort_with_status(500);
        }
    }

    /// Plain text response.
    pub fn string(&mut self, code: u16, body: impl AsRef<str>) {
        self.render(code, MIME_PLAIN, body.as_ref().as_bytes());
    }

    /// JSON response. A serialization failure becomes a 500 and a
    /// [`ErrorType::RENDER`] error.
    pub fn json<T: Serialize + ?Sized>(&mut self, code: u16, body: &T) {
        match serde_json::to_vec(body) {
            Ok(bytes) => self.render(code, MIME_JSON, &bytes),
            Err(e) => self.render_failed(e),
        }
    }

    /// Pretty-printed JSON response.
    pub fn indented_json<T: Serialize + ?Sized>(&mut self, code: u16, body: &T) {
        match serde_json::to_vec_pretty(body) {
            Ok(bytes) => self.render(code, MIME_JSON, &bytes),
            Err(e) => self.render_failed(e),
        }
    }

    pub fn yaml<T: Serialize + ?Sized>(&mut self, code: u16, body: &T) {
        match serde_yaml::to_string(body) {
            Ok(text) => self.render(code, MIME_YAML, text.as_bytes()),
            Err(e) => self.render_failed(e),
        }
    }

    /// Raw bytes with an explicit content type.
    pub fn data(&mut self, code: u16, content_type: &str, body: &[u8]) {
        self.render(code, content_type, body);
    }

    /// Redirect to `location` with `code` (3xx or 201).
    pub fn redirect(&mut self, code: u16, location: &str) {
        if !(300..=308).contains(&code) && code != 201 {
            self.error(anyhow::anyhow!("cannot redirect with status code {code}"));
            return;
        }
        let Ok(value) = HeaderValue::from_str(location) else {
            self.error(anyhow::anyhow!("invalid redirect location {location:?}"));
            return;
        };
        self.writer.headers_mut().insert(LOCATION, value);

        let method = self.request.method();
        if *method == Method::GET || *method == Method::HEAD {
            let reason = http::StatusCode::from_u16(code)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or("Redirect");
            let body = format!("<a href=\"{}\">{reason}</a>.\n\n", html_escape(location));
            self.render(code, MIME_HTML, body.as_bytes());
        } else {
            self.status(code);
            if let Err(e) = self.writer.write_header_now() {
                self.error(e);
            }
        }
    }

    /// Serve a file from disk. Paths with `..` components are refused.
    pub fn file(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            self.string(400, "invalid file path");
            return;
        }
        match std::fs::read(path) {
            Ok(bytes) => self.render(200, content_type_for(path), &bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.string(404, "404 page not found");
            }
            Err(e) => {
                self.error(e);
                self.abort_with_status(500);
            }
        }
    }

    /// Serve a file as a download named `filename`.
    pub fn file_attachment(&mut self, path: impl AsRef<Path>, filename: &str) {
        let disposition = if filename.is_ascii() {
            format!("attachment; filename=\"{}\"", filename.replace('"', "\\\""))
        } else {
            format!("attachment; filename*=UTF-8''{}", urlencoding::encode(filename))
        };
        if let Ok(value) = HeaderValue::from_str(&disposition) {
            self.writer.headers_mut().insert(CONTENT_DISPOSITION, value);
        }
        self.file(path);
    }

    /// Stream a response: `step` writes a piece and returns whether more
    /// follows. Each piece is flushed.
    ///
    /// Returns `true` when the client went away before the stream ended.
    pub fn stream<F>(&mut self, mut step: F) -> bool
    where
        F: FnMut(&mut ResponseWriter) -> bool,
    {
        loop {
            if self.is_cancelled() {
                return true;
            }
            let keep_open = step(&mut self.writer);
            if let Err(e) = self.writer.flush() {
                if e.kind() != io::ErrorKind::Unsupported {
                    debug!(error = %e, "Stream flush failed, client gone");
                    return true;
                }
            }
            if !keep_open {
                return false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_context;
    use serde_json::json;

    #[test]
    fn test_json_sets_content_type() {
        let (mut c, rec) = test_context(Method::GET, "/");
        c.json(201, &json!({"ok": true}));
        assert_eq!(rec.status(), 201);
        assert_eq!(rec.header("content-type").as_deref(), Some(MIME_JSON));
        assert_eq!(rec.body_string(), r#"{"ok":true}"#);
    }

    #[test]
    fn test_no_body_for_204() {
        let (mut c, rec) = test_context(Method::GET, "/");
        c.string(204, "ignored");
        assert_eq!(rec.status(), 204);
        assert!(rec.body().is_empty());
        assert!(rec.header("content-type").is_none());
    }

    #[test]
    fn test_header_set_and_remove() {
        let (mut c, _) = test_context(Method::GET, "/");
        c.header("X-One", "1");
        c.header("X-One", "2");
        c.append_header("X-Two", "a");
        c.append_header("X-Two", "b");
        assert_eq!(c.writer().headers().get_all("x-one").iter().count(), 1);
        assert_eq!(c.writer().headers().get_all("x-two").iter().count(), 2);
        c.header("X-One", "");
        assert!(c.writer().headers().get("x-one").is_none());
    }

    #[test]
    fn test_cookie_rendering() {
        let cookie = Cookie {
            max_age: Some(3600),
            http_only: true,
            same_site: Some(SameSite::Lax),
            ..Cookie::new("session", "a b")
        };
        assert_eq!(
            cookie.header_value(),
            "session=a%20b; Path=/; Max-Age=3600; HttpOnly; SameSite=Lax"
        );
    }

    #[test]
    fn test_redirect_get_writes_anchor() {
        let (mut c, rec) = test_context(Method::GET, "/old");
        c.redirect(301, "/new");
        assert_eq!(rec.status(), 301);
        assert_eq!(rec.header("location").as_deref(), Some("/new"));
        assert!(rec.body_string().contains("<a href=\"/new\">Moved Permanently</a>"));
    }

    #[test]
    fn test_redirect_rejects_bad_code() {
        let (mut c, rec) = test_context(Method::GET, "/");
        c.redirect(200, "/x");
        assert_eq!(c.errors().len(), 1);
        assert!(!rec.head_written());
    }

    #[test]
    fn test_file_serving() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("hello.txt");
        std::fs::write(&file, "hi there").unwrap();

        let (mut c, rec) = test_context(Method::GET, "/");
        c.file(&file);
        assert_eq!(rec.status(), 200);
        assert_eq!(rec.header("content-type").as_deref(), Some(MIME_PLAIN));
        assert_eq!(rec.body_string(), "hi there");

        let (mut c, rec) = test_context(Method::GET, "/");
        c.file(dir.path().join("missing.txt"));
        assert_eq!(rec.status(), 404);

        let (mut c, rec) = test_context(Method::GET, "/");
        c.file_attachment(&file, "report.txt");
        assert_eq!(
            rec.header("content-disposition").as_deref(),
            Some("attachment; filename=\"report.txt\"")
        );
    }

    #[test]
    fn test_stream_flushes_each_step() {
        let (mut c, rec) = test_context(Method::GET, "/");
        let mut remaining = 3;
        let gone = c.stream(|w| {
            let _ = w.write_str("tick\n");
            remaining -= 1;
            remaining > 0
        });
        assert!(!gone);
        assert_eq!(rec.body_string(), "tick\ntick\ntick\n");
        assert_eq!(rec.flushes(), 3);
    }
}
