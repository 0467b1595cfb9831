//! Request-side accessors.

use std::borrow::Cow;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use http::header::{CONNECTION, CONTENT_TYPE, COOKIE, UPGRADE};
use http::{HeaderMap, Method, Uri};
use serde::de::DeserializeOwned;
use url::form_urlencoded;

use super::core::Context;
use super::errors::ErrorType;
use super::Request;

/// Peer address of the connection, attached to requests by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteAddr(pub SocketAddr);

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

fn lookup<'a>(pairs: form_urlencoded::Parse<'a>, key: &str) -> Option<Cow<'a, str>> {
    pairs.into_iter().find(|(k, _)| k == key).map(|(_, v)| v)
}

fn lookup_all<'a>(pairs: form_urlencoded::Parse<'a>, key: &str) -> Vec<Cow<'a, str>> {
    pairs
        .into_iter()
        .filter(|(k, _)| k == key)
        .map(|(_, v)| v)
        .collect()
}

/// Collect `key[sub]=value` pairs into `{sub: value}`.
fn lookup_map(pairs: form_urlencoded::Parse<'_>, key: &str) -> HashMap<String, String> {
    pairs
        .into_iter()
        .filter_map(|(k, v)| {
            let inner = k.strip_prefix(key)?.strip_prefix('[')?.strip_suffix(']')?;
            Some((inner.to_owned(), v.into_owned()))
        })
        .collect()
}

impl Context {
    #[must_use]
    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        self.request.method()
    }

    #[must_use]
    pub fn uri(&self) -> &Uri {
        self.request.uri()
    }

    /// The path the router matched: percent-decoded unless raw-path routing
    /// is enabled.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn body(&self) -> &[u8] {
        self.request.body()
    }

    #[must_use]
    pub fn request_headers(&self) -> &HeaderMap {
        self.request.headers()
    }

    /// Request header value, if present and visible ASCII.
    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.request.headers().get(name).and_then(|v| v.to_str().ok())
    }

    /// Media type of the request body without parameters.
    #[must_use]
    pub fn content_type(&self) -> &str {
        self.request
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map_or("", |v| v.split(';').next().unwrap_or_default().trim())
    }

    /// Whether the client asked for a WebSocket upgrade.
    #[must_use]
    pub fn is_websocket(&self) -> bool {
        let headers = self.request.headers();
        let connection_upgrade = headers
            .get_all(CONNECTION)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
        let upgrade_websocket = headers
            .get(UPGRADE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("websocket"));
        connection_upgrade && upgrade_websocket
    }

    fn query_pairs(&self) -> form_urlencoded::Parse<'_> {
        form_urlencoded::parse(self.request.uri().query().unwrap_or_default().as_bytes())
    }

    fn form_pairs(&self) -> form_urlencoded::Parse<'_> {
        let body: &[u8] = if self.content_type() == FORM_URLENCODED {
            self.request.body()
        } else {
            &[]
        };
        form_urlencoded::parse(body)
    }

    /// First value of query parameter `key`.
    #[must_use]
    pub fn get_query(&self, key: &str) -> Option<Cow<'_, str>> {
        lookup(self.query_pairs(), key)
    }

    /// First value of query parameter `key`, or `""`.
    #[must_use]
    pub fn query(&self, key: &str) -> Cow<'_, str> {
        self.get_query(key).unwrap_or_default()
    }

    #[must_use]
    pub fn default_query<'a>(&'a self, key: &str, default: &'a str) -> Cow<'a, str> {
        self.get_query(key).unwrap_or(Cow::Borrowed(default))
    }

    /// Every value of query parameter `key`, in order.
    #[must_use]
    pub fn query_array(&self, key: &str) -> Vec<Cow<'_, str>> {
        lookup_all(self.query_pairs(), key)
    }

    /// `key[a]=1&key[b]=2` as `{a: 1, b: 2}`.
    #[must_use]
    pub fn query_map(&self, key: &str) -> HashMap<String, String> {
        lookup_map(self.query_pairs(), key)
    }

    /// First value of url-encoded form field `key`.
    #[must_use]
    pub fn get_post_form(&self, key: &str) -> Option<Cow<'_, str>> {
        lookup(self.form_pairs(), key)
    }

    #[must_use]
    pub fn post_form(&self, key: &str) -> Cow<'_, str> {
        self.get_post_form(key).unwrap_or_default()
    }

    #[must_use]
    pub fn default_post_form<'a>(&'a self, key: &str, default: &'a str) -> Cow<'a, str> {
        self.get_post_form(key).unwrap_or(Cow::Borrowed(default))
    }

    #[must_use]
    pub fn post_form_array(&self, key: &str) -> Vec<Cow<'_, str>> {
        lookup_all(self.form_pairs(), key)
    }

    #[must_use]
    pub fn post_form_map(&self, key: &str) -> HashMap<String, String> {
        lookup_map(self.form_pairs(), key)
    }

    /// Value of cookie `name`, URL-unescaped.
    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<Cow<'_, str>> {
        self.request
            .headers()
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| {
                let v = v.trim_matches('"');
                urlencoding::decode(v).unwrap_or(Cow::Borrowed(v))
            })
    }

    /// Peer IP of the connection.
    #[must_use]
    pub fn remote_ip(&self) -> Option<IpAddr> {
        self.request
            .extensions()
            .get::<RemoteAddr>()
            .map(|addr| addr.0.ip())
    }

    /// Best guess at the originating client IP.
    ///
    /// When the peer is a trusted proxy and forwarded headers are honoured,
    /// each configured header is checked in turn. `X-Forwarded-For` style
    /// lists are walked right to left, skipping trusted proxies; the first
    /// untrusted address (or the leftmost one) wins. Otherwise the peer IP is
    /// returned.
    #[must_use]
    pub fn client_ip(&self) -> Option<IpAddr> {
        let remote = self.remote_ip()?;
        let config = &self.config;
        if config.forwarded_by_client_ip && config.is_trusted_proxy(remote) {
            for header in &config.remote_ip_headers {
                if let Some(ip) = self.get_header(header).and_then(|v| self.forwarded_ip(v)) {
                    return Some(ip);
                }
            }
        }
        Some(remote)
    }

    fn forwarded_ip(&self, header: &str) -> Option<IpAddr> {
        let items: Vec<&str> = header.split(',').collect();
        for (i, item) in items.iter().enumerate().rev() {
            let ip: IpAddr = item.trim().parse().ok()?;
            if i == 0 || !self.config.is_trusted_proxy(ip) {
                return Some(ip);
            }
        }
        None
    }

    /// Deserialize the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error when the body is not valid JSON for `T`.
    pub fn should_bind_json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(self.request.body())
    }

    /// Deserialize the body as JSON, aborting with 400 on failure.
    ///
    /// The failure is recorded as a [`ErrorType::BIND`] error.
    pub fn bind_json<T: DeserializeOwned>(&mut self) -> Option<T> {
        match self.should_bind_json() {
            Ok(value) => Some(value),
            Err(e) => {
                self.abort_with_error(400, e).set_type(ErrorType::BIND);
                None
            }
        }
    }

    /// Deserialize the body as YAML.
    ///
    /// # Errors
    ///
    /// Returns the `serde_yaml` error when the body is not valid YAML for `T`.
    pub fn should_bind_yaml<T: DeserializeOwned>(&self) -> Result<T, serde_yaml::Error> {
        serde_yaml::from_slice(self.request.body())
    }
}
