use std::any::Any;
use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::Arc;

use http::{HeaderMap, Method, Uri, Version};

use super::cancel::Cancellation;
use super::core::KeyValue;
use super::input::RemoteAddr;
use super::Request;

/// Read-only copy of a request's context.
///
/// Produced by [`Context::copy`](super::Context::copy). It owns everything it
/// holds, so it can outlive the request and move to another thread or
/// coroutine. Keys are shared with the original by reference count.
#[derive(Debug, Clone)]
pub struct ContextSnapshot {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    body: Vec<u8>,
    path: String,
    params: Vec<(Arc<str>, String)>,
    full_path: Option<Arc<str>>,
    keys: Vec<(Cow<'static, str>, KeyValueDebug)>,
    remote_addr: Option<SocketAddr>,
    cancellation: Option<Cancellation>,
}

/// Keys hold `dyn Any`, which has no `Debug`.
#[derive(Clone)]
struct KeyValueDebug(KeyValue);

impl std::fmt::Debug for KeyValueDebug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("..")
    }
}

impl ContextSnapshot {
    pub(crate) fn capture(
        request: &Request,
        path: &str,
        params: Vec<(Arc<str>, String)>,
        full_path: Option<Arc<str>>,
        keys: Vec<(Cow<'static, str>, KeyValue)>,
    ) -> Self {
        Self {
            method: request.method().clone(),
            uri: request.uri().clone(),
            version: request.version(),
            headers: request.headers().clone(),
            body: request.body().clone(),
            path: path.to_owned(),
            params,
            full_path,
            keys: keys.into_iter().map(|(k, v)| (k, KeyValueDebug(v))).collect(),
            remote_addr: request.extensions().get::<RemoteAddr>().map(|a| a.0),
            cancellation: request.extensions().get::<Cancellation>().cloned(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn full_path(&self) -> &str {
        self.full_path.as_deref().unwrap_or_default()
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn params(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_ref(), v.as_str()))
    }

    pub fn get<V: Any>(&self, key: &str) -> Option<&V> {
        self.keys
            .iter()
            .find(|(k, _)| k.as_ref() == key)
            .and_then(|(_, v)| v.0.as_ref().downcast_ref::<V>())
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(Cancellation::is_cancelled)
    }
}
