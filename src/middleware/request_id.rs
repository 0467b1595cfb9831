use super::Middleware;
use crate::context::Context;
use crate::ids::RequestId;

/// Header carrying the request id in both directions.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Context key holding the request id as a `String`.
pub const REQUEST_ID_KEY: &str = "request_id";

/// Tags each request with a ULID.
///
/// A valid inbound `X-Request-Id` is kept; anything else is replaced with a
/// fresh id. The id is echoed in the response header and stored under
/// [`REQUEST_ID_KEY`] for later stages.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestIdMiddleware;

impl Middleware for RequestIdMiddleware {
    fn handle(&self, c: &mut Context) {
        let id = RequestId::from_header_or_new(c.get_header(REQUEST_ID_HEADER)).to_string();
        c.header(REQUEST_ID_HEADER, &id);
        c.set(REQUEST_ID_KEY, id);
    }

    fn name(&self) -> &'static str {
        "brrtframe::middleware::RequestIdMiddleware"
    }
}
