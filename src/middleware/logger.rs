use std::collections::HashSet;
use std::time::Instant;

use tracing::info;

use super::Middleware;
use crate::context::{Context, ErrorType};

/// Request logging stage.
///
/// Runs the rest of the chain, then emits one `info` event with method,
/// path, status, latency, client ip, response size and any private errors
/// the chain recorded. Register it first so its latency covers every stage.
#[derive(Debug, Clone, Default)]
pub struct Logger {
    skip_paths: HashSet<String>,
}

impl Logger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Paths (matched exactly against the request path) that are never logged.
    #[must_use]
    pub fn with_skip_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip_paths.extend(paths.into_iter().map(Into::into));
        self
    }
}

impl Middleware for Logger {
    fn handle(&self, c: &mut Context) {
        let start = Instant::now();
        c.next();

        if self.skip_paths.contains(c.request().uri().path()) {
            return;
        }

        let latency = start.elapsed();
        let errors = c.errors().by_type(ErrorType::PRIVATE);
        let errors = if errors.is_empty() {
            String::new()
        } else {
            errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ")
        };
        let client_ip = c.client_ip().map(|ip| ip.to_string()).unwrap_or_default();

        info!(
            method = %c.method(),
            path = %c.uri(),
            route = c.full_path(),
            status = c.writer().status(),
            latency_us = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX),
            client_ip = %client_ip,
            size = c.writer().size(),
            errors = %errors,
            "Request completed"
        );
    }

    fn name(&self) -> &'static str {
        "brrtframe::middleware::Logger"
    }
}
