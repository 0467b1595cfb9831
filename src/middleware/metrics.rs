use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{handler, HandlerFunc, Middleware};
use crate::context::Context;

/// Request counters for Prometheus scraping.
///
/// Counters are plain atomics with relaxed ordering: readers see eventually
/// consistent values. Share one instance between the chain and whatever
/// reads it:
///
/// ```rust
/// use std::sync::Arc;
/// use brrtframe::{middleware::{HandlerFunc, MetricsMiddleware}, Engine, Routing};
///
/// let metrics = Arc::new(MetricsMiddleware::new());
/// let mut engine = Engine::new();
/// engine.add_middleware(vec![Arc::clone(&metrics) as HandlerFunc]);
/// engine.get("/metrics", vec![metrics.endpoint()]);
/// ```
#[derive(Debug, Default)]
pub struct MetricsMiddleware {
    request_count: AtomicUsize,
    in_flight: AtomicUsize,
    client_errors: AtomicUsize,
    server_errors: AtomicUsize,
    aborted: AtomicUsize,
    total_latency_ns: AtomicU64,
    stack_size: AtomicUsize,
}

impl MetricsMiddleware {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests that finished passing through this stage.
    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::Relaxed)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Responses with a 4xx status.
    pub fn client_errors(&self) -> usize {
        self.client_errors.load(Ordering::Relaxed)
    }

    /// Responses with a 5xx status.
    pub fn server_errors(&self) -> usize {
        self.server_errors.load(Ordering::Relaxed)
    }

    /// Chains a later stage aborted.
    pub fn aborted(&self) -> usize {
        self.aborted.load(Ordering::Relaxed)
    }

    /// Mean time spent in the rest of the chain. Zero before the first request.
    pub fn average_latency(&self) -> Duration {
        let count = self.request_count.load(Ordering::Relaxed) as u64;
        if count == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(self.total_latency_ns.load(Ordering::Relaxed) / count)
        }
    }

    /// Stack size of the coroutine that served the last request, or the
    /// configured default outside coroutines.
    pub fn stack_size(&self) -> usize {
        self.stack_size.load(Ordering::Relaxed)
    }

    /// Prometheus text exposition of every counter.
    pub fn render_prometheus(&self) -> String {
        let mut out = String::with_capacity(1024);
        let mut metric = |name: &str, kind: &str, help: &str, value: String| {
            out.push_str(&format!("# HELP {name} {help}\n# TYPE {name} {kind}\n{name} {value}\n"));
        };
        metric(
            "brrtframe_requests_total",
            "counter",
            "Requests served.",
            self.request_count().to_string(),
        );
        metric(
            "brrtframe_requests_in_flight",
            "gauge",
            "Requests currently in the chain.",
            self.in_flight().to_string(),
        );
        metric(
            "brrtframe_client_errors_total",
            "counter",
            "Responses with a 4xx status.",
            self.client_errors().to_string(),
        );
        metric(
            "brrtframe_server_errors_total",
            "counter",
            "Responses with a 5xx status.",
            self.server_errors().to_string(),
        );
        metric(
            "brrtframe_aborted_total",
            "counter",
            "Chains aborted before completion.",
            self.aborted().to_string(),
        );
        metric(
            "brrtframe_request_latency_seconds_avg",
            "gauge",
            "Average request latency.",
            format!("{:.6}", self.average_latency().as_secs_f64()),
        );
        metric(
            "brrtframe_coroutine_stack_bytes",
            "gauge",
            "Coroutine stack size.",
            self.stack_size().to_string(),
        );
        out
    }

    /// A terminal stage that renders [`MetricsMiddleware::render_prometheus`].
    pub fn endpoint(self: &Arc<Self>) -> HandlerFunc {
        let metrics = Arc::clone(self);
        handler(move |c: &mut Context| {
            let body = metrics.render_prometheus();
            c.data(200, "text/plain; version=0.0.4", body.as_bytes());
        })
    }

    fn record_stack(&self) {
        let size = if may::coroutine::is_coroutine() {
            may::coroutine::current().stack_size()
        } else {
            may::config().get_stack_size()
        };
        self.stack_size.store(size, Ordering::Relaxed);
    }
}

impl Middleware for MetricsMiddleware {
    fn handle(&self, c: &mut Context) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();

        c.next();

        let latency = u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.total_latency_ns.fetch_add(latency, Ordering::Relaxed);
        self.request_count.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        match c.writer().status() {
            400..=499 => self.client_errors.fetch_add(1, Ordering::Relaxed),
            500..=599 => self.server_errors.fetch_add(1, Ordering::Relaxed),
            _ => 0,
        };
        if c.is_aborted() {
            self.aborted.fetch_add(1, Ordering::Relaxed);
        }
        self.record_stack();
    }

    fn name(&self) -> &'static str {
        "brrtframe::middleware::MetricsMiddleware"
    }
}
