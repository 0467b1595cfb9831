use std::hint::black_box;
use std::io;

use brrtframe::context::RawResponse;
use brrtframe::router::{Params, RouteTree};
use brrtframe::{handlers, Context, Engine, Routing};
use criterion::{criterion_group, criterion_main, Criterion};
use http::{HeaderMap, Method, StatusCode};

const PATTERNS: &[&str] = &[
    "/",
    "/zoo/animals",
    "/zoo/animals/:id",
    "/zoo/animals/:id/toys/:toy_id",
    "/zoo/:category/animals/:id/habitats/:habitat_id/sections/:section_id",
    "/inventory/:warehouse_id/feeds/:feed_id/items/:item_id/batches/:batch_id",
    "/complex/:a/:b/:c/:d/:e/:f/:g/:h/:i",
    "/zoo/health",
    "/static/*filepath",
];

const PATHS: &[&str] = &[
    "/zoo/animals/123",
    "/zoo/animals/123/toys/456",
    "/zoo/cats/animals/123/habitats/88/sections/5",
    "/inventory/1/feeds/2/items/3/batches/4",
    "/complex/1/2/3/4/5/6/7/8/9",
    "/static/css/site.css",
];

/// Swallows every response.
struct Discard;

impl RawResponse for Discard {
    fn write_head(&mut self, _status: StatusCode, _headers: &HeaderMap) -> io::Result<()> {
        Ok(())
    }

    fn write_body(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }
}

fn bench_route_lookup(c: &mut Criterion) {
    let mut tree = RouteTree::new();
    for (i, pattern) in PATTERNS.iter().enumerate() {
        tree.insert(pattern, i).unwrap();
    }
    let mut params = Params::new();
    c.bench_function("route_lookup", |b| {
        b.iter(|| {
            for path in PATHS {
                params.clear();
                let found = tree.lookup(black_box(path), &mut params).value().copied();
                black_box(found);
            }
        })
    });
}

fn bench_serve_http(c: &mut Criterion) {
    let mut engine = Engine::new();
    for pattern in PATTERNS {
        engine.get(
            pattern,
            handlers![
                |c: &mut Context| {
                    black_box(c.params().count());
                },
                |c: &mut Context| c.status(204)
            ],
        );
    }
    let requests: Vec<_> = PATHS
        .iter()
        .map(|p| {
            http::Request::builder()
                .method(Method::GET)
                .uri(*p)
                .body(Vec::new())
                .unwrap()
        })
        .collect();

    let mut raw: Box<dyn RawResponse> = Box::new(Discard);
    c.bench_function("serve_http", |b| {
        b.iter(|| {
            for request in &requests {
                let sink = std::mem::replace(&mut raw, Box::new(Discard));
                raw = engine.serve_http(black_box(request.clone()), sink);
            }
        })
    });
}

criterion_group!(benches, bench_route_lookup, bench_serve_http);
criterion_main!(benches);
