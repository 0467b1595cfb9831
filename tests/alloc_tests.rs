//! Dispatch through a warm engine must not touch the heap for routes with
//! up to eight parameters.

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::io;

use brrtframe::context::{BoxedRawResponse, RawResponse};
use brrtframe::{handlers, Context, Engine, Request, Routing};
use http::{HeaderMap, Method, StatusCode};

/// Counts allocations made by the current thread while counting is on.
struct CountingAlloc;

thread_local! {
    static COUNTING: Cell<bool> = const { Cell::new(false) };
    static ALLOCATIONS: Cell<usize> = const { Cell::new(0) };
}

fn record() {
    let on = COUNTING.try_with(Cell::get).unwrap_or(false);
    if on {
        let _ = ALLOCATIONS.try_with(|n| n.set(n.get() + 1));
    }
}

unsafe impl GlobalAlloc for CountingAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        record();
        System.alloc(layout)
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        record();
        System.alloc_zeroed(layout)
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        record();
        System.realloc(ptr, layout, new_size)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout);
    }
}

#[global_allocator]
static GLOBAL: CountingAlloc = CountingAlloc;

fn start_counting() {
    ALLOCATIONS.with(|n| n.set(0));
    COUNTING.with(|c| c.set(true));
}

/// Allocations made on this thread since [`start_counting`].
fn stop_counting() -> usize {
    COUNTING.with(|c| c.set(false));
    ALLOCATIONS.with(Cell::get)
}

/// Accepts and drops every response.
struct Discard;

impl RawResponse for Discard {
    fn write_head(&mut self, _status: StatusCode, _headers: &HeaderMap) -> io::Result<()> {
        Ok(())
    }

    fn write_body(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }
}

fn requests(path: &str, count: usize) -> Vec<Request> {
    (0..count)
        .map(|_| {
            http::Request::builder()
                .method(Method::GET)
                .uri(path)
                .body(Vec::new())
                .unwrap()
        })
        .collect()
}

fn engine() -> Engine {
    let mut engine = Engine::new();
    engine.get(
        "/a/:p1/:p2/:p3/:p4/:p5/:p6/:p7/:p8",
        handlers![
            |c: &mut Context| {
                let total: usize = c.params().map(|(_, v)| v.len()).sum();
                assert_eq!(total, 8);
                c.next();
            },
            |c: &mut Context| c.status(204)
        ],
    );
    engine.get("/health", handlers![|c: &mut Context| c.status(204)]);
    engine
}

fn assert_no_allocations(engine: &Engine, path: &str) {
    let mut raw: BoxedRawResponse = Box::new(Discard);
    // warm the pool and every buffer the context reuses
    for request in requests(path, 4) {
        raw = engine.serve_http(request, raw);
    }

    let batch = requests(path, 100);
    start_counting();
    for request in batch {
        raw = engine.serve_http(request, raw);
    }
    let count = stop_counting();
    assert_eq!(count, 0, "{path} allocated {count} times over 100 requests");
}

#[test]
fn test_param_route_dispatch_does_not_allocate() {
    assert_no_allocations(&engine(), "/a/1/2/3/4/5/6/7/8");
}

#[test]
fn test_static_route_dispatch_does_not_allocate() {
    assert_no_allocations(&engine(), "/health");
}
