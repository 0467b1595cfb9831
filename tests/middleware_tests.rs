//! Chain flow control and the built-in stages, exercised through an engine.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use base64::Engine as _;
use brrtframe::context::ErrorType;
use brrtframe::middleware::{
    BasicAuth, Logger, MetricsMiddleware, RequestIdMiddleware, AUTH_USER_KEY, REQUEST_ID_HEADER,
};
use brrtframe::testing::{perform, perform_request, request};
use brrtframe::{handler, handlers, Context, Engine, HandlerFunc, Routing};
use http::Method;
use serde_json::json;

mod common;
use common::{reply, trace_stage};

#[test]
fn test_stage_order_is_nested() {
    let mut engine = Engine::new();
    engine.get(
        "/x",
        vec![
            trace_stage("A"),
            trace_stage("B"),
            handler(|c: &mut Context| {
                c.append_header("X-Trace", "H");
                c.status(200);
            }),
        ],
    );

    let rec = perform_request(&engine, Method::GET, "/x");
    assert_eq!(rec.status(), 200);
    assert!(rec.body().is_empty());
    assert_eq!(
        rec.header_all("x-trace"),
        vec!["A-pre", "B-pre", "H", "B-post", "A-post"]
    );
}

#[test]
fn test_stages_without_next_still_advance() {
    let mut engine = Engine::new();
    engine.get(
        "/x",
        handlers![
            |c: &mut Context| c.append_header("X-Trace", "first"),
            |c: &mut Context| c.append_header("X-Trace", "second"),
            |c: &mut Context| c.status(204)
        ],
    );

    let rec = perform_request(&engine, Method::GET, "/x");
    assert_eq!(rec.status(), 204);
    assert_eq!(rec.header_all("x-trace"), vec!["first", "second"]);
}

#[test]
fn test_abort_stops_pending_stages() {
    let reached = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&reached);

    let mut engine = Engine::new();
    engine.get(
        "/secret",
        handlers![
            |c: &mut Context| c.abort_with_status(401),
            move |c: &mut Context| {
                counter.fetch_add(1, Ordering::SeqCst);
                c.string(200, "secret");
            }
        ],
    );

    let rec = perform_request(&engine, Method::GET, "/secret");
    assert_eq!(rec.status(), 401);
    assert!(rec.body().is_empty());
    assert_eq!(reached.load(Ordering::SeqCst), 0);
}

#[test]
fn test_abort_lets_outer_stages_finish() {
    let mut engine = Engine::new();
    engine.get(
        "/x",
        vec![
            trace_stage("outer"),
            handler(|c: &mut Context| {
                c.abort();
                c.append_header("X-Trace", "aborter");
                c.status(403);
            }),
            reply("unreachable"),
        ],
    );

    let rec = perform_request(&engine, Method::GET, "/x");
    assert_eq!(rec.status(), 403);
    assert_eq!(rec.header_all("x-trace"), vec!["outer-pre", "aborter", "outer-post"]);
}

#[test]
fn test_values_flow_between_stages() {
    let mut engine = Engine::new();
    engine.get(
        "/x",
        handlers![
            |c: &mut Context| c.set("tenant", "acme"),
            |c: &mut Context| {
                let tenant = c.get_string("tenant").unwrap_or("none").to_owned();
                c.string(200, tenant);
            }
        ],
    );

    assert_eq!(perform_request(&engine, Method::GET, "/x").body_string(), "acme");
}

#[test]
fn test_terminal_error_stage_renders_public_errors() {
    let error_reporter = handler(|c: &mut Context| {
        c.next();
        let public: Vec<String> = c
            .errors()
            .by_type(ErrorType::PUBLIC)
            .iter()
            .map(|e| e.to_string())
            .collect();
        if !public.is_empty() {
            c.json(422, &json!({ "errors": public }));
        }
    });

    let mut engine = Engine::new();
    engine.add_middleware(vec![error_reporter]);
    engine.post(
        "/orders",
        handlers![|c: &mut Context| {
            c.error(anyhow::anyhow!("quantity must be positive"))
                .set_type(ErrorType::PUBLIC);
            c.error(anyhow::anyhow!("db row 7 locked"))
                .set_type(ErrorType::PRIVATE);
        }],
    );

    let rec = perform_request(&engine, Method::POST, "/orders");
    assert_eq!(rec.status(), 422);
    assert_eq!(
        rec.body_json().unwrap(),
        json!({"errors": ["quantity must be positive"]})
    );
}

#[test]
fn test_logger_is_transparent() {
    let mut engine = Engine::new();
    engine.add_middleware(handlers![Logger::new().with_skip_paths(["/health"])]);
    engine.get("/health", handlers![reply("ok")]);
    engine.get("/work", handlers![|c: &mut Context| c.string(201, "done")]);

    assert_eq!(perform_request(&engine, Method::GET, "/health").body_string(), "ok");
    let rec = perform_request(&engine, Method::GET, "/work");
    assert_eq!(rec.status(), 201);
    assert_eq!(rec.body_string(), "done");
}

#[test]
fn test_request_id_generated_or_propagated() {
    let mut engine = Engine::new();
    engine.add_middleware(handlers![RequestIdMiddleware]);
    engine.get(
        "/id",
        handlers![|c: &mut Context| {
            let id = c.get_string("request_id").unwrap_or_default().to_owned();
            c.string(200, id);
        }],
    );

    let rec = perform_request(&engine, Method::GET, "/id");
    let generated = rec.header(REQUEST_ID_HEADER).expect("id header");
    assert_eq!(generated.len(), 26);
    assert_eq!(rec.body_string(), generated);

    let incoming = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    let mut req = request(Method::GET, "/id");
    req.headers_mut()
        .insert(REQUEST_ID_HEADER, incoming.parse().unwrap());
    let rec = perform(&engine, req);
    assert_eq!(rec.header(REQUEST_ID_HEADER).as_deref(), Some(incoming));
    assert_eq!(rec.body_string(), incoming);
}

fn basic(user: &str, password: &str) -> String {
    let token = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{password}"));
    format!("Basic {token}")
}

#[test]
fn test_basic_auth_guards_group() {
    let mut engine = Engine::new();
    engine.get("/public", handlers![reply("public")]);
    {
        let mut admin = engine.group(
            "/admin",
            handlers![BasicAuth::new([("alice", "secret")]).with_realm("Admin")],
        );
        admin.get(
            "/whoami",
            handlers![|c: &mut Context| {
                let user = c.get_string(AUTH_USER_KEY).unwrap_or_default().to_owned();
                c.string(200, user);
            }],
        );
    }

    assert_eq!(perform_request(&engine, Method::GET, "/public").status(), 200);

    let rec = perform_request(&engine, Method::GET, "/admin/whoami");
    assert_eq!(rec.status(), 401);
    assert_eq!(
        rec.header("www-authenticate").as_deref(),
        Some(r#"Basic realm="Admin""#)
    );

    let mut req = request(Method::GET, "/admin/whoami");
    req.headers_mut()
        .insert("Authorization", basic("alice", "wrong").parse().unwrap());
    assert_eq!(perform(&engine, req).status(), 401);

    let mut req = request(Method::GET, "/admin/whoami");
    req.headers_mut()
        .insert("Authorization", basic("alice", "secret").parse().unwrap());
    let rec = perform(&engine, req);
    assert_eq!(rec.status(), 200);
    assert_eq!(rec.body_string(), "alice");
}

#[test]
fn test_metrics_counts_requests() {
    let metrics = Arc::new(MetricsMiddleware::new());
    let mut engine = Engine::new();
    engine.add_middleware(vec![Arc::clone(&metrics) as HandlerFunc]);
    engine.get("/ok", handlers![reply("ok")]);
    engine.get("/boom", handlers![|c: &mut Context| c.status(503)]);
    engine.get("/metrics", vec![metrics.endpoint()]);

    assert_eq!(perform_request(&engine, Method::GET, "/ok").status(), 200);
    assert_eq!(perform_request(&engine, Method::GET, "/boom").status(), 503);
    assert_eq!(perform_request(&engine, Method::GET, "/missing").status(), 404);

    assert_eq!(metrics.request_count(), 3);
    assert_eq!(metrics.client_errors(), 1);
    assert_eq!(metrics.server_errors(), 1);
    assert_eq!(metrics.in_flight(), 0);

    let rec = perform_request(&engine, Method::GET, "/metrics");
    assert_eq!(rec.status(), 200);
    assert!(rec
        .header("content-type")
        .is_some_and(|ct| ct.starts_with("text/plain")));
    assert!(rec.body_string().contains("brrtframe_requests_total"));
}
