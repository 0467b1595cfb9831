//! Route groups: prefix joining and stage inheritance.

use brrtframe::testing::perform_request;
use brrtframe::{handlers, Context, Engine, Routing};
use http::Method;

mod common;
use common::{echo_params, reply, trace_stage};

#[test]
fn test_group_prefix_equals_direct_registration() {
    let mut grouped = Engine::new();
    {
        let mut api = grouped.group("/api", handlers![]);
        api.get("/users/:id", handlers![echo_params()]);
        api.get("/", handlers![reply("root")]);
    }
    let mut direct = Engine::new();
    direct.get("/api/users/:id", handlers![echo_params()]);
    direct.get("/api/", handlers![reply("root")]);

    for path in ["/api/users/5", "/api/", "/api", "/api/users"] {
        let a = perform_request(&grouped, Method::GET, path);
        let b = perform_request(&direct, Method::GET, path);
        assert_eq!(a.status(), b.status(), "{path}");
        assert_eq!(a.body(), b.body(), "{path}");
        assert_eq!(a.header("location"), b.header("location"), "{path}");
    }

    let paths: Vec<_> = grouped.routes().iter().map(|r| r.path.clone()).collect();
    assert_eq!(paths, vec!["/api/users/:id", "/api/"]);
}

#[test]
fn test_nested_groups_accumulate_prefix_and_stages() {
    let mut engine = Engine::new();
    engine.add_middleware(vec![trace_stage("engine")]);
    {
        let mut v1 = engine.group("/v1", vec![trace_stage("v1")]);
        let mut admin = v1.group("admin", vec![trace_stage("admin")]);
        admin.delete(
            "/users/:id",
            vec![
                trace_stage("route"),
                brrtframe::handler(|c: &mut Context| c.status(204)),
            ],
        );
    }

    let rec = perform_request(&engine, Method::DELETE, "/v1/admin/users/3");
    assert_eq!(rec.status(), 204);
    assert_eq!(
        rec.header_all("x-trace"),
        vec![
            "engine-pre",
            "v1-pre",
            "admin-pre",
            "route-pre",
            "route-post",
            "admin-post",
            "v1-post",
            "engine-post",
        ]
    );
    assert_eq!(engine.routes()[0].handler_count, 5);
}

#[test]
fn test_group_middleware_added_later_applies_to_later_routes() {
    let mut engine = Engine::new();
    {
        let mut g = engine.group("/g", handlers![]);
        g.get("/early", handlers![|c: &mut Context| c.status(204)]);
        g.add_middleware(vec![trace_stage("late")]);
        g.get("/late", handlers![|c: &mut Context| c.status(204)]);
        assert_eq!(g.base_path(), "/g");
        assert_eq!(g.handlers().len(), 1);
    }

    let early = perform_request(&engine, Method::GET, "/g/early");
    assert!(early.header_all("x-trace").is_empty());
    let late = perform_request(&engine, Method::GET, "/g/late");
    assert_eq!(late.header_all("x-trace"), vec!["late-pre", "late-post"]);
}

#[test]
fn test_sibling_groups_do_not_share_stages() {
    let mut engine = Engine::new();
    {
        let mut a = engine.group("/a", vec![trace_stage("a")]);
        a.get("/x", handlers![|c: &mut Context| c.status(204)]);
    }
    {
        let mut b = engine.group("/b", vec![trace_stage("b")]);
        b.get("/x", handlers![|c: &mut Context| c.status(204)]);
    }

    assert_eq!(
        perform_request(&engine, Method::GET, "/b/x").header_all("x-trace"),
        vec!["b-pre", "b-post"]
    );
}

#[test]
fn test_group_match_methods() {
    let mut engine = Engine::new();
    {
        let mut g = engine.group("/items", handlers![]);
        g.match_methods(&[Method::GET, Method::POST], "/:id", handlers![echo_params()]);
    }

    assert_eq!(perform_request(&engine, Method::GET, "/items/1").status(), 200);
    assert_eq!(perform_request(&engine, Method::POST, "/items/1").status(), 200);
    let rec = perform_request(&engine, Method::PUT, "/items/1");
    assert_eq!(rec.status(), 405);
    assert_eq!(rec.header("allow").as_deref(), Some("GET, POST"));
}
