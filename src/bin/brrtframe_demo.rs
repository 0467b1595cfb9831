//! Small demo service for brrtframe.
//!
//! ```text
//! brrtframe-demo --addr 0.0.0.0:8080 --user admin:s3cret
//! curl localhost:8080/ping
//! curl localhost:8080/hello/world
//! curl -u admin:s3cret localhost:8080/v1/whoami
//! curl localhost:8080/metrics
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context as _, Result};
use brrtframe::logging::{init_logging_with_config, LogConfig, LogFormat};
use brrtframe::middleware::{
    BasicAuth, Logger, MetricsMiddleware, Recovery, RequestIdMiddleware, AUTH_USER_KEY,
};
use brrtframe::server::{HttpServer, ServerConfig};
use brrtframe::{handlers, Context, Engine, EngineConfig, HandlerFunc, Routing};
use clap::Parser;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

#[derive(Parser)]
#[command(name = "brrtframe-demo")]
#[command(about = "Demo service built on brrtframe", long_about = None)]
struct Cli {
    /// Address to listen on (overrides the config file)
    #[arg(short, long, env = "BRRTF_ADDR")]
    addr: Option<String>,

    /// TOML file with `[engine]` and `[server]` tables
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log output format: json or pretty
    #[arg(long, env = "BRRTF_LOG_FORMAT", default_value = "pretty")]
    log_format: String,

    /// Basic auth account for /v1, as user:password (repeatable)
    #[arg(short, long = "user", value_name = "USER:PASSWORD")]
    users: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    engine: EngineConfig,
    server: ServerConfig,
}

impl FileConfig {
    fn load(path: Option<&PathBuf>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                toml::from_str(&text)
                    .with_context(|| format!("failed to parse {}", path.display()))?
            }
            None => FileConfig::default(),
        };
        config.engine.apply_env();
        config.server.apply_env();
        Ok(config)
    }
}

fn parse_account(account: &str) -> Result<(String, String)> {
    match account.split_once(':') {
        Some((user, password)) if !user.is_empty() => Ok((user.to_owned(), password.to_owned())),
        _ => bail!("invalid account {account:?}, expected USER:PASSWORD"),
    }
}

fn build_engine(config: EngineConfig, accounts: Vec<(String, String)>) -> Engine {
    let metrics = Arc::new(MetricsMiddleware::new());

    let mut engine = Engine::with_config(config);
    engine.add_middleware(vec![
        brrtframe::handler(Logger::new().with_skip_paths(["/metrics"])),
        brrtframe::handler(Recovery::new()),
        brrtframe::handler(RequestIdMiddleware),
        Arc::clone(&metrics) as HandlerFunc,
    ]);
    engine.no_route(handlers![|c: &mut Context| {
        let path = c.path().to_owned();
        c.json(404, &json!({"error": "not found", "path": path}));
    }]);

    engine.get(
        "/ping",
        handlers![|c: &mut Context| c.json(200, &json!({"message": "pong"}))],
    );
    engine.get(
        "/hello/:name",
        handlers![|c: &mut Context| {
            let greeting = format!("hello {}", c.param("name"));
            c.string(200, greeting);
        }],
    );
    engine.get(
        "/files/*path",
        handlers![|c: &mut Context| {
            let path = c.param("path").to_owned();
            c.json(200, &json!({ "path": path }));
        }],
    );
    engine.get("/metrics", vec![metrics.endpoint()]);

    if accounts.is_empty() {
        info!("No --user given, /v1 routes are not registered");
    } else {
        let mut v1 = engine.group("/v1", handlers![BasicAuth::new(accounts)]);
        v1.get(
            "/whoami",
            handlers![|c: &mut Context| {
                let user = c.get_string(AUTH_USER_KEY).unwrap_or_default().to_owned();
                c.json(200, &json!({ "user": user }));
            }],
        );
        v1.post(
            "/echo",
            handlers![|c: &mut Context| match c.should_bind_json::<serde_json::Value>() {
                Ok(body) => c.json(200, &body),
                Err(e) => {
                    c.abort_with_error(400, e);
                }
            }],
        );
    }
    engine
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig {
        format: LogFormat::parse(&cli.log_format),
        ..LogConfig::from_env()
    };
    let _guard = init_logging_with_config(&log_config)?;

    let mut config = FileConfig::load(cli.config.as_ref())?;
    if let Some(addr) = cli.addr {
        config.server.addr = addr;
    }
    let accounts = cli
        .users
        .iter()
        .map(String::as_str)
        .map(parse_account)
        .collect::<Result<Vec<_>>>()?;

    may::config().set_stack_size(config.server.stack_size);
    let engine = build_engine(config.engine, accounts);
    let handle = HttpServer::new(engine.into_shared(), config.server)
        .start()
        .context("failed to start server")?;
    info!(addr = %handle.addr(), "Demo service ready");

    if handle.join().is_err() {
        bail!("server stopped unexpectedly");
    }
    Ok(())
}
