#![allow(dead_code)]

use brrtframe::{handler, Context, HandlerFunc};

/// A stage that appends `X-Trace: <name>-pre` before and `<name>-post`
/// after the rest of the chain.
pub fn trace_stage(name: &'static str) -> HandlerFunc {
    handler(move |c: &mut Context| {
        c.append_header("X-Trace", &format!("{name}-pre"));
        c.next();
        c.append_header("X-Trace", &format!("{name}-post"));
    })
}

/// A terminal stage that answers `text` with 200.
pub fn reply(text: &'static str) -> HandlerFunc {
    handler(move |c: &mut Context| c.string(200, text))
}

/// Echoes the matched pattern and every captured parameter as
/// `pattern|k=v|k=v`.
pub fn echo_params() -> HandlerFunc {
    handler(|c: &mut Context| {
        let mut out = c.full_path().to_owned();
        for (key, value) in c.params() {
            out.push('|');
            out.push_str(key);
            out.push('=');
            out.push_str(value);
        }
        c.string(200, out);
    })
}

pub mod test_server {
    use std::io::{Read, Write};
    use std::net::{Shutdown, SocketAddr, TcpStream};
    use std::sync::Once;
    use std::time::Duration;

    use brrtframe::server::{HttpServer, ServerConfig, ServerHandle};
    use brrtframe::Engine;

    static MAY_INIT: Once = Once::new();

    pub fn setup_may_runtime() {
        MAY_INIT.call_once(|| {
            may::config().set_stack_size(0x8000);
        });
    }

    /// Serves `engine` on an ephemeral port; stopped on drop.
    pub struct TestServer {
        handle: Option<ServerHandle>,
        pub addr: SocketAddr,
    }

    impl TestServer {
        pub fn start(engine: Engine) -> Self {
            Self::start_with(engine, ServerConfig::default())
        }

        pub fn start_with(engine: Engine, mut config: ServerConfig) -> Self {
            setup_may_runtime();
            config.addr = "127.0.0.1:0".to_owned();
            config.stack_size = 0x8000;
            let handle = HttpServer::new(engine.into_shared(), config)
                .start()
                .expect("server should start");
            handle.wait_ready().expect("server should accept connections");
            let addr = handle.addr();
            Self {
                handle: Some(handle),
                addr,
            }
        }

        pub fn connect(&self) -> TcpStream {
            let stream = TcpStream::connect(self.addr).expect("connect");
            stream
                .set_read_timeout(Some(Duration::from_secs(5)))
                .expect("set timeout");
            stream
        }

        /// Send raw bytes on a fresh connection and read until the server
        /// closes it.
        pub fn roundtrip(&self, raw: &str) -> String {
            let mut stream = self.connect();
            stream.write_all(raw.as_bytes()).expect("write request");
            stream.shutdown(Shutdown::Write).ok();
            let mut out = String::new();
            stream.read_to_string(&mut out).ok();
            out
        }
    }

    impl Drop for TestServer {
        fn drop(&mut self) {
            if let Some(handle) = self.handle.take() {
                handle.stop();
            }
        }
    }

    /// Status code from the first line of a raw response.
    pub fn status_of(response: &str) -> u16 {
        response
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }

    /// Value of header `name` (case-insensitive) in a raw response.
    pub fn header_of<'a>(response: &'a str, name: &str) -> Option<&'a str> {
        let head = response.split("\r\n\r\n").next()?;
        head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim())
        })
    }

    pub fn body_of(response: &str) -> &str {
        response.split_once("\r\n\r\n").map_or("", |(_, body)| body)
    }
}
