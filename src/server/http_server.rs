use std::io::{self, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use may::coroutine::{self, JoinHandle};
use may::net::{TcpListener, TcpStream as CoStream};
use tracing::{debug, error, info, warn};

use super::request::{ReadError, RequestReader};
use super::response::ConnWriter;
use super::ServerConfig;
use crate::context::{BoxedRawResponse, Cancellation, RemoteAddr};
use crate::engine::Engine;
use crate::middleware::panic_message;

/// Serves an [`Engine`] over HTTP/1.1 on may coroutines.
///
/// One coroutine accepts connections; each connection gets its own coroutine
/// that reads requests in order and hands them to [`Engine::serve_http`].
pub struct HttpServer {
    engine: Arc<Engine>,
    config: ServerConfig,
}

/// Handle to a running [`HttpServer`].
pub struct ServerHandle {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl ServerHandle {
    /// Address the listener is bound to. Useful after binding port 0.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Poll the listener until it accepts a connection.
    ///
    /// # Errors
    ///
    /// Returns `TimedOut` if the server is not reachable within ~250ms.
    pub fn wait_ready(&self) -> io::Result<()> {
        for _ in 0..50 {
            if TcpStream::connect(self.addr).is_ok() {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(5));
        }
        Err(io::Error::new(io::ErrorKind::TimedOut, "server not ready"))
    }

    /// Stop accepting connections. Connections already open finish their
    /// current request.
    pub fn stop(self) {
        // SAFETY: cancel() is unsafe in may because the cancelled coroutine
        // unwinds at its next blocking point. The accept loop holds no locks
        // and owns nothing that needs cleanup beyond its listener.
        unsafe {
            self.handle.coroutine().cancel();
        }
        if self.handle.join().is_err() {
            debug!(addr = %self.addr, "Accept loop ended by cancellation");
        }
        info!(addr = %self.addr, "Server stopped");
    }

    /// Block until the accept loop exits.
    ///
    /// # Errors
    ///
    /// Returns the panic payload if the accept loop panicked.
    pub fn join(self) -> thread::Result<()> {
        self.handle.join()
    }
}

impl HttpServer {
    #[must_use]
    pub fn new(engine: Arc<Engine>, config: ServerConfig) -> Self {
        Self { engine, config }
    }

    /// Bind `config.addr` and start serving.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or cannot be bound.
    pub fn start(self) -> io::Result<ServerHandle> {
        let addr = self
            .config
            .addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid address"))?;
        let listener = TcpListener::bind(addr)?;
        let addr = listener.local_addr()?;
        let config = Arc::new(self.config);
        let engine = self.engine;

        info!(
            addr = %addr,
            stack_size = config.stack_size,
            keep_alive = config.keep_alive,
            "Server listening"
        );
        engine.log_routes();

        let stack_size = config.stack_size;
        // SAFETY: may's spawn is unsafe because coroutines must not block the
        // worker thread with non-may I/O or hold thread-local references. The
        // accept loop only uses may's networking types and owns its captures.
        let handle = unsafe {
            coroutine::Builder::new()
                .name("brrtframe-accept".to_owned())
                .stack_size(stack_size)
                .spawn(move || accept_loop(&listener, &engine, &config))
        }?;
        Ok(ServerHandle { addr, handle })
    }
}

fn accept_loop(listener: &TcpListener, engine: &Arc<Engine>, config: &Arc<ServerConfig>) {
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "Accept failed");
                continue;
            }
        };
        let engine = Arc::clone(engine);
        let config = Arc::clone(config);
        // SAFETY: as for the accept loop; the connection coroutine owns the
        // stream and shares the engine only through `Arc`.
        let spawned = unsafe {
            coroutine::Builder::new()
                .stack_size(config.stack_size)
                .spawn(move || serve_connection(stream, &engine, &config))
        };
        if let Err(e) = spawned {
            error!(error = %e, "Failed to spawn connection coroutine");
        }
    }
}

fn serve_connection(stream: CoStream, engine: &Engine, config: &ServerConfig) {
    let peer = match stream.peer_addr() {
        Ok(peer) => peer,
        Err(e) => {
            debug!(error = %e, "Connection closed before it was served");
            return;
        }
    };
    if let Err(e) = stream.set_read_timeout(config.read_timeout()) {
        warn!(error = %e, "Failed to set read timeout");
    }
    let write_half = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, peer = %peer, "Failed to clone connection");
            return;
        }
    };
    debug!(peer = %peer, "Connection opened");

    let mut reader = RequestReader::new(stream, config.max_header_bytes, config.max_body_bytes);
    let mut raw: BoxedRawResponse = Box::new(ConnWriter::new(write_half, config.keep_alive));

    loop {
        let mut request = match reader.next_request() {
            Ok(Some(request)) => request,
            Ok(None) => break,
            Err(e) => {
                reject(&mut reader, &e, peer);
                break;
            }
        };

        let cancellation = match config.request_timeout() {
            Some(timeout) => Cancellation::with_deadline(Instant::now() + timeout),
            None => Cancellation::new(),
        };
        request.extensions_mut().insert(cancellation);
        request.extensions_mut().insert(RemoteAddr(peer));

        raw = match catch_unwind(AssertUnwindSafe(|| engine.serve_http(request, raw))) {
            Ok(raw) => raw,
            Err(payload) => {
                error!(
                    peer = %peer,
                    panic = %panic_message(payload.as_ref()),
                    "Handler chain panicked, closing connection"
                );
                return;
            }
        };
        if !raw.keep_alive() {
            break;
        }
    }
    debug!(peer = %peer, "Connection closed");
}

/// Answer an unreadable request with a bare status, then give up on the
/// connection.
fn reject(reader: &mut RequestReader<CoStream>, err: &ReadError, peer: SocketAddr) {
    let Some(code) = err.status() else {
        debug!(peer = %peer, error = %err, "Connection dropped");
        return;
    };
    warn!(peer = %peer, error = %err, status = code, "Rejecting request");
    let reason = http::StatusCode::from_u16(code)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Bad Request");
    let response =
        format!("HTTP/1.1 {code} {reason}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
    if let Err(e) = reader.get_mut().write_all(response.as_bytes()) {
        debug!(peer = %peer, error = %e, "Failed to send rejection");
    }
}
