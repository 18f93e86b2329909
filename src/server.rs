//! Graceful HTTP server.
//!
//! # Lifecycle
//!
//! [`Server::start`] runs three things concurrently and returns when one of
//! them decides the outcome:
//!
//! 1. The accept loop. It spawns one task per connection and counts the
//!    connection in the [`ConnTracker`]. It ends with
//!    [`Error::ListenerClosed`] when a stop fires (expected, ignored) or with
//!    a fatal accept error (returned to the caller).
//! 2. A graceful stop (SIGINT, SIGQUIT, SIGTERM or
//!    [`ShutdownHandle::graceful_stop`]). The listener closes, every live
//!    connection has keep-alive turned off and finishes its current request,
//!    and once the tracker reads zero `start` returns
//!    [`Stopped::Gracefully`].
//! 3. A forced stop ([`ShutdownHandle::force_stop`]). The listener closes,
//!    live connections are dropped and `start` returns [`Stopped::Killed`]
//!    without waiting.
//!
//! Only the first stop request counts.
//!
//! # Behind an orchestrator
//!
//! Kubernetes sends SIGTERM and waits `terminationGracePeriodSeconds`
//! (default 30 s) before SIGKILL. Keep the slowest request below that.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::app::App;
use crate::config::ServerConfig;
use crate::conn::ConnTracker;
use crate::error::{Error, Result};
use crate::output::{Color, colorize};
use crate::request::Request;
use crate::shutdown::{ShutdownHandle, StopMode, StopSignal};
use crate::{signals, tls};

const BANNER: &str = r"
   ___  _ __ ___| |__   __ _ _ __ __| |
  / _ \| '__/ __| '_ \ / _` | '__/ _` |
 | (_) | | | (__| | | | (_| | | | (_| |
  \___/|_|  \___|_| |_|\__,_|_|  \__,_|";

/// Accept-retry backoff bounds for transient errors.
const MIN_BACKOFF: Duration = Duration::from_millis(5);
const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// How a server run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stopped {
    /// Every in-flight connection finished.
    Gracefully,
    /// Stopped without draining.
    Killed,
}

impl fmt::Display for Stopped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gracefully => f.write_str("server stopped gracefully"),
            Self::Killed => f.write_str("server stopped: process killed"),
        }
    }
}

/// Serves an [`App`] on a listener until stopped.
///
/// ```rust,no_run
/// use orchard::{App, Server, ServerConfig};
/// use tokio::net::TcpListener;
///
/// # async fn run() -> orchard::Result<()> {
/// let app = App::new();
/// let config = ServerConfig::default().with_handle_signals(false);
/// let server = Server::new(app, config);
/// let stop = server.shutdown_handle();
///
/// tokio::spawn(async move {
///     tokio::time::sleep(std::time::Duration::from_secs(60)).await;
///     stop.graceful_stop();
/// });
///
/// let listener = TcpListener::bind("127.0.0.1:3000").await?;
/// println!("{}", server.start(listener).await?);
/// # Ok(())
/// # }
/// ```
pub struct Server {
    app: App,
    config: ServerConfig,
    shutdown: ShutdownHandle,
    connections: ConnTracker,
}

impl Server {
    pub fn new(app: App, config: ServerConfig) -> Self {
        Self {
            app,
            config,
            shutdown: ShutdownHandle::new(),
            connections: ConnTracker::new(),
        }
    }

    /// A handle that stops this server. Obtain it before calling `start`.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// The live-connection counter of this server.
    pub fn connections(&self) -> ConnTracker {
        self.connections.clone()
    }

    /// Serves plain HTTP on `listener` until stopped.
    pub async fn start(self, listener: TcpListener) -> Result<Stopped> {
        let addr = listener.local_addr()?;
        self.announce(format!("orchard listening on {}", colorize(Color::Green, &addr.to_string())));
        info!(%addr, "orchard listening");
        self.run(listener, None).await
    }

    /// Serves HTTPS on `listener` until stopped.
    ///
    /// Fails with [`Error::Config`] before accepting anything if the
    /// certificate or key cannot be loaded.
    pub async fn start_tls(
        self,
        listener: TcpListener,
        cert: impl Into<PathBuf>,
        key: impl Into<PathBuf>,
    ) -> Result<Stopped> {
        let acceptor = tls::load_acceptor(&cert.into(), &key.into(), self.config.http2)?;
        let addr = listener.local_addr()?;
        self.announce(format!("orchard listening TLS on {}", colorize(Color::Green, &addr.to_string())));
        info!(%addr, "orchard listening (tls)");
        self.run(listener, Some(acceptor)).await
    }

    fn announce(&self, line: String) {
        let output = self.app.output();
        output.write_line(colorize(Color::Red, BANNER));
        output.write_line(line);
    }

    async fn run(self, listener: TcpListener, tls: Option<TlsAcceptor>) -> Result<Stopped> {
        let signals = if self.config.handle_signals {
            Some(signals::listen(self.shutdown.clone())?)
        } else {
            None
        };

        let outcome = self.serve_until_stopped(listener, tls).await;

        if let Some(task) = signals {
            task.abort();
        }
        match &outcome {
            Ok(stopped) => info!("{stopped}"),
            Err(e) => error!("server error: {e}"),
        }
        outcome
    }

    async fn serve_until_stopped(&self, listener: TcpListener, tls: Option<TlsAcceptor>) -> Result<Stopped> {
        let shared = Arc::new(ConnShared::new(self.app.clone(), &self.config));
        let mut accept = tokio::spawn(accept_loop(
            listener,
            tls,
            shared,
            self.connections.clone(),
            self.shutdown.clone(),
        ));
        let mut accept_done = false;
        let mut stop = self.shutdown.subscribe();

        loop {
            tokio::select! {
                res = &mut accept, if !accept_done => {
                    accept_done = true;
                    match res {
                        Ok(err) if err.is_listener_closed() => {}
                        Ok(err) => return Err(err),
                        Err(join) => return Err(Error::Io(join.into())),
                    }
                }
                mode = stop.recv() => match mode {
                    StopMode::Graceful => {
                        info!(in_flight = self.connections.active(), "graceful stop, draining connections");
                        // The accept loop is the only thing that adds to the
                        // tracker, so it must be gone before the count means
                        // anything.
                        if !accept_done {
                            let _ = (&mut accept).await;
                        }
                        self.connections.wait_idle().await;
                        return Ok(Stopped::Gracefully);
                    }
                    StopMode::Forced => {
                        accept.abort();
                        warn!(in_flight = self.connections.active(), "forced stop, dropping connections");
                        return Ok(Stopped::Killed);
                    }
                },
            }
        }
    }
}

// ── Accept loop ───────────────────────────────────────────────────────────────

/// State every connection task needs.
struct ConnShared {
    app: App,
    builder: ConnBuilder<TokioExecutor>,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl ConnShared {
    fn new(app: App, config: &ServerConfig) -> Self {
        let mut builder = ConnBuilder::new(TokioExecutor::new());
        builder
            .http1()
            .timer(TokioTimer::new())
            .header_read_timeout(config.read_timeout);
        if !config.http2 {
            builder = builder.http1_only();
        }
        Self {
            app,
            builder,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
        }
    }
}

/// Accepts until a stop fires or the listener fails for good.
///
/// Always returns an error: `ListenerClosed` for a stop, anything else for a
/// failure. The listener is dropped on return.
async fn accept_loop(
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    shared: Arc<ConnShared>,
    connections: ConnTracker,
    shutdown: ShutdownHandle,
) -> Error {
    let mut stop = shutdown.subscribe();
    let mut backoff = Duration::ZERO;

    loop {
        let accepted = tokio::select! {
            biased;
            _ = stop.recv() => return Error::ListenerClosed,
            res = listener.accept() => res,
        };

        let (stream, peer) = match accepted {
            Ok(conn) => {
                backoff = Duration::ZERO;
                conn
            }
            Err(e) if is_transient(&e) => {
                backoff = (backoff * 2).clamp(MIN_BACKOFF, MAX_BACKOFF);
                warn!("accept error: {e}; retrying in {backoff:?}");
                tokio::time::sleep(backoff).await;
                continue;
            }
            Err(e) => return Error::Io(e),
        };

        let guard = connections.track();
        let shared = Arc::clone(&shared);
        let tls = tls.clone();
        let stop = shutdown.subscribe();

        tokio::spawn(async move {
            let _guard = guard;
            match tls {
                None => serve_connection(TokioIo::new(stream), peer, &shared, stop).await,
                Some(acceptor) => {
                    match tokio::time::timeout(shared.read_timeout, acceptor.accept(stream)).await {
                        Ok(Ok(stream)) => serve_connection(TokioIo::new(stream), peer, &shared, stop).await,
                        Ok(Err(e)) => debug!(%peer, "tls handshake failed: {e}"),
                        Err(_) => debug!(%peer, "tls handshake timed out"),
                    }
                }
            }
        });
    }
}

/// Errors after which accepting again can succeed.
fn is_transient(e: &io::Error) -> bool {
    use io::ErrorKind::*;

    // ENFILE, EMFILE: out of file descriptors until some close.
    #[cfg(unix)]
    const FD_EXHAUSTED: &[i32] = &[23, 24];
    #[cfg(not(unix))]
    const FD_EXHAUSTED: &[i32] = &[];

    matches!(e.kind(), ConnectionAborted | ConnectionReset | Interrupted | WouldBlock | TimedOut)
        || e.raw_os_error().is_some_and(|code| FD_EXHAUSTED.contains(&code))
}

// ── Connection ────────────────────────────────────────────────────────────────

async fn serve_connection<I>(io: TokioIo<I>, peer: SocketAddr, shared: &ConnShared, mut stop: StopSignal)
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let app = shared.app.clone();
    let write_timeout = shared.write_timeout;
    let svc = service_fn(move |req| {
        let app = app.clone();
        async move { dispatch(app, req, peer, write_timeout).await }
    });

    let conn = shared.builder.serve_connection(io, svc);
    tokio::pin!(conn);

    let res = tokio::select! {
        res = conn.as_mut() => res,
        mode = stop.recv() => match mode {
            StopMode::Graceful => {
                conn.as_mut().graceful_shutdown();
                conn.as_mut().await
            }
            StopMode::Forced => return,
        },
    };
    if let Err(e) = res {
        debug!(%peer, "connection error: {e}");
    }
}

/// Buffers one request, runs it through the app and converts the reply.
///
/// An `Err` makes hyper drop the connection; that only happens when the
/// body cannot be read or the write timeout elapses.
async fn dispatch(
    app: App,
    req: hyper::Request<Incoming>,
    peer: SocketAddr,
    write_timeout: Duration,
) -> Result<http::Response<Full<Bytes>>> {
    let handled = async {
        let (parts, body) = req.into_parts();
        let body = body.collect().await?.to_bytes();
        let req = Request::from_parts(parts, body).with_remote_addr(peer);
        Ok::<_, Error>(app.handle_request(req).await)
    };

    match tokio::time::timeout(write_timeout, handled).await {
        Ok(res) => Ok(res?.into_inner()),
        Err(_) => {
            warn!(%peer, timeout = ?write_timeout, "write timeout, dropping connection");
            Err(Error::Timeout(write_timeout))
        }
    }
}
