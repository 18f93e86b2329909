//! The routing and middleware facade.
//!
//! An [`App`] is the root view over one shared route table and one set of
//! settings. [`App::group`] returns a [`Group`]: another view over the same
//! table with a longer prefix and its own copy of the middleware chain and
//! bound context.
//!
//! ```text
//! App  prefix "/"        chain [log]          ─┐
//!  └─ Group "/admin"     chain [log, auth]     ├─ one RouteTable, one Settings
//!      └─ Group "/admin/v2" (reset) chain []  ─┘
//! ```
//!
//! Routes, middleware and settings are meant to be configured before
//! serving starts.

use std::ops::Deref;
use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use http::HeaderValue;
use http::header::{ALLOW, SERVER};
use parking_lot::RwLock;
use tokio::net::TcpListener;
use tracing::debug;

use crate::access_log::RequestLine;
use crate::config::ServerConfig;
use crate::context::Context;
use crate::error::Result;
use crate::handler::{BoxedRawHandler, DefaultErrorHandler, ErrorHandler, Handler, RawHandler};
use crate::method::Method;
use crate::middleware::Chain;
use crate::output::Output;
use crate::request::Request;
use crate::response::Response;
use crate::router::{Endpoint, Lookup, RouteTable, join_paths};
use crate::server::{Server, Stopped};
use crate::static_files::StaticFiles;
use crate::status::Status;
use crate::values::Values;

/// Value of the `Server` header added to every response.
pub const SERVER_NAME: &str = concat!("orchard/", env!("CARGO_PKG_VERSION"));

/// Route registration, middleware and serving.
///
/// Cloning is cheap and yields the same view.
///
/// ```rust,no_run
/// use orchard::{App, Context, Result, Status};
///
/// async fn hello(ctx: &mut Context) -> Result<()> {
///     let name = ctx.param("name").to_owned();
///     ctx.text(Status::Ok, format!("hello {name}"))
/// }
///
/// #[tokio::main]
/// async fn main() -> Result<()> {
///     let app = App::new();
///     app.get("/hello/:name", hello);
///     app.serve(3000).await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct App {
    shared: Arc<Shared>,
    scope: Scope,
}

struct Shared {
    routes: RwLock<RouteTable>,
    settings: RwLock<Settings>,
}

/// Per-view state. Routes capture `chain` and `values` by handle.
#[derive(Clone)]
struct Scope {
    prefix: String,
    chain: Chain,
    values: Arc<ArcSwap<Values>>,
}

#[derive(Clone)]
struct Settings {
    error_handler: Arc<dyn ErrorHandler>,
    not_found: Option<BoxedRawHandler>,
    method_not_allowed: Option<BoxedRawHandler>,
    output: Output,
    access_log: bool,
    http2: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            error_handler: Arc::new(DefaultErrorHandler),
            not_found: None,
            method_not_allowed: None,
            output: Output::default(),
            access_log: false,
            http2: false,
        }
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                routes: RwLock::new(RouteTable::default()),
                settings: RwLock::new(Settings::default()),
            }),
            scope: Scope {
                prefix: "/".to_owned(),
                chain: Chain::new(),
                values: Arc::new(ArcSwap::from_pointee(Values::new())),
            },
        }
    }

    /// The path prefix routes registered through this view receive.
    pub fn prefix(&self) -> &str {
        &self.scope.prefix
    }

    // ── Routes ────────────────────────────────────────────────────────────────

    /// Registers `handler` for `method` on `prefix + path`.
    ///
    /// # Panics
    ///
    /// Panics if the pattern is malformed or conflicts with an existing
    /// route. Use [`try_on`](Self::try_on) to get the error instead.
    pub fn on<H: Handler>(&self, method: Method, path: &str, handler: H) -> &Self {
        if let Err(e) = self.try_on(method, path, handler) {
            panic!("{e}");
        }
        self
    }

    pub fn try_on<H: Handler>(&self, method: Method, path: &str, handler: H) -> Result<&Self> {
        let pattern = join_paths(&self.scope.prefix, path);
        let endpoint = Endpoint::Chained {
            handler: Arc::new(handler),
            chain: self.scope.chain.clone(),
            values: Arc::clone(&self.scope.values),
        };
        self.insert(method, &pattern, endpoint)?;
        Ok(self)
    }

    pub fn get<H: Handler>(&self, path: &str, handler: H) -> &Self {
        self.on(Method::Get, path, handler)
    }

    pub fn post<H: Handler>(&self, path: &str, handler: H) -> &Self {
        self.on(Method::Post, path, handler)
    }

    pub fn put<H: Handler>(&self, path: &str, handler: H) -> &Self {
        self.on(Method::Put, path, handler)
    }

    pub fn patch<H: Handler>(&self, path: &str, handler: H) -> &Self {
        self.on(Method::Patch, path, handler)
    }

    pub fn delete<H: Handler>(&self, path: &str, handler: H) -> &Self {
        self.on(Method::Delete, path, handler)
    }

    pub fn head<H: Handler>(&self, path: &str, handler: H) -> &Self {
        self.on(Method::Head, path, handler)
    }

    pub fn options<H: Handler>(&self, path: &str, handler: H) -> &Self {
        self.on(Method::Options, path, handler)
    }

    /// Registers a raw handler on the absolute `path`.
    ///
    /// The group prefix, middleware and error handler do not apply.
    ///
    /// # Panics
    ///
    /// Same as [`on`](Self::on).
    pub fn handle<R: RawHandler>(&self, method: Method, path: &str, handler: R) -> &Self {
        let pattern = join_paths("", path);
        if let Err(e) = self.insert(method, &pattern, Endpoint::Raw(handler.into_boxed_raw())) {
            panic!("{e}");
        }
        self
    }

    /// Serves files under `dir` at the absolute `prefix`.
    ///
    /// A directory serves its `index.html`. Paths that would leave `dir`
    /// are answered with 404.
    pub fn static_files(&self, prefix: &str, dir: impl Into<PathBuf>) -> &Self {
        let files = Arc::new(StaticFiles::new(dir));
        let serve = move |req: Request| {
            let files = Arc::clone(&files);
            async move { files.serve(req).await }
        };
        let root = join_paths("", prefix);
        let endpoint = Endpoint::Raw(serve.into_boxed_raw());
        let patterns = [join_paths(&root, "*filepath"), root.clone()];
        for pattern in patterns.iter().filter(|p| p.as_str() != "/") {
            if let Err(e) = self.insert(Method::Get, pattern, endpoint.clone()) {
                panic!("{e}");
            }
        }
        self
    }

    fn insert(&self, method: Method, pattern: &str, endpoint: Endpoint) -> Result<()> {
        self.shared.routes.write().insert(method, pattern, endpoint)?;
        debug!(%method, path = pattern, "route registered");
        Ok(())
    }

    // ── Middleware and carried context ───────────────────────────────────────

    /// Appends middleware to this view's chain.
    ///
    /// Applies to every route registered through this view, before or after
    /// this call, and to groups created after it.
    pub fn use_middleware<H: Handler>(&self, middleware: H) -> &Self {
        self.scope.chain.push(Arc::new(middleware));
        self
    }

    /// Sets the base carried context every request through this view starts
    /// with.
    pub fn bind_context(&self, values: Values) -> &Self {
        self.scope.values.store(Arc::new(values));
        self
    }

    /// A view with `prefix` appended, starting from a copy of this view's
    /// middleware and bound context.
    pub fn group(&self, prefix: &str) -> Group {
        Group(App {
            shared: Arc::clone(&self.shared),
            scope: Scope {
                prefix: join_paths(&self.scope.prefix, prefix),
                chain: self.scope.chain.fork(),
                values: Arc::new(ArcSwap::new(self.scope.values.load_full())),
            },
        })
    }

    // ── Settings ─────────────────────────────────────────────────────────────

    /// Replaces the centralized error handler for every view.
    pub fn set_error_handler<E: ErrorHandler>(&self, handler: E) -> &Self {
        self.shared.settings.write().error_handler = Arc::new(handler);
        self
    }

    pub fn set_not_found<R: RawHandler>(&self, handler: R) -> &Self {
        self.shared.settings.write().not_found = Some(handler.into_boxed_raw());
        self
    }

    pub fn set_method_not_allowed<R: RawHandler>(&self, handler: R) -> &Self {
        self.shared.settings.write().method_not_allowed = Some(handler.into_boxed_raw());
        self
    }

    /// Writes one Common Log Format line per request to the output.
    pub fn set_access_log(&self, enabled: bool) -> &Self {
        self.shared.settings.write().access_log = enabled;
        self
    }

    /// Serve HTTP/2 alongside HTTP/1.1 from [`serve`](Self::serve) and
    /// [`serve_tls`](Self::serve_tls).
    pub fn set_http2(&self, enabled: bool) -> &Self {
        self.shared.settings.write().http2 = enabled;
        self
    }

    /// Destination of the banner and access log. Defaults to stderr.
    pub fn set_output(&self, output: Output) -> &Self {
        self.shared.settings.write().output = output;
        self
    }

    pub fn output(&self) -> Output {
        self.shared.settings.read().output.clone()
    }

    // ── Serving ──────────────────────────────────────────────────────────────

    /// Serves on `0.0.0.0:port` until a stop signal. See [`Server`].
    pub async fn serve(&self, port: u16) -> Result<Stopped> {
        self.serve_with(self.default_config(port)).await
    }

    /// Serves TLS on `0.0.0.0:port` with a PEM certificate chain and key.
    pub async fn serve_tls(
        &self,
        port: u16,
        cert: impl Into<PathBuf>,
        key: impl Into<PathBuf>,
    ) -> Result<Stopped> {
        self.serve_with_tls(self.default_config(port), cert, key).await
    }

    pub async fn serve_with(&self, config: ServerConfig) -> Result<Stopped> {
        let listener = TcpListener::bind(config.addr).await?;
        Server::new(self.clone(), config).start(listener).await
    }

    pub async fn serve_with_tls(
        &self,
        config: ServerConfig,
        cert: impl Into<PathBuf>,
        key: impl Into<PathBuf>,
    ) -> Result<Stopped> {
        let listener = TcpListener::bind(config.addr).await?;
        Server::new(self.clone(), config).start_tls(listener, cert, key).await
    }

    fn default_config(&self, port: u16) -> ServerConfig {
        let http2 = self.shared.settings.read().http2;
        ServerConfig::default().with_port(port).with_http2(http2)
    }

    // ── Dispatch ─────────────────────────────────────────────────────────────

    /// Routes and handles one request in-process.
    ///
    /// This is what the server calls for every request; it is also the
    /// entry point for testing an app without a socket.
    pub async fn handle_request(&self, mut req: Request) -> Response {
        let settings = self.shared.settings.read().clone();
        let line = settings.access_log.then(|| RequestLine::capture(&req));
        // HEAD replies carry headers only.
        let sends_body = *req.method() != http::Method::HEAD;
        let lookup = self.shared.routes.read().lookup(req.method(), req.path());

        let mut res = match lookup {
            Lookup::Found { endpoint, params } => {
                req.set_params(params);
                match endpoint {
                    Endpoint::Chained { handler, chain, values } => {
                        let mut ctx = Context::new(Values::clone(&values.load()), req);
                        chain.run(&mut ctx, &handler, settings.error_handler.as_ref()).await;
                        ctx.into_response()
                    }
                    Endpoint::Raw(raw) => raw.call(req).await,
                }
            }
            Lookup::MethodNotAllowed(allowed) => {
                if *req.method() == http::Method::OPTIONS {
                    with_allow(Response::status(Status::Ok), &allowed)
                } else if let Some(handler) = &settings.method_not_allowed {
                    handler.call(req).await
                } else {
                    with_allow(
                        Response::error(Status::MethodNotAllowed, "405 Method Not Allowed"),
                        &allowed,
                    )
                }
            }
            Lookup::NotFound => match &settings.not_found {
                Some(handler) => handler.call(req).await,
                None => Response::error(Status::NotFound, "404 page not found"),
            },
        };

        res.headers.entry(SERVER).or_insert(HeaderValue::from_static(SERVER_NAME));
        if let Some(line) = line {
            let size = if sends_body { res.body.len() } else { 0 };
            settings.output.write_line(line.finish(res.status, size));
        }
        res
    }
}

fn with_allow(mut res: Response, allowed: &[Method]) -> Response {
    let allow = allowed.iter().map(|m| m.as_str()).collect::<Vec<_>>().join(", ");
    if let Ok(value) = HeaderValue::from_str(&allow) {
        res.headers.insert(ALLOW, value);
    }
    res
}

/// A prefixed view created by [`App::group`].
///
/// Everything on [`App`] is available through `Deref`; routes registered
/// here get the group's prefix, middleware and bound context.
#[derive(Clone)]
pub struct Group(App);

impl Group {
    /// Empties this group's middleware chain. The parent and sibling groups
    /// keep theirs.
    pub fn reset(&self) -> &Self {
        self.0.scope.chain.clear();
        self
    }
}

impl Deref for Group {
    type Target = App;

    fn deref(&self) -> &App {
        &self.0
    }
}
