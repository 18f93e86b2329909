//! # orchard
//!
//! A thin routing and middleware layer over hyper, with a server that
//! shuts down gracefully.
//!
//! - Radix-tree routing per method via [`matchit`], `:name` and `*name`
//!   segments, grouped sub-routers with their own prefix and middleware
//! - Middleware chains that run in registration order and stop at the first
//!   error, which goes to one centralized [`ErrorHandler`]
//! - A per-request [`Context`] with carried [`Values`], parameter accessors
//!   and JSON/text/redirect helpers
//! - A [`Server`] that counts live connections and, on SIGINT, SIGQUIT or
//!   SIGTERM, stops accepting and waits for them to finish
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use orchard::{from_fn, App, Context, Error, Result, Status, Values};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let app = App::new();
//!     app.set_access_log(true);
//!     app.bind_context(Values::new().with_value("greeting", "hello"));
//!
//!     app.get("/hello/:name", hello);
//!
//!     let admin = app.group("/admin");
//!     admin.use_middleware(from_fn(|ctx| {
//!         Box::pin(async move {
//!             if ctx.header("authorization").is_empty() {
//!                 return Err(Error::msg("access forbidden"));
//!             }
//!             Ok(())
//!         })
//!     }));
//!     admin.get("/stats", stats);
//!
//!     let stopped = app.serve(3000).await?;
//!     println!("{stopped}");
//!     Ok(())
//! }
//!
//! async fn hello(ctx: &mut Context) -> Result<()> {
//!     let greeting = ctx.value::<&str>("greeting").copied().unwrap_or("hi");
//!     let body = format!("{greeting} {}", ctx.param("name"));
//!     ctx.text(Status::Ok, body)
//! }
//!
//! async fn stats(ctx: &mut Context) -> Result<()> {
//!     ctx.json(Status::Ok, &serde_json::json!({ "requests": 42 }))
//! }
//! ```

mod access_log;
mod app;
mod config;
mod conn;
mod context;
mod error;
mod handler;
mod method;
mod middleware;
mod output;
mod request;
mod response;
mod router;
mod server;
mod shutdown;
mod signals;
mod static_files;
mod status;
mod tls;
mod values;

pub use app::{App, Group, SERVER_NAME};
pub use config::ServerConfig;
pub use conn::{ConnGuard, ConnState, ConnTracker};
pub use context::Context;
pub use error::{Error, Result};
pub use handler::{
    BoxFuture, DefaultErrorHandler, ErasedRawHandler, ErrorHandler, Handler, HandlerFn, RawHandler,
    from_fn,
};
pub use method::Method;
pub use output::Output;
pub use request::Request;
pub use response::{ContentType, IntoResponse, Response, ResponseBuilder, ResponseWriter};
pub use server::{Server, Stopped};
pub use shutdown::{ShutdownHandle, StopMode};
pub use signals::{Signal, SignalAction};
pub use status::Status;
pub use values::Values;
