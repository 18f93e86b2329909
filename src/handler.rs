//! Handler traits and type erasure.
//!
//! # Three kinds of handler
//!
//! - [`Handler`]: route handlers *and* middleware. Receives the request
//!   [`Context`] by mutable reference and returns `Result<()>`; an `Err`
//!   stops the chain and goes to the [`ErrorHandler`].
//! - [`RawHandler`]: the escape hatch. Takes the [`Request`] by value and
//!   returns anything [`IntoResponse`], bypassing middleware. Used for
//!   `App::handle`, static files and the not-found / method-not-allowed
//!   fallbacks.
//! - [`ErrorHandler`]: the centralized strategy invoked with the first
//!   error a chain produces.
//!
//! # How async handlers with a borrowed context are stored
//!
//! ```text
//! async fn hello(ctx: &mut Context) -> Result<()> { … }   ← user writes this
//!        ↓ app.get("/", hello)
//! for<'a> HandlerFn<'a>           ← one future type per borrow of the context
//!        ↓ blanket impl
//! Arc<dyn Handler>                ← stored once, shared across connections
//!        ↓ at request time
//! handler.call(&mut ctx)          ← one vtable dispatch, one boxed future
//! ```
//!
//! The future returned by `hello` borrows the context, so its type depends
//! on the borrow's lifetime. [`HandlerFn`] names that type per lifetime,
//! which lets the blanket impl accept plain `async fn` items.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::request::Request;
use crate::response::{IntoResponse, Response};
use crate::status::Status;

/// A heap-allocated, type-erased future.
///
/// `Send` lets tokio move it across worker threads; `'a` ties it to
/// whatever it borrows (the request context, for [`Handler`]).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ── Handler ───────────────────────────────────────────────────────────────────

/// A route handler or middleware.
///
/// Satisfied automatically by any `async fn(&mut Context) -> Result<()>`.
/// Implement it by hand for handlers that carry configuration:
///
/// ```rust
/// use orchard::{BoxFuture, Context, Error, Handler, Result};
///
/// struct RequireHeader(&'static str);
///
/// impl Handler for RequireHeader {
///     fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Result<()>> {
///         Box::pin(async move {
///             if ctx.header(self.0).is_empty() {
///                 return Err(Error::msg(format!("missing {}", self.0)));
///             }
///             Ok(())
///         })
///     }
/// }
/// ```
pub trait Handler: Send + Sync + 'static {
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Result<()>>;
}

/// A function from a context borrow of lifetime `'a` to a future that may
/// hold that borrow.
#[doc(hidden)]
pub trait HandlerFn<'a> {
    type Future: Future<Output = Result<()>> + Send + 'a;

    fn call_fn(&self, ctx: &'a mut Context) -> Self::Future;
}

impl<'a, F, Fut> HandlerFn<'a> for F
where
    F: Fn(&'a mut Context) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'a,
{
    type Future = Fut;

    fn call_fn(&self, ctx: &'a mut Context) -> Fut {
        self(ctx)
    }
}

impl<F> Handler for F
where
    F: for<'a> HandlerFn<'a> + Send + Sync + 'static,
{
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Result<()>> {
        Box::pin(HandlerFn::call_fn(self, ctx))
    }
}

/// Shared, type-erased [`Handler`].
pub(crate) type BoxedHandler = Arc<dyn Handler>;

/// Pins down the signature of a closure so it can be used as a [`Handler`].
///
/// Closures cannot infer a higher-ranked signature on their own; passing
/// one through `from_fn` supplies it.
///
/// ```rust
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use orchard::{from_fn, App, Error};
///
/// let hits = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&hits);
///
/// let app = App::new();
/// app.use_middleware(from_fn(move |_ctx| {
///     counter.fetch_add(1, Ordering::Relaxed);
///     Box::pin(async { Ok::<_, Error>(()) })
/// }));
/// ```
pub fn from_fn<F>(f: F) -> impl Handler
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
    f
}

// ── RawHandler ────────────────────────────────────────────────────────────────

/// Internal dispatch interface for raw handlers.
///
/// `#[doc(hidden)] pub` rather than `pub(crate)` because it appears in the
/// return type of the public `RawHandler` trait's `into_boxed_raw` method.
#[doc(hidden)]
pub trait ErasedRawHandler {
    fn call(&self, req: Request) -> BoxFuture<'static, Response>;
}

#[doc(hidden)]
pub type BoxedRawHandler = Arc<dyn ErasedRawHandler + Send + Sync + 'static>;

/// Implemented for every `async fn(Request) -> impl IntoResponse`.
///
/// Raw handlers bypass middleware and the error handler entirely. The trait
/// is sealed: only the blanket impl below can satisfy it.
pub trait RawHandler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_raw(self) -> BoxedRawHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

impl<F, Fut, R> RawHandler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_boxed_raw(self) -> BoxedRawHandler {
        Arc::new(FnRawHandler(self))
    }
}

/// Bridges a concrete raw handler `F` to the trait-object world.
struct FnRawHandler<F>(F);

impl<F, Fut, R> ErasedRawHandler for FnRawHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture<'static, Response> {
        let fut = (self.0)(req);
        Box::pin(async move { fut.await.into_response() })
    }
}

// ── ErrorHandler ──────────────────────────────────────────────────────────────

/// Centralized handling of errors returned by middleware and route handlers.
///
/// Invoked at most once per request, with the first error. Whatever it
/// writes to the context's response is what the client receives. Any plain
/// `Fn(&mut Context, Error)` closure qualifies:
///
/// ```rust
/// use orchard::{App, Context, Error};
///
/// let app = App::new();
/// app.set_error_handler(|ctx: &mut Context, err: Error| {
///     let _ = ctx.text(500_u16, format!("Hey some error occured: {err}"));
/// });
/// ```
pub trait ErrorHandler: Send + Sync + 'static {
    fn handle(&self, ctx: &mut Context, err: Error);
}

impl<F> ErrorHandler for F
where
    F: Fn(&mut Context, Error) + Send + Sync + 'static,
{
    fn handle(&self, ctx: &mut Context, err: Error) {
        self(ctx, err)
    }
}

/// Replies `500 Internal Server Error` with the error's message as a
/// plain-text body.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultErrorHandler;

impl ErrorHandler for DefaultErrorHandler {
    fn handle(&self, ctx: &mut Context, err: Error) {
        ctx.response().error(Status::InternalServerError, &err.to_string());
    }
}
