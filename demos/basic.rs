//! Minimal orchard example: greetings, an admin group behind an auth
//! middleware, a raw health check and graceful shutdown.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/hello/earth
//!   curl http://localhost:3000/admin/stats
//!   curl -H 'authorization: secret' http://localhost:3000/admin/stats
//!   curl -X POST http://localhost:3000/users \
//!        -H 'content-type: application/json' \
//!        -d '{"name":"alice"}'
//!   curl -i http://localhost:3000/old
//!
//! Ctrl-C stops accepting and waits for in-flight requests.

use orchard::{
    from_fn, App, Context, Error, Method, Request, Response, Result, Status, Values,
};
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize)]
struct User {
    name: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let app = App::new();
    app.set_access_log(true)
        .bind_context(Values::new().with_value("greeting", "hello"))
        .set_error_handler(|ctx: &mut Context, err: Error| {
            let _ = ctx.text(Status::InternalServerError, format!("something went wrong: {err}"));
        });

    app.get("/hello/:name", hello)
        .post("/users", create_user)
        .get("/old", moved)
        .handle(Method::Get, "/healthz", healthz);

    let admin = app.group("/admin");
    admin.use_middleware(from_fn(|ctx| {
        Box::pin(async move {
            if ctx.header("authorization") != "secret" {
                return Err(Error::msg("access forbidden"));
            }
            ctx.with_value("user", "admin".to_owned());
            Ok(())
        })
    }));
    admin.get("/stats", stats);

    let stopped = app.serve(3000).await?;
    println!("{stopped}");
    Ok(())
}

// GET /hello/:name
async fn hello(ctx: &mut Context) -> Result<()> {
    let greeting = ctx.value::<&str>("greeting").copied().unwrap_or("hi");
    let body = format!("{greeting} {}\n", ctx.param("name"));
    ctx.text(Status::Ok, body)
}

// POST /users
async fn create_user(ctx: &mut Context) -> Result<()> {
    let user: User = ctx.decode_json()?;
    ctx.json(Status::Created, &user)
}

// GET /old
async fn moved(ctx: &mut Context) -> Result<()> {
    ctx.redirect("/hello/world", Status::MovedPermanently)
}

// GET /admin/stats
async fn stats(ctx: &mut Context) -> Result<()> {
    let user = ctx.value::<String>("user").cloned().unwrap_or_default();
    ctx.json(Status::Ok, &serde_json::json!({ "user": user, "uptime": "ok" }))
}

// Raw handler: no middleware, no context.
async fn healthz(_req: Request) -> Response {
    Response::text("ok")
}
