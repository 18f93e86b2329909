//! Per-request context.
//!
//! A [`Context`] is created just before the middleware chain runs and
//! discarded once the route handler (or the error handler) returns. It owns
//! the request, the buffered response and the carried [`Values`].

use std::any::Any;
use std::collections::HashMap;

use http::header::{CONTENT_TYPE, HeaderValue, LOCATION};
use http::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::{Position, Url};

use crate::error::{Error, Result};
use crate::request::Request;
use crate::response::{ContentType, Response, ResponseWriter};
use crate::values::Values;

/// Lowest and highest status codes [`Context::redirect`] accepts.
const REDIRECT_CODES: std::ops::RangeInclusive<u16> = 300..=307;

/// Stand-in origin for resolving relative redirect targets; only the path,
/// query and fragment of the result are kept.
const LOCAL_ORIGIN: &str = "http://localhost/";

/// State and response helpers for a single request.
pub struct Context {
    /// Values carried across middleware and handler for this request only.
    ///
    /// Replace it with a child view to pass something downstream:
    /// `ctx.values = ctx.values.with_value("user", user)`.
    pub values: Values,
    request: Request,
    response: ResponseWriter,
}

impl Context {
    pub(crate) fn new(values: Values, request: Request) -> Self {
        Self { values, request, response: ResponseWriter::new() }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn response(&mut self) -> &mut ResponseWriter {
        &mut self.response
    }

    /// Shorthand for replacing [`values`](Self::values) with a child view
    /// binding `key`.
    pub fn with_value<T>(&mut self, key: impl Into<String>, value: T)
    where
        T: Any + Send + Sync,
    {
        self.values = self.values.with_value(key, value);
    }

    /// Shorthand for `self.values.value(key)`.
    pub fn value<T: Any>(&self, key: &str) -> Option<&T> {
        self.values.value(key)
    }

    /// Value of the named route segment, or `""` when the route has none.
    ///
    /// `app.get("/hello/:name", ..)` on `/hello/earth` gives
    /// `ctx.param("name") == "earth"`.
    pub fn param(&self, name: &str) -> &str {
        self.request.param(name).unwrap_or("")
    }

    pub fn params(&self) -> &HashMap<String, String> {
        self.request.params()
    }

    /// URL query parameter, or `""`.
    pub fn query(&self, name: &str) -> String {
        self.request.query(name).unwrap_or_default()
    }

    /// Form field (url-encoded body first, then query), or `""`.
    pub fn form(&self, name: &str) -> String {
        self.request.form_value(name).unwrap_or_default()
    }

    /// Request header, or `""`.
    pub fn header(&self, name: &str) -> &str {
        self.request.header(name).unwrap_or("")
    }

    /// Writes `value` as a JSON body with the given status.
    ///
    /// A serialization failure is returned as [`Error::Serialize`]; bytes
    /// already written stay written.
    pub fn json<T>(&mut self, status: impl Into<u16>, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.response.set_content_type(ContentType::Json);
        self.response.write_header(status);
        serde_json::to_writer(&mut self.response, value).map_err(Error::Serialize)?;
        self.response.write_body(b"\n");
        Ok(())
    }

    /// Writes a plain-text body with the given status. Never fails; the
    /// `Result` lets handlers end with `ctx.text(..)`.
    pub fn text(&mut self, status: impl Into<u16>, body: impl AsRef<str>) -> Result<()> {
        self.response.set_content_type(ContentType::Text);
        self.response.write_header(status);
        self.response.write_body(body.as_ref().as_bytes());
        Ok(())
    }

    /// Decodes the request body as JSON.
    pub fn decode_json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(self.request.body()).map_err(Error::Deserialize)
    }

    /// Redirects to `url` with a status in `300..=307`.
    ///
    /// A relative `url` is resolved against the request path (`next` on
    /// `/a/b` becomes `/a/next`) and non-ASCII characters are
    /// percent-encoded. Any other status is rejected with
    /// [`Error::InvalidRedirectCode`] and nothing is written.
    pub fn redirect(&mut self, url: &str, status: impl Into<u16>) -> Result<()> {
        let status = status.into();
        if !REDIRECT_CODES.contains(&status) {
            return Err(Error::InvalidRedirectCode(status));
        }
        let url = resolve_location(self.request.path(), url);
        let location = HeaderValue::from_str(&url)?;
        self.response.headers_mut().insert(LOCATION, location);

        let method = self.request.method();
        let wants_body = (*method == Method::GET || *method == Method::HEAD)
            && !self.response.headers().contains_key(CONTENT_TYPE);
        self.response.write_header(status);
        if wants_body {
            let reason = StatusCode::from_u16(status)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or("Redirect");
            self.response.set_content_type(ContentType::Html);
            let anchor = format!("<a href=\"{}\">{reason}</a>.\n", escape_html(&url));
            self.response.write_body(anchor.as_bytes());
        }
        Ok(())
    }

    pub(crate) fn into_response(self) -> Response {
        self.response.finish()
    }
}

/// Absolute URLs keep their origin, network-path references (`//host/x`)
/// keep their host, everything else becomes an absolute path. The result is
/// always ASCII.
fn resolve_location(request_path: &str, target: &str) -> String {
    if let Ok(absolute) = Url::parse(target) {
        return absolute.into();
    }
    let resolved = Url::parse(LOCAL_ORIGIN)
        .and_then(|origin| origin.join(request_path))
        .and_then(|base| base.join(target));
    match resolved {
        Ok(url) if target.starts_with("//") => format!("//{}", &url[Position::BeforeUsername..]),
        Ok(url) => url[Position::BeforePath..].to_owned(),
        Err(_) => target.to_owned(),
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Status;
    use bytes::Bytes;
    use serde::Deserialize;

    fn context(method: &str, uri: &str, body: &str) -> Context {
        let req = http::Request::builder()
            .method(method)
            .uri(uri)
            .body(Bytes::from(body.to_owned()))
            .unwrap();
        Context::new(Values::new(), Request::new(req))
    }

    #[test]
    fn absent_accessors_are_empty() {
        let ctx = context("GET", "/", "");
        assert_eq!(ctx.param("name"), "");
        assert_eq!(ctx.query("limit"), "");
        assert_eq!(ctx.form("email"), "");
        assert_eq!(ctx.header("x-test"), "");
    }

    #[test]
    fn redirect_rejects_codes_outside_range() {
        let mut ctx = context("GET", "/", "");
        assert!(matches!(ctx.redirect("/next", 200_u16), Err(Error::InvalidRedirectCode(200))));
        assert!(matches!(ctx.redirect("/next", 308_u16), Err(Error::InvalidRedirectCode(308))));
        assert!(!ctx.response().is_written());
    }

    #[test]
    fn redirect_sets_location_and_status() {
        let mut ctx = context("GET", "/old", "");
        ctx.redirect("/new?a=1&b=2", 301_u16).unwrap();
        let res = ctx.into_response();
        assert_eq!(res.status_code(), 301);
        assert_eq!(res.header("location"), Some("/new?a=1&b=2"));
        assert_eq!(res.body_text(), "<a href=\"/new?a=1&amp;b=2\">Moved Permanently</a>.\n");
    }

    #[test]
    fn redirect_resolves_relative_targets() {
        let mut ctx = context("GET", "/a/b", "");
        ctx.redirect("next", Status::Found).unwrap();
        assert_eq!(ctx.into_response().header("location"), Some("/a/next"));

        let mut ctx = context("GET", "/a/b/", "");
        ctx.redirect("../up?x=1", Status::Found).unwrap();
        assert_eq!(ctx.into_response().header("location"), Some("/a/up?x=1"));
    }

    #[test]
    fn redirect_percent_encodes_non_ascii() {
        let mut ctx = context("GET", "/", "");
        ctx.redirect("/café?q=ü", Status::Found).unwrap();
        let res = ctx.into_response();
        assert_eq!(res.status_code(), 302);
        assert_eq!(res.header("location"), Some("/caf%C3%A9?q=%C3%BC"));
    }

    #[test]
    fn redirect_keeps_absolute_and_network_path_targets() {
        let mut ctx = context("GET", "/a/b", "");
        ctx.redirect("https://example.com/x", Status::SeeOther).unwrap();
        assert_eq!(ctx.into_response().header("location"), Some("https://example.com/x"));

        let mut ctx = context("GET", "/a/b", "");
        ctx.redirect("//cdn.example.com/lib.js", Status::Found).unwrap();
        assert_eq!(ctx.into_response().header("location"), Some("//cdn.example.com/lib.js"));
    }

    #[test]
    fn redirect_on_post_has_no_body() {
        let mut ctx = context("POST", "/form", "");
        ctx.redirect("/done", 303_u16).unwrap();
        let res = ctx.into_response();
        assert_eq!(res.status_code(), 303);
        assert!(res.body().is_empty());
    }

    #[test]
    fn json_writes_status_type_and_newline() {
        let mut ctx = context("GET", "/", "");
        ctx.json(201_u16, &serde_json::json!({ "id": 7 })).unwrap();
        let res = ctx.into_response();
        assert_eq!(res.status_code(), 201);
        assert_eq!(res.header("content-type"), Some("application/json"));
        assert_eq!(res.body_text(), "{\"id\":7}\n");
    }

    #[test]
    fn json_reports_serialization_failure() {
        use std::collections::HashMap;
        let mut ctx = context("GET", "/", "");
        // Non-string map keys cannot become JSON object keys.
        let bad: HashMap<(u8, u8), u8> = HashMap::from([((1, 2), 3)]);
        assert!(matches!(ctx.json(200_u16, &bad), Err(Error::Serialize(_))));
    }

    #[test]
    fn decode_json_round_trip_and_failure() {
        #[derive(Deserialize)]
        struct Pet {
            name: String,
        }

        let ctx = context("POST", "/", r#"{"name":"rex"}"#);
        let pet: Pet = ctx.decode_json().unwrap();
        assert_eq!(pet.name, "rex");

        let ctx = context("POST", "/", "{not json");
        assert!(matches!(ctx.decode_json::<Pet>(), Err(Error::Deserialize(_))));
    }

    #[test]
    fn with_value_replaces_the_view() {
        let mut ctx = context("GET", "/", "");
        let before = ctx.values.clone();
        ctx.with_value("a", "b");
        assert_eq!(ctx.value::<&str>("a"), Some(&"b"));
        assert!(before.value::<&str>("a").is_none());
    }
}
