//! Incoming HTTP request type.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::request::Parts;
use http::{HeaderMap, Method, Uri, Version};

/// An incoming HTTP request with its body fully buffered.
///
/// Path parameters extracted by the router travel with the request so raw
/// handlers see them too.
pub struct Request {
    parts: Parts,
    body: Bytes,
    params: HashMap<String, String>,
    remote_addr: Option<SocketAddr>,
}

impl Request {
    /// Wraps an already-buffered `http` request.
    ///
    /// ```rust
    /// use bytes::Bytes;
    /// use orchard::Request;
    ///
    /// let req = Request::new(
    ///     http::Request::get("/api?limit=25").body(Bytes::new()).unwrap(),
    /// );
    /// assert_eq!(req.query("limit").as_deref(), Some("25"));
    /// ```
    pub fn new(req: http::Request<Bytes>) -> Self {
        let (parts, body) = req.into_parts();
        Self::from_parts(parts, body)
    }

    pub fn from_parts(parts: Parts, body: Bytes) -> Self {
        Self { parts, body, params: HashMap::new(), remote_addr: None }
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn method(&self) -> &Method { &self.parts.method }
    pub fn uri(&self) -> &Uri { &self.parts.uri }
    pub fn path(&self) -> &str { self.parts.uri.path() }
    pub fn version(&self) -> Version { self.parts.version }
    pub fn headers(&self) -> &HeaderMap { &self.parts.headers }
    pub fn body(&self) -> &[u8] { &self.body }
    pub fn remote_addr(&self) -> Option<SocketAddr> { self.remote_addr }

    /// Case-insensitive header lookup. Values that are not visible ASCII
    /// are treated as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.parts.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/:id`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    /// First value of the URL query parameter `name`, percent-decoded.
    pub fn query(&self, name: &str) -> Option<String> {
        let query = self.parts.uri.query()?;
        first_value(query.as_bytes(), name)
    }

    /// First value of the form field `name`.
    ///
    /// A url-encoded `POST`, `PUT` or `PATCH` body is searched first, then
    /// the URL query string.
    pub fn form_value(&self, name: &str) -> Option<String> {
        if self.has_form_body() {
            if let Some(value) = first_value(&self.body, name) {
                return Some(value);
            }
        }
        self.query(name)
    }

    pub(crate) fn set_params(&mut self, params: HashMap<String, String>) {
        self.params = params;
    }

    fn has_form_body(&self) -> bool {
        let method = &self.parts.method;
        if *method != Method::POST && *method != Method::PUT && *method != Method::PATCH {
            return false;
        }
        self.header(CONTENT_TYPE.as_str())
            .and_then(|ct| ct.split(';').next())
            .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/x-www-form-urlencoded"))
    }
}

fn first_value(encoded: &[u8], name: &str) -> Option<String> {
    url::form_urlencoded::parse(encoded)
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}
