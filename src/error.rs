//! Unified error type.

use std::fmt;
use std::time::Duration;

/// Shorthand for results carrying an orchard [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The error type returned by handlers, middleware and orchard's own
/// fallible operations.
///
/// Handlers return it to abort the chain; the centralized
/// [`ErrorHandler`](crate::ErrorHandler) turns it into a response. Server
/// startup returns it when the process must not start at all.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A request-handling failure raised by a handler or middleware.
    #[error("{0}")]
    Handler(String),

    /// Invalid server setup: unreadable TLS files, bad key pair, etc.
    #[error("configuration error: {0}")]
    Config(String),

    /// A route pattern the router refused at registration time.
    #[error("invalid route `{path}`: {source}")]
    Route {
        path: String,
        #[source]
        source: matchit::InsertError,
    },

    #[error("failed to serialize response body: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("failed to deserialize request body: {0}")]
    Deserialize(#[source] serde_json::Error),

    /// Redirects only accept 300..=307.
    #[error("invalid redirect code {0}")]
    InvalidRedirectCode(u16),

    #[error("invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// A response took longer than the configured write timeout.
    #[error("write timeout of {0:?} exceeded")]
    Timeout(Duration),

    /// The listener was closed by a stop signal. Expected during shutdown.
    #[error("listener closed")]
    ListenerClosed,

    #[error("http: {0}")]
    Http(#[from] hyper::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Builds a request-handling error from any displayable message.
    ///
    /// ```rust
    /// let err = orchard::Error::msg("access forbidden");
    /// assert_eq!(err.to_string(), "access forbidden");
    /// ```
    pub fn msg(message: impl fmt::Display) -> Self {
        Self::Handler(message.to_string())
    }

    /// `true` for the benign error produced when shutdown closes the listener.
    pub fn is_listener_closed(&self) -> bool {
        matches!(self, Self::ListenerClosed)
    }
}
