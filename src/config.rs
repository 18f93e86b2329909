//! Server configuration.

use std::net::SocketAddr;
use std::time::Duration;

/// Listener and connection settings for [`Server`](crate::Server).
///
/// ```rust
/// use std::time::Duration;
/// use orchard::ServerConfig;
///
/// let config = ServerConfig::default()
///     .with_addr(([127, 0, 0, 1], 8080).into())
///     .with_write_timeout(Duration::from_secs(30));
/// assert_eq!(config.read_timeout, Duration::from_secs(5));
/// ```
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    /// Limit for receiving a request's headers.
    pub read_timeout: Duration,
    /// Limit for producing one response. The connection is dropped when
    /// it elapses.
    pub write_timeout: Duration,
    /// Serve HTTP/2 alongside HTTP/1.1.
    pub http2: bool,
    /// Install the SIGINT/SIGQUIT/SIGTERM/SIGUSR2 coordinator.
    pub handle_signals: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(10),
            http2: false,
            handle_signals: true,
        }
    }
}

impl ServerConfig {
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.addr.set_port(port);
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_http2(mut self, enabled: bool) -> Self {
        self.http2 = enabled;
        self
    }

    pub fn with_handle_signals(mut self, enabled: bool) -> Self {
        self.handle_signals = enabled;
        self
    }
}
