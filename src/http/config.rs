use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for the HTTP echo server
///
/// Passed explicitly to [`serve`](super::serve) or
/// [`HttpEchoServer::bind`](super::HttpEchoServer::bind); nothing about the
/// server is held in process-wide state.
///
/// # Examples
///
/// ```rust
/// use httpecho::http::HttpConfig;
/// use std::time::Duration;
///
/// let config = HttpConfig::new("127.0.0.1:8080".parse().unwrap())
///     .with_max_connections(200)
///     .with_read_timeout(Duration::from_secs(10))
///     .with_server_name("EchoServer/1.0");
///
/// assert_eq!(config.max_connections, 200);
/// assert_eq!(config.server_name.as_deref(), Some("EchoServer/1.0"));
/// ```
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Network address to bind to
    pub bind_addr: SocketAddr,
    /// Maximum number of concurrent connections
    pub max_connections: usize,
    /// Read buffer capacity per connection
    pub buffer_size: usize,
    /// Bound on every socket read, including idle keep-alive waits
    pub read_timeout: Duration,
    /// Bound on writing one full response
    pub write_timeout: Duration,
    /// Maximum size of a request line plus headers
    pub max_header_bytes: usize,
    /// Maximum number of request headers
    pub max_headers: usize,
    /// Maximum request body size in bytes
    pub max_body_size: u64,
    /// Value of the `server` response header, omitted when `None`
    pub server_name: Option<String>,
}

impl HttpConfig {
    /// Create a configuration bound to `bind_addr` with default limits
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            max_connections: 100,
            buffer_size: 8192, // Larger buffer for HTTP requests
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
            max_header_bytes: 64 * 1024,
            max_headers: 64,
            max_body_size: 64 * 1024 * 1024,
            server_name: None,
        }
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
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

    pub fn with_max_header_bytes(mut self, max_header_bytes: usize) -> Self {
        self.max_header_bytes = max_header_bytes;
        self
    }

    pub fn with_max_headers(mut self, max_headers: usize) -> Self {
        self.max_headers = max_headers;
        self
    }

    pub fn with_max_body_size(mut self, max_body_size: u64) -> Self {
        self.max_body_size = max_body_size;
        self
    }

    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = Some(server_name.into());
        self
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 8080)))
    }
}
