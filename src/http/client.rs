use super::protocol::{self, HttpProtocolError};
use super::router::ECHO_PATH;
use crate::common::EchoClient;
use crate::{EchoError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use http::header::{CONNECTION, CONTENT_LENGTH};
use http::{HeaderName, HeaderValue, Method, Response, StatusCode, Version};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Largest response head the client will parse
const MAX_RESPONSE_HEAD: usize = 64 * 1024;
const MAX_RESPONSE_HEADERS: usize = 64;

/// Configuration for HTTP echo clients
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Read timeout for operations
    pub read_timeout: Duration,
    /// Write timeout for operations
    pub write_timeout: Duration,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Maximum response body size to prevent memory exhaustion
    pub max_response_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_response_size: 64 * 1024 * 1024, // 64MB
        }
    }
}

/// Builder for client configuration
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
        }
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.config.write_timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn max_response_size(mut self, size: usize) -> Self {
        self.config.max_response_size = size;
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Minimal keep-alive HTTP/1.1 client for talking to an echo server
///
/// Requests go out one at a time over a single connection. Responses must be
/// `content-length` framed, which is all the echo server produces.
///
/// # Examples
///
/// ```no_run
/// use httpecho::http::HttpEchoClient;
/// use http::Method;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut client = HttpEchoClient::connect("127.0.0.1:8080".parse()?).await?;
///
///     let response = client
///         .request(Method::POST, "/api/echo", Some("application/json"), Some(br#"{"a":1}"#))
///         .await?;
///     assert_eq!(response.headers()["content-type"], "application/json");
///     assert_eq!(&response.body()[..], br#"{"a":1}"#);
///     Ok(())
/// }
/// ```
pub struct HttpEchoClient {
    reader: BufReader<TcpStream>,
    config: ClientConfig,
    host: String,
    closed: bool,
}

impl HttpEchoClient {
    /// Connect with default configuration
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        Self::connect_with_config(addr, ClientConfig::default()).await
    }

    /// Connect to a server with custom configuration
    pub async fn connect_with_config(addr: SocketAddr, config: ClientConfig) -> Result<Self> {
        let stream = timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| EchoError::Timeout("Connection timeout".to_string()))??;
        stream.set_nodelay(true)?;

        Ok(Self {
            reader: BufReader::new(stream),
            config,
            host: addr.to_string(),
            closed: false,
        })
    }

    /// True once the server has announced it is closing the connection
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Sends one request and waits for its response.
    ///
    /// `content_type` and `body` are only sent when present, so `None` for
    /// both produces a request without a `content-type` header and without
    /// body framing.
    pub async fn request(
        &mut self,
        method: Method,
        path: &str,
        content_type: Option<&str>,
        body: Option<&[u8]>,
    ) -> Result<Response<Bytes>> {
        let mut request = BytesMut::with_capacity(128 + body.map_or(0, <[u8]>::len));
        request.put_slice(format!("{method} {path} HTTP/1.1\r\nhost: {}\r\n", self.host).as_bytes());
        if let Some(content_type) = content_type {
            request.put_slice(format!("content-type: {content_type}\r\n").as_bytes());
        }
        if let Some(body) = body {
            request.put_slice(format!("content-length: {}\r\n\r\n", body.len()).as_bytes());
            request.put_slice(body);
        } else {
            request.put_slice(b"\r\n");
        }

        self.send_raw(&request).await
    }

    /// Writes pre-framed request bytes as-is and reads one response.
    pub async fn send_raw(&mut self, request: &[u8]) -> Result<Response<Bytes>> {
        if self.closed {
            return Err(EchoError::Unsupported(
                "Connection was closed by the server".to_string(),
            ));
        }

        let stream = self.reader.get_mut();
        timeout(self.config.write_timeout, async {
            stream.write_all(request).await?;
            stream.flush().await
        })
        .await
        .map_err(|_| EchoError::Timeout("Write timeout".to_string()))??;

        let response = self.read_response().await?;
        if response
            .headers()
            .get(CONNECTION)
            .is_some_and(|v| v.as_bytes().eq_ignore_ascii_case(b"close"))
        {
            self.closed = true;
        }
        Ok(response)
    }

    async fn read_response(&mut self) -> Result<Response<Bytes>> {
        loop {
            let head = timeout(
                self.config.read_timeout,
                protocol::read_head_bytes(&mut self.reader, MAX_RESPONSE_HEAD),
            )
            .await
            .map_err(|_| EchoError::Timeout("Read timeout waiting for response".to_string()))??
            .ok_or_else(|| {
                EchoError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed before a response arrived",
                ))
            })?;

            let response = parse_response_head(&head)?;
            // Interim responses (100 Continue) precede the real one
            if response.status().is_informational() {
                continue;
            }

            let length = content_length(&response)?;
            if length > self.config.max_response_size {
                return Err(EchoError::Config(format!(
                    "Response too large: {} bytes, max allowed: {}",
                    length, self.config.max_response_size
                )));
            }

            let mut body = vec![0u8; length];
            timeout(self.config.read_timeout, self.reader.read_exact(&mut body))
                .await
                .map_err(|_| {
                    EchoError::Timeout(format!("Read timeout: expected {length} body bytes"))
                })??;

            return Ok(response.map(|()| Bytes::from(body)));
        }
    }
}

impl EchoClient for HttpEchoClient {
    /// POSTs `data` to the echo endpoint and returns the echoed body
    async fn echo(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let response = self
            .request(
                Method::POST,
                ECHO_PATH,
                Some("application/octet-stream"),
                Some(data),
            )
            .await?;

        if response.status() != StatusCode::OK {
            return Err(EchoError::UnexpectedStatus(response.status()));
        }
        Ok(response.into_body().to_vec())
    }
}

fn parse_response_head(head: &[u8]) -> std::result::Result<Response<()>, HttpProtocolError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_RESPONSE_HEADERS];
    let mut res = httparse::Response::new(&mut headers);

    match res.parse(head) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => return Err(HttpProtocolError::IncompleteRequest),
        Err(httparse::Error::TooManyHeaders) => return Err(HttpProtocolError::TooManyHeaders),
        Err(e) => {
            return Err(HttpProtocolError::HttpParse(format!(
                "Failed to parse response head: {e}"
            )));
        }
    }

    let status = res
        .code
        .and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or_else(|| HttpProtocolError::HttpParse("invalid status code".to_string()))?;

    let mut response = Response::new(());
    *response.status_mut() = status;
    *response.version_mut() = match res.version {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    };
    for header in res.headers.iter() {
        let name = HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|_| HttpProtocolError::HttpParse(format!("invalid header {}", header.name)))?;
        let value = HeaderValue::from_bytes(header.value)
            .map_err(|_| HttpProtocolError::HttpParse(format!("invalid value for {}", header.name)))?;
        response.headers_mut().append(name, value);
    }
    Ok(response)
}

fn content_length(response: &Response<()>) -> Result<usize> {
    match response.headers().get(CONTENT_LENGTH) {
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .ok_or_else(|| EchoError::Config("Invalid content-length in response".to_string())),
        None if response.status() == StatusCode::NO_CONTENT
            || response.status() == StatusCode::NOT_MODIFIED =>
        {
            Ok(0)
        }
        None => Err(EchoError::Unsupported(
            "Responses without content-length are not supported".to_string(),
        )),
    }
}
