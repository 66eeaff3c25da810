//! HTTP/1.1 wire handling: request heads, body framing and response heads.

use crate::security::{SizeError, SizeValidator};
use bytes::{BufMut, Bytes, BytesMut};
use http::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, EXPECT, SERVER, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Response, StatusCode, Uri, Version};
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Interim response sent before reading a body the client is holding back
pub const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

#[derive(Debug, thiserror::Error)]
pub enum HttpProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("HTTP parsing error: {0}")]
    HttpParse(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Incomplete request")]
    IncompleteRequest,
    #[error("Message head exceeds {0} bytes")]
    HeaderTooLarge(usize),
    #[error("Too many headers")]
    TooManyHeaders,
    #[error(transparent)]
    BodyTooLarge(#[from] SizeError),
    #[error("Unsupported transfer encoding: {0}")]
    UnsupportedTransferEncoding(String),
}

impl HttpProtocolError {
    /// Status to answer with before giving up on the connection.
    ///
    /// `None` means the connection itself is unusable and no response is
    /// attempted.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            HttpProtocolError::Io(_) | HttpProtocolError::IncompleteRequest => None,
            HttpProtocolError::HttpParse(_) | HttpProtocolError::InvalidRequest(_) => {
                Some(StatusCode::BAD_REQUEST)
            }
            HttpProtocolError::HeaderTooLarge(_) | HttpProtocolError::TooManyHeaders => {
                Some(StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE)
            }
            HttpProtocolError::BodyTooLarge(_) => Some(StatusCode::PAYLOAD_TOO_LARGE),
            HttpProtocolError::UnsupportedTransferEncoding(_) => Some(StatusCode::NOT_IMPLEMENTED),
        }
    }
}

/// How the request body is delimited on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// No body follows the head
    Empty,
    /// `Content-Length` delimited
    Length(u64),
    /// `Transfer-Encoding: chunked`
    Chunked,
}

/// Reads a message head (start line plus headers, up to and including the
/// blank line) into a buffer.
///
/// Returns `Ok(None)` when the peer closes the connection before sending
/// anything. Blank lines ahead of the start line are skipped.
pub async fn read_head_bytes<R>(
    reader: &mut R,
    max_bytes: usize,
) -> Result<Option<Vec<u8>>, HttpProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut head = Vec::with_capacity(512);

    loop {
        let remaining = max_bytes.saturating_sub(head.len());
        if remaining == 0 {
            return Err(HttpProtocolError::HeaderTooLarge(max_bytes));
        }

        let start = head.len();
        let n = (&mut *reader)
            .take(remaining as u64)
            .read_until(b'\n', &mut head)
            .await?;

        if n == 0 {
            if head.is_empty() {
                return Ok(None);
            }
            return Err(HttpProtocolError::IncompleteRequest);
        }

        let line = &head[start..];
        if !line.ends_with(b"\n") {
            if n == remaining {
                return Err(HttpProtocolError::HeaderTooLarge(max_bytes));
            }
            return Err(HttpProtocolError::IncompleteRequest);
        }

        if line == b"\r\n" || line == b"\n" {
            if start == 0 {
                head.clear();
                continue;
            }
            return Ok(Some(head));
        }
    }
}

/// Reads and parses a request head into an `http::Request` without a body.
pub async fn read_request_head<R>(
    reader: &mut R,
    max_header_bytes: usize,
    max_headers: usize,
) -> Result<Option<Request<()>>, HttpProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    match read_head_bytes(reader, max_header_bytes).await? {
        Some(head) => parse_request_head(&head, max_headers).map(Some),
        None => Ok(None),
    }
}

/// Parses a complete request head.
pub fn parse_request_head(head: &[u8], max_headers: usize) -> Result<Request<()>, HttpProtocolError> {
    let mut headers = vec![httparse::EMPTY_HEADER; max_headers];
    let mut req = httparse::Request::new(&mut headers);

    match req.parse(head) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => return Err(HttpProtocolError::IncompleteRequest),
        Err(httparse::Error::TooManyHeaders) => return Err(HttpProtocolError::TooManyHeaders),
        Err(e) => {
            return Err(HttpProtocolError::HttpParse(format!(
                "Failed to parse request head: {e}"
            )));
        }
    }

    let method = req
        .method
        .ok_or(HttpProtocolError::IncompleteRequest)
        .and_then(|m| {
            Method::from_bytes(m.as_bytes())
                .map_err(|_| HttpProtocolError::InvalidRequest(format!("invalid method {m}")))
        })?;
    let uri = req
        .path
        .ok_or(HttpProtocolError::IncompleteRequest)
        .and_then(|p| {
            p.parse::<Uri>()
                .map_err(|e| HttpProtocolError::InvalidRequest(format!("invalid target {p}: {e}")))
        })?;
    let version = match req.version {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    };

    let mut request = Request::new(());
    *request.method_mut() = method;
    *request.uri_mut() = uri;
    *request.version_mut() = version;
    fill_headers(request.headers_mut(), req.headers)?;

    Ok(request)
}

fn fill_headers(map: &mut HeaderMap, headers: &[httparse::Header<'_>]) -> Result<(), HttpProtocolError> {
    map.reserve(headers.len());
    for header in headers {
        let name = HeaderName::from_bytes(header.name.as_bytes()).map_err(|_| {
            HttpProtocolError::InvalidRequest(format!("invalid header name {}", header.name))
        })?;
        let value = HeaderValue::from_bytes(header.value).map_err(|_| {
            HttpProtocolError::InvalidRequest(format!("invalid value for header {}", header.name))
        })?;
        map.append(name, value);
    }
    Ok(())
}

/// Decides how the body of a request is framed.
///
/// `Transfer-Encoding` wins over `Content-Length`. The only transfer coding
/// accepted is a lone `chunked`. A declared length is checked against
/// `limit` up front.
pub fn body_framing(headers: &HeaderMap, limit: &SizeValidator) -> Result<Framing, HttpProtocolError> {
    let mut codings = Vec::new();
    for value in headers.get_all(TRANSFER_ENCODING) {
        let value = value.to_str().map_err(|_| {
            HttpProtocolError::InvalidRequest("non-ASCII transfer-encoding".to_string())
        })?;
        codings.extend(
            value
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_ascii_lowercase),
        );
    }
    if !codings.is_empty() {
        if codings.len() == 1 && codings[0] == "chunked" {
            return Ok(Framing::Chunked);
        }
        return Err(HttpProtocolError::UnsupportedTransferEncoding(codings.join(", ")));
    }

    let mut length: Option<u64> = None;
    for value in headers.get_all(CONTENT_LENGTH) {
        let value = value.to_str().map_err(|_| {
            HttpProtocolError::InvalidRequest("non-ASCII content-length".to_string())
        })?;
        for part in value.split(',').map(str::trim) {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(HttpProtocolError::InvalidRequest(format!(
                    "invalid content-length {part:?}"
                )));
            }
            let n: u64 = part.parse().map_err(|_| {
                HttpProtocolError::InvalidRequest(format!("content-length {part} out of range"))
            })?;
            match length {
                Some(prev) if prev != n => {
                    return Err(HttpProtocolError::InvalidRequest(
                        "conflicting content-length values".to_string(),
                    ));
                }
                _ => length = Some(n),
            }
        }
    }

    match length {
        None | Some(0) => Ok(Framing::Empty),
        Some(n) => {
            limit.validate_size(n)?;
            Ok(Framing::Length(n))
        }
    }
}

fn has_connection_token(headers: &HeaderMap, token: &str) -> bool {
    headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

/// Whether the connection may stay open after this exchange.
///
/// A request carrying both `Transfer-Encoding` and `Content-Length` always
/// closes the connection after its response.
pub fn wants_keep_alive(version: Version, headers: &HeaderMap) -> bool {
    if headers.contains_key(TRANSFER_ENCODING) && headers.contains_key(CONTENT_LENGTH) {
        return false;
    }
    match version {
        Version::HTTP_10 => has_connection_token(headers, "keep-alive"),
        _ => !has_connection_token(headers, "close"),
    }
}

pub fn expects_continue(headers: &HeaderMap) -> bool {
    headers
        .get(EXPECT)
        .is_some_and(|v| v.as_bytes().eq_ignore_ascii_case(b"100-continue"))
}

/// Serializes the status line and headers of `response`.
///
/// Framing headers set by the handler are replaced: the body is always sent
/// with an exact `content-length`.
pub fn encode_response_head(
    response: &Response<Bytes>,
    server_name: Option<&str>,
    keep_alive: bool,
) -> BytesMut {
    let status = response.status();
    let mut head = BytesMut::with_capacity(128 + response.headers().len() * 32);

    head.put_slice(b"HTTP/1.1 ");
    head.put_slice(status.as_str().as_bytes());
    head.put_u8(b' ');
    head.put_slice(status.canonical_reason().unwrap_or("").as_bytes());
    head.put_slice(b"\r\n");

    for (name, value) in response.headers() {
        if *name == CONTENT_LENGTH || *name == TRANSFER_ENCODING || *name == CONNECTION {
            continue;
        }
        put_header(&mut head, name.as_str().as_bytes(), value.as_bytes());
    }

    if let Some(server) = server_name {
        if !response.headers().contains_key(SERVER) {
            put_header(&mut head, b"server", server.as_bytes());
        }
    }

    put_header(
        &mut head,
        b"content-length",
        response.body().len().to_string().as_bytes(),
    );
    if !keep_alive {
        put_header(&mut head, b"connection", b"close");
    }
    head.put_slice(b"\r\n");
    head
}

fn put_header(head: &mut BytesMut, name: &[u8], value: &[u8]) {
    head.put_slice(name);
    head.put_slice(b": ");
    head.put_slice(value);
    head.put_slice(b"\r\n");
}

/// Plain-text response for requests the transport or router turns away
pub fn error_response(status: StatusCode) -> Response<Bytes> {
    let body = format!(
        "{} {}\n",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Error")
    );
    let mut response = Response::new(Bytes::from(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    fn limit() -> SizeValidator {
        SizeValidator::new(1024)
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for &(name, value) in pairs {
            map.append(name, HeaderValue::from_static(value));
        }
        map
    }

    #[tokio::test]
    async fn test_read_request_head() {
        let raw: &[u8] =
            b"\r\nPOST /api/echo?x=1 HTTP/1.1\r\nHost: localhost\r\nContent-Type: text/plain\r\n\r\nbody";
        let mut reader = BufReader::new(raw);

        let request = read_request_head(&mut reader, 1024, 16).await.unwrap().unwrap();
        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.uri().path(), "/api/echo");
        assert_eq!(request.version(), Version::HTTP_11);
        assert_eq!(request.headers()["content-type"], "text/plain");

        // The body stays in the reader
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"body");
    }

    #[tokio::test]
    async fn test_read_head_eof() {
        let mut reader = BufReader::new(&b""[..]);
        assert!(read_request_head(&mut reader, 1024, 16).await.unwrap().is_none());

        let mut reader = BufReader::new(&b"GET / HTTP/1.1\r\nHost: x\r\n"[..]);
        assert!(matches!(
            read_request_head(&mut reader, 1024, 16).await,
            Err(HttpProtocolError::IncompleteRequest)
        ));
    }

    #[tokio::test]
    async fn test_read_head_too_large() {
        let raw = format!("GET / HTTP/1.1\r\nX-Big: {}\r\n\r\n", "a".repeat(200));
        let mut reader = BufReader::new(raw.as_bytes());
        assert!(matches!(
            read_request_head(&mut reader, 64, 16).await,
            Err(HttpProtocolError::HeaderTooLarge(64))
        ));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            parse_request_head(b"GET / HTTP/1.1\r\nA: 1\r\nB: 2\r\nC: 3\r\n\r\n", 2),
            Err(HttpProtocolError::TooManyHeaders)
        ));
        let err = parse_request_head(b"GET / JUNK\r\n\r\n", 8).unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn test_http10_version() {
        let request = parse_request_head(b"GET /api/echo HTTP/1.0\r\n\r\n", 8).unwrap();
        assert_eq!(request.version(), Version::HTTP_10);
        assert!(!wants_keep_alive(request.version(), request.headers()));
    }

    #[test]
    fn test_body_framing() {
        assert_eq!(body_framing(&HeaderMap::new(), &limit()).unwrap(), Framing::Empty);
        assert_eq!(
            body_framing(&headers(&[("content-length", "0")]), &limit()).unwrap(),
            Framing::Empty
        );
        assert_eq!(
            body_framing(&headers(&[("content-length", "12")]), &limit()).unwrap(),
            Framing::Length(12)
        );
        assert_eq!(
            body_framing(&headers(&[("content-length", "12, 12")]), &limit()).unwrap(),
            Framing::Length(12)
        );
        assert_eq!(
            body_framing(
                &headers(&[("transfer-encoding", "Chunked"), ("content-length", "5")]),
                &limit()
            )
            .unwrap(),
            Framing::Chunked
        );
    }

    #[test]
    fn test_body_framing_errors() {
        let conflicting = headers(&[("content-length", "3"), ("content-length", "4")]);
        assert!(matches!(
            body_framing(&conflicting, &limit()),
            Err(HttpProtocolError::InvalidRequest(_))
        ));

        let signed = headers(&[("content-length", "+3")]);
        assert!(body_framing(&signed, &limit()).is_err());

        let gzip = headers(&[("transfer-encoding", "gzip, chunked")]);
        let err = body_framing(&gzip, &limit()).unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::NOT_IMPLEMENTED));

        let huge = headers(&[("content-length", "4096")]);
        let err = body_framing(&huge, &limit()).unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::PAYLOAD_TOO_LARGE));
    }

    #[test]
    fn test_keep_alive_and_expect() {
        assert!(wants_keep_alive(Version::HTTP_11, &HeaderMap::new()));
        assert!(!wants_keep_alive(
            Version::HTTP_11,
            &headers(&[("connection", "Upgrade, Close")])
        ));
        assert!(wants_keep_alive(
            Version::HTTP_10,
            &headers(&[("connection", "keep-alive")])
        ));
        assert!(!wants_keep_alive(
            Version::HTTP_11,
            &headers(&[("transfer-encoding", "chunked"), ("content-length", "5")])
        ));

        assert!(expects_continue(&headers(&[("expect", "100-Continue")])));
        assert!(!expects_continue(&HeaderMap::new()));
    }

    #[test]
    fn test_encode_response_head() {
        let mut response = Response::new(Bytes::from_static(b"{\"a\":1}"));
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(""));
        response
            .headers_mut()
            .insert(CONTENT_LENGTH, HeaderValue::from_static("999"));

        let head = encode_response_head(&response, Some("EchoServer/1.0"), false);
        assert_eq!(
            &head[..],
            &b"HTTP/1.1 200 OK\r\ncontent-type: \r\nserver: EchoServer/1.0\r\ncontent-length: 7\r\nconnection: close\r\n\r\n"[..]
        );
    }

    #[test]
    fn test_error_response() {
        let response = error_response(StatusCode::NOT_FOUND);
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(&response.body()[..], b"404 Not Found\n");
    }
}
