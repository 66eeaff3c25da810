use super::protocol::Framing;
use crate::security::SizeValidator;
use bytes::Bytes;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tokio::time::timeout;

/// Longest chunk-size or trailer line accepted in a chunked body
const MAX_CHUNK_LINE: u64 = 4096;

/// Upper bound on what `read_to_end` reserves from a declared length
const MAX_PREALLOC: u64 = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Length { remaining: u64 },
    ChunkSize,
    ChunkData { remaining: u64 },
    ChunkDataEnd,
    Trailers,
    Done,
}

/// Per-request body framing state, owned by the connection.
///
/// It outlives the [`Body`] handed to the handler so the connection can tell
/// afterwards whether the body was drained cleanly and the stream is still
/// positioned at the next request.
#[derive(Debug)]
pub(crate) struct BodyDecoder {
    state: DecodeState,
    declared: Option<u64>,
    received: u64,
    limit: SizeValidator,
    failed: bool,
}

impl BodyDecoder {
    pub(crate) fn new(framing: Framing, limit: SizeValidator) -> Self {
        let (state, declared) = match framing {
            Framing::Empty | Framing::Length(0) => (DecodeState::Done, Some(0)),
            Framing::Length(n) => (DecodeState::Length { remaining: n }, Some(n)),
            Framing::Chunked => (DecodeState::ChunkSize, None),
        };
        Self {
            state,
            declared,
            received: 0,
            limit,
            failed: false,
        }
    }

    /// True once the full body has been read off the connection
    pub(crate) fn is_complete(&self) -> bool {
        !self.failed && self.state == DecodeState::Done
    }
}

/// Streaming request body.
///
/// Borrows the connection's read half for the duration of one request.
/// Every socket read is bounded by the connection's read timeout, so a
/// stalled client surfaces as [`io::ErrorKind::TimedOut`] instead of a hang.
pub struct Body<'a> {
    io: &'a mut (dyn AsyncBufRead + Send + Unpin),
    decoder: &'a mut BodyDecoder,
    read_timeout: Duration,
}

impl std::fmt::Debug for Body<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Body")
            .field("decoder", &self.decoder)
            .field("read_timeout", &self.read_timeout)
            .finish()
    }
}

impl<'a> Body<'a> {
    pub(crate) fn new(
        io: &'a mut (dyn AsyncBufRead + Send + Unpin),
        decoder: &'a mut BodyDecoder,
        read_timeout: Duration,
    ) -> Self {
        Self {
            io,
            decoder,
            read_timeout,
        }
    }

    /// Length announced by `Content-Length`, `None` for chunked bodies
    pub fn content_length(&self) -> Option<u64> {
        self.decoder.declared
    }

    /// Bytes handed out so far
    pub fn bytes_read(&self) -> u64 {
        self.decoder.received
    }

    /// Returns the next piece of the body, or `None` at the end.
    ///
    /// After an error the stream is poisoned and every later call fails.
    pub async fn chunk(&mut self) -> io::Result<Option<Bytes>> {
        if self.decoder.failed {
            return Err(io::Error::other("request body stream already failed"));
        }
        match self.next_chunk().await {
            Ok(chunk) => Ok(chunk),
            Err(e) => {
                self.decoder.failed = true;
                Err(e)
            }
        }
    }

    /// Appends the rest of the body to `buf`.
    ///
    /// On error `buf` keeps every byte that arrived before the failure.
    pub async fn read_to_end(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
        let start = buf.len();
        if let Some(n) = self.decoder.declared {
            // The declared length is untrusted until the bytes actually arrive
            let pending = n.saturating_sub(self.decoder.received).min(MAX_PREALLOC);
            buf.reserve(pending as usize);
        }
        while let Some(chunk) = self.chunk().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.len() - start)
    }

    async fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        loop {
            match self.decoder.state {
                DecodeState::Done => return Ok(None),
                DecodeState::Length { remaining } => {
                    let data = self.read_data(remaining).await?;
                    let left = remaining - data.len() as u64;
                    self.decoder.state = if left == 0 {
                        DecodeState::Done
                    } else {
                        DecodeState::Length { remaining: left }
                    };
                    return Ok(Some(data));
                }
                DecodeState::ChunkData { remaining } => {
                    let data = self.read_data(remaining).await?;
                    let left = remaining - data.len() as u64;
                    self.decoder.state = if left == 0 {
                        DecodeState::ChunkDataEnd
                    } else {
                        DecodeState::ChunkData { remaining: left }
                    };
                    return Ok(Some(data));
                }
                DecodeState::ChunkSize => {
                    let line = self.read_raw_line().await?;
                    let size = parse_chunk_size(&line)?;
                    self.decoder
                        .limit
                        .validate_size(self.decoder.received.saturating_add(size))
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                    self.decoder.state = if size == 0 {
                        DecodeState::Trailers
                    } else {
                        DecodeState::ChunkData { remaining: size }
                    };
                }
                DecodeState::ChunkDataEnd => {
                    let line = self.read_line().await?;
                    if !line.is_empty() {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "missing CRLF after chunk data",
                        ));
                    }
                    self.decoder.state = DecodeState::ChunkSize;
                }
                DecodeState::Trailers => {
                    // Trailer fields are not forwarded
                    if self.read_line().await?.is_empty() {
                        self.decoder.state = DecodeState::Done;
                    }
                }
            }
        }
    }

    async fn read_data(&mut self, remaining: u64) -> io::Result<Bytes> {
        let buf = timeout(self.read_timeout, self.io.fill_buf())
            .await
            .map_err(|_| body_timeout())??;
        if buf.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before the request body was complete",
            ));
        }

        let n = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let data = Bytes::copy_from_slice(&buf[..n]);
        self.io.consume(n);
        self.decoder.received += n as u64;
        Ok(data)
    }

    /// Reads one CRLF-terminated line and strips the terminator
    async fn read_line(&mut self) -> io::Result<Vec<u8>> {
        let mut line = self.read_raw_line().await?;
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(line)
    }

    /// Reads one line, terminator included
    async fn read_raw_line(&mut self) -> io::Result<Vec<u8>> {
        let mut line = Vec::new();
        let n = timeout(
            self.read_timeout,
            (&mut *self.io).take(MAX_CHUNK_LINE).read_until(b'\n', &mut line),
        )
        .await
        .map_err(|_| body_timeout())??;

        if !line.ends_with(b"\n") {
            if n as u64 == MAX_CHUNK_LINE {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "chunk line too long",
                ));
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed inside chunked body",
            ));
        }
        Ok(line)
    }
}

fn body_timeout() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "timed out reading request body")
}

/// Parses a CRLF-terminated chunk-size line, ignoring any chunk extensions
fn parse_chunk_size(line: &[u8]) -> io::Result<u64> {
    let invalid = || io::Error::new(io::ErrorKind::InvalidData, "invalid chunk size line");

    // httparse reads a bare CRLF as size 0
    if !line.first().is_some_and(u8::is_ascii_hexdigit) {
        return Err(invalid());
    }
    match httparse::parse_chunk_size(line) {
        Ok(httparse::Status::Complete((_, size))) => Ok(size),
        Ok(httparse::Status::Partial) | Err(httparse::InvalidChunkSize) => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    const TIMEOUT: Duration = Duration::from_secs(5);

    async fn drain(raw: &[u8], framing: Framing, limit: u64) -> (io::Result<usize>, Vec<u8>, BodyDecoder) {
        let mut reader = BufReader::new(raw);
        let mut decoder = BodyDecoder::new(framing, SizeValidator::new(limit));
        let mut buf = Vec::new();
        let result = Body::new(&mut reader, &mut decoder, TIMEOUT)
            .read_to_end(&mut buf)
            .await;
        (result, buf, decoder)
    }

    #[tokio::test]
    async fn test_length_body() {
        let (result, buf, decoder) = drain(b"hello world", Framing::Length(5), 1024).await;
        assert_eq!(result.unwrap(), 5);
        assert_eq!(buf, b"hello");
        assert!(decoder.is_complete());
    }

    #[tokio::test]
    async fn test_length_body_truncated() {
        let (result, buf, decoder) = drain(b"hel", Framing::Length(5), 1024).await;
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::UnexpectedEof);
        assert_eq!(buf, b"hel");
        assert!(!decoder.is_complete());
    }

    #[tokio::test]
    async fn test_chunked_body() {
        let raw = b"5;ext=1\r\nhello\r\n7\r\n, world\r\n0\r\nX-Trailer: yes\r\n\r\nNEXT";
        let mut reader = BufReader::new(&raw[..]);
        let mut decoder = BodyDecoder::new(Framing::Chunked, SizeValidator::new(1024));
        let mut buf = Vec::new();

        let n = Body::new(&mut reader, &mut decoder, TIMEOUT)
            .read_to_end(&mut buf)
            .await
            .unwrap();

        assert_eq!(n, 12);
        assert_eq!(buf, b"hello, world");
        assert!(decoder.is_complete());

        // The next request starts right after the trailer section
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"NEXT");
    }

    #[tokio::test]
    async fn test_huge_declared_length_reserves_little() {
        let (result, buf, decoder) = drain(b"abc", Framing::Length(1 << 45), u64::MAX).await;
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::UnexpectedEof);
        assert_eq!(buf, b"abc");
        assert!(buf.capacity() as u64 <= MAX_PREALLOC);
        assert!(!decoder.is_complete());
    }

    #[tokio::test]
    async fn test_chunked_body_bad_size() {
        let (result, buf, decoder) = drain(b"5\r\nhello\r\nzz\r\n", Framing::Chunked, 1024).await;
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::InvalidData);
        assert_eq!(buf, b"hello");
        assert!(!decoder.is_complete());
    }

    #[tokio::test]
    async fn test_chunked_body_over_limit() {
        let (result, buf, _) = drain(b"4\r\nabcd\r\n4\r\nefgh\r\n0\r\n\r\n", Framing::Chunked, 6).await;
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::InvalidData);
        assert_eq!(buf, b"abcd");
    }

    #[tokio::test]
    async fn test_poisoned_after_error() {
        let mut reader = BufReader::new(&b"ab"[..]);
        let mut decoder = BodyDecoder::new(Framing::Length(4), SizeValidator::new(1024));
        let mut body = Body::new(&mut reader, &mut decoder, TIMEOUT);

        assert_eq!(body.chunk().await.unwrap().as_deref(), Some(&b"ab"[..]));
        assert!(body.chunk().await.is_err());
        assert!(body.chunk().await.is_err());
        assert_eq!(body.bytes_read(), 2);
        assert_eq!(body.content_length(), Some(4));
    }

    #[tokio::test]
    async fn test_read_timeout() {
        let (client, server) = tokio::io::duplex(64);
        let mut reader = BufReader::new(server);
        let mut decoder = BodyDecoder::new(Framing::Length(10), SizeValidator::new(1024));
        let mut body = Body::new(&mut reader, &mut decoder, Duration::from_millis(50));

        let err = body.chunk().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        drop(client);
    }

    #[test]
    fn test_parse_chunk_size() {
        assert_eq!(parse_chunk_size(b"1aF\r\n").unwrap(), 0x1af);
        assert_eq!(parse_chunk_size(b"0 ; name=value\r\n").unwrap(), 0);
        assert!(parse_chunk_size(b"\r\n").is_err());
        assert!(parse_chunk_size(b"-1\r\n").is_err());
        assert!(parse_chunk_size(b"5\n").is_err());
        assert!(parse_chunk_size(b"fffffffffffffffffffff\r\n").is_err());
    }
}
