use super::body::{Body, BodyDecoder};
use super::config::HttpConfig;
use super::handler::{Handler, OutboundResponse};
use super::protocol::{self, Framing, HttpProtocolError};
use crate::common::EchoServerTrait;
use crate::security::{ConnectionMetrics, ConnectionTracker, SizeValidator};
use crate::{EchoError, Result};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::{signal, time::timeout};
use tracing::{debug, error, info, warn, Instrument};

/// HTTP/1.1 server that dispatches every request to one [`Handler`]
///
/// # Examples
///
/// ```no_run
/// use httpecho::http::{echo_router, HttpConfig, HttpEchoServer};
/// use httpecho::common::EchoServerTrait;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = HttpConfig::new("127.0.0.1:8080".parse()?);
///     let server = HttpEchoServer::bind(config, echo_router()).await?;
///     println!("listening on {}", server.local_addr()?);
///     server.run().await?;
///     Ok(())
/// }
/// ```
pub struct HttpEchoServer<H> {
    listener: TcpListener,
    config: HttpConfig,
    handler: Arc<H>,
    tracker: Arc<ConnectionTracker>,
    shutdown_signal: Arc<broadcast::Sender<()>>,
    // Taken by the first `run`; buffers a shutdown sent before it starts
    shutdown_rx: Mutex<Option<broadcast::Receiver<()>>>,
}

impl<H: Handler> HttpEchoServer<H> {
    /// Binds the listener described by `config`
    pub async fn bind(config: HttpConfig, handler: H) -> Result<Self> {
        if config.max_connections == 0 {
            return Err(EchoError::Config("max_connections must be at least 1".to_string()));
        }
        if config.buffer_size == 0 {
            return Err(EchoError::Config("buffer_size must be at least 1".to_string()));
        }

        let listener = TcpListener::bind(config.bind_addr).await?;
        let (shutdown_signal, shutdown_rx) = broadcast::channel(1);

        Ok(Self {
            listener,
            tracker: Arc::new(ConnectionTracker::new(config.max_connections)),
            config,
            handler: Arc::new(handler),
            shutdown_signal: Arc::new(shutdown_signal),
            shutdown_rx: Mutex::new(Some(shutdown_rx)),
        })
    }

    /// Address the listener is bound to, with the real port when bound to port 0
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn metrics(&self) -> ConnectionMetrics {
        self.tracker.metrics()
    }
}

impl<H: Handler> EchoServerTrait for HttpEchoServer<H> {
    /// Accepts connections until Ctrl-C or an internal shutdown signal
    async fn run(&self) -> Result<()> {
        info!(address = %self.local_addr()?, "HTTP echo server listening");

        let early_rx = self.shutdown_rx.lock().ok().and_then(|mut rx| rx.take());
        let mut shutdown_rx = early_rx.unwrap_or_else(|| self.shutdown_signal.subscribe());

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            let guard = match self.tracker.try_acquire() {
                                Ok(guard) => guard,
                                Err(e) => {
                                    warn!(%addr, error = %e, "Connection rejected");
                                    continue;
                                }
                            };

                            let current = self.tracker.metrics().active_connections;
                            debug!(%addr, current, "Accepted connection");

                            let config = self.config.clone();
                            let handler = Arc::clone(&self.handler);
                            let span = tracing::info_span!("connection", %addr, current);

                            tokio::spawn(async move {
                                let result = handle_connection(stream, addr, config, handler).instrument(span).await;
                                if let Err(e) = result {
                                    error!(%addr, error = %e, "Error handling connection");
                                }
                                drop(guard);
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = signal::ctrl_c() => {
                    info!("Received shutdown signal, stopping server");
                    break;
                }
                _ = shutdown_rx.recv() => {
                    info!("Received internal shutdown signal, stopping server");
                    break;
                }
            }
        }

        self.tracker.close();
        info!("HTTP echo server stopped");
        Ok(())
    }

    fn shutdown_signal(&self) -> broadcast::Sender<()> {
        self.shutdown_signal.as_ref().clone()
    }
}

/// Binds `config.bind_addr` and serves `handler` until shutdown
pub async fn serve<H: Handler>(config: HttpConfig, handler: H) -> Result<()> {
    let server = HttpEchoServer::bind(config, handler).await?;
    server.run().await
}

/// Serves requests on one connection until the client or the framing ends it
async fn handle_connection<H: Handler>(
    stream: TcpStream,
    addr: SocketAddr,
    config: HttpConfig,
    handler: Arc<H>,
) -> Result<()> {
    let mut reader = BufReader::with_capacity(config.buffer_size, stream);
    let limit = SizeValidator::new(config.max_body_size);
    let mut served = 0u64;

    loop {
        let head = timeout(
            config.read_timeout,
            protocol::read_request_head(&mut reader, config.max_header_bytes, config.max_headers),
        )
        .await;

        let head = match head {
            Ok(Ok(Some(head))) => head,
            Ok(Ok(None)) => {
                debug!(requests = served, "Client closed connection");
                break;
            }
            Err(_) => {
                debug!(requests = served, "Idle timeout, closing connection");
                break;
            }
            Ok(Err(e)) => return reject(&mut reader, e, &config).await,
        };

        let framing = match protocol::body_framing(head.headers(), &limit) {
            Ok(framing) => framing,
            Err(e) => return reject(&mut reader, e, &config).await,
        };

        let mut keep_alive = protocol::wants_keep_alive(head.version(), head.headers());
        if framing != Framing::Empty && protocol::expects_continue(head.headers()) {
            write_bytes(reader.get_mut(), protocol::CONTINUE, &config).await?;
        }

        let method = head.method().clone();
        let path = head.uri().path().to_owned();

        let mut decoder = BodyDecoder::new(framing, limit);
        let response = {
            let body = if framing == Framing::Empty {
                None
            } else {
                Some(Body::new(&mut reader, &mut decoder, config.read_timeout))
            };
            handler.handle(head.map(|()| body)).await
        };

        // Leftover or broken body framing leaves the stream unusable
        if !decoder.is_complete() {
            debug!(%method, %path, "Request body not fully consumed, closing after response");
            keep_alive = false;
        }

        served += 1;
        info!(
            %method,
            %path,
            status = response.status().as_u16(),
            size = response.body().len(),
            "Handled request"
        );

        write_response(reader.get_mut(), &response, &config, keep_alive).await?;

        if !keep_alive {
            break;
        }
    }

    debug!(%addr, requests = served, "Connection finished");
    Ok(())
}

/// Answers a request the transport cannot dispatch, then gives up on the connection
async fn reject(
    reader: &mut BufReader<TcpStream>,
    err: HttpProtocolError,
    config: &HttpConfig,
) -> Result<()> {
    let Some(status) = err.status() else {
        return Err(err.into());
    };

    warn!(error = %err, status = status.as_u16(), "Rejecting request");
    let response = protocol::error_response(status);
    if let Err(e) = write_response(reader.get_mut(), &response, config, false).await {
        debug!(error = %e, "Failed to send error response");
    }
    Ok(())
}

async fn write_response(
    stream: &mut TcpStream,
    response: &OutboundResponse,
    config: &HttpConfig,
    keep_alive: bool,
) -> Result<()> {
    let head = protocol::encode_response_head(response, config.server_name.as_deref(), keep_alive);

    timeout(config.write_timeout, async {
        stream.write_all(&head).await?;
        stream.write_all(response.body()).await?;
        stream.flush().await
    })
    .await
    .map_err(|_| EchoError::Timeout(format!("Write timeout sending {}", response.status())))??;

    Ok(())
}

async fn write_bytes(stream: &mut TcpStream, data: &[u8], config: &HttpConfig) -> Result<()> {
    timeout(config.write_timeout, stream.write_all(data))
        .await
        .map_err(|_| EchoError::Timeout("Write timeout".to_string()))??;
    Ok(())
}
