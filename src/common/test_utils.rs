use crate::common::EchoServerTrait;
use crate::http::{echo_router, HttpConfig, HttpEchoServer};
use crate::Result;
use std::net::SocketAddr;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// A server running on a background task
pub struct TestServer {
    pub addr: SocketAddr,
    pub handle: JoinHandle<Result<()>>,
    pub shutdown: broadcast::Sender<()>,
}

impl TestServer {
    /// Signals the server to stop and waits for the accept loop to exit
    pub async fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(());
        self.handle
            .await
            .map_err(|e| crate::EchoError::Unsupported(format!("server task failed: {e}")))?
    }
}

/// Starts the standard echo routes on an ephemeral loopback port.
///
/// `config.bind_addr` is ignored; the listener is bound to `127.0.0.1:0` so
/// tests never race each other for a port.
pub async fn create_test_server(config: HttpConfig) -> Result<TestServer> {
    let config = HttpConfig {
        bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        ..config
    };

    let server = HttpEchoServer::bind(config, echo_router()).await?;
    let addr = server.local_addr()?;
    let shutdown = server.shutdown_signal();
    let handle = tokio::spawn(async move { server.run().await });

    Ok(TestServer {
        addr,
        handle,
        shutdown,
    })
}

/// Creates a test server with a connection limit for integration tests
pub async fn create_controlled_test_server_with_limit(max_connections: usize) -> Result<TestServer> {
    create_test_server(HttpConfig::default().with_max_connections(max_connections)).await
}
