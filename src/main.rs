use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use httpecho::common::EchoServerTrait;
use httpecho::http::{echo_router, HttpConfig, HttpEchoServer, ECHO_PATH};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Command-line arguments for the echo server
#[derive(Parser, Debug)]
#[command(name = "httpecho")]
#[command(version)]
#[command(about = "HTTP echo server: responds with the request's body and content-type", long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(short = 'l', long, default_value = "0.0.0.0:8080")]
    listen: SocketAddr,

    /// Port to listen on, replacing the port of `--listen`
    #[arg(short = 'p', long, env = "PORT")]
    port: Option<u16>,

    /// Maximum number of concurrent connections
    #[arg(long, default_value_t = 1000)]
    max_connections: usize,

    /// Socket read timeout in seconds
    #[arg(long, default_value_t = 30)]
    read_timeout: u64,

    /// Response write timeout in seconds
    #[arg(long, default_value_t = 30)]
    write_timeout: u64,

    /// Maximum request body size in bytes
    #[arg(long, default_value_t = 64 * 1024 * 1024)]
    max_body_size: u64,

    /// Value for the `server` response header
    #[arg(long)]
    server_name: Option<String>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn listen_addr(&self) -> SocketAddr {
        let mut addr = self.listen;
        if let Some(port) = self.port {
            addr.set_port(port);
        }
        addr
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("httpecho={}", args.log_level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = HttpConfig::new(args.listen_addr())
        .with_max_connections(args.max_connections)
        .with_read_timeout(Duration::from_secs(args.read_timeout))
        .with_write_timeout(Duration::from_secs(args.write_timeout))
        .with_max_body_size(args.max_body_size);
    if let Some(server_name) = args.server_name {
        config = config.with_server_name(server_name);
    }

    let server = HttpEchoServer::bind(config.clone(), echo_router())
        .await
        .wrap_err_with(|| format!("Failed to bind {}", config.bind_addr))?;

    info!(
        address = %server.local_addr()?,
        path = ECHO_PATH,
        max_connections = config.max_connections,
        max_body_size = config.max_body_size,
        "Starting HTTP echo server"
    );

    server.run().await.wrap_err("Failed to run HTTP echo server")?;

    Ok(())
}
